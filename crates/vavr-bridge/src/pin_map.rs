//! Board pin map
//!
//! Maps logical pin identifiers onto `(port, bit)` pairs. Built once at
//! startup; every other component only reads it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PinMapError;

/// Prefix of the legacy digital pin spelling (`"D13"` for pin `"13"`)
pub const LEGACY_DIGITAL_PREFIX: &str = "D";

/// One of the byte-wide I/O ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortId {
    /// Port B
    B,
    /// Port C
    C,
    /// Port D
    D,
}

impl PortId {
    /// All ports, in register order
    pub const ALL: [PortId; 3] = [PortId::B, PortId::C, PortId::D];

    /// Index into per-port arrays
    pub fn index(&self) -> usize {
        match self {
            PortId::B => 0,
            PortId::C => 1,
            PortId::D => 2,
        }
    }
}

/// Location of a single logical pin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMapping {
    /// Logical pin identifier (`"13"`, `"A0"`)
    pub pin_id: String,
    /// Port holding the pin
    pub port: PortId,
    /// Bit within the port (0..=7)
    pub bit: u8,
    /// Frequency of the hardware PWM timer driving this pin, if any
    pub pwm_frequency_hint: Option<u32>,
    /// ADC channel wired to this pin, if any
    pub analog_channel: Option<u8>,
}

impl PinMapping {
    /// Create a plain digital pin mapping
    pub fn new(pin_id: impl Into<String>, port: PortId, bit: u8) -> Self {
        Self {
            pin_id: pin_id.into(),
            port,
            bit,
            pwm_frequency_hint: None,
            analog_channel: None,
        }
    }

    /// Attach a PWM frequency hint
    pub fn with_pwm(mut self, hz: u32) -> Self {
        self.pwm_frequency_hint = Some(hz);
        self
    }

    /// Attach an ADC channel
    pub fn with_analog_channel(mut self, channel: u8) -> Self {
        self.analog_channel = Some(channel);
        self
    }

    /// Bit mask of this pin within its port
    pub fn mask(&self) -> u8 {
        1 << self.bit
    }
}

/// Immutable pin lookup table
#[derive(Debug, Clone)]
pub struct PinMap {
    mappings: Vec<PinMapping>,
    by_id: HashMap<String, usize>,
    by_port: HashMap<PortId, Vec<usize>>,
}

impl PinMap {
    /// Build a map, rejecting duplicate ids and colliding bits
    pub fn new(mappings: Vec<PinMapping>) -> Result<Self, PinMapError> {
        let mut seen = HashMap::new();
        let mut by_bit: HashMap<(PortId, u8), usize> = HashMap::new();

        for (index, mapping) in mappings.iter().enumerate() {
            if mapping.bit > 7 {
                return Err(PinMapError::BitOutOfRange {
                    pin: mapping.pin_id.clone(),
                    bit: mapping.bit,
                });
            }
            if seen.insert(mapping.pin_id.clone(), index).is_some() {
                return Err(PinMapError::DuplicatePin(mapping.pin_id.clone()));
            }
            if let Some(&other) = by_bit.get(&(mapping.port, mapping.bit)) {
                return Err(PinMapError::BitCollision {
                    first: mappings[other].pin_id.clone(),
                    second: mapping.pin_id.clone(),
                    port: mapping.port,
                    bit: mapping.bit,
                });
            }
            by_bit.insert((mapping.port, mapping.bit), index);
        }

        Ok(Self::index(mappings))
    }

    /// Build the lookup indices for an already validated table
    fn index(mappings: Vec<PinMapping>) -> Self {
        let mut by_id = HashMap::with_capacity(mappings.len());
        let mut by_port: HashMap<PortId, Vec<usize>> = HashMap::new();
        for (index, mapping) in mappings.iter().enumerate() {
            by_id.insert(mapping.pin_id.clone(), index);
            by_port.entry(mapping.port).or_default().push(index);
        }
        for indices in by_port.values_mut() {
            indices.sort_by_key(|&i| mappings[i].bit);
        }

        Self {
            mappings,
            by_id,
            by_port,
        }
    }

    /// Arduino Uno (ATmega328P) layout
    pub fn uno() -> Self {
        let mut mappings = Vec::with_capacity(20);
        for bit in 0..8u8 {
            let mut mapping = PinMapping::new(bit.to_string(), PortId::D, bit);
            match bit {
                3 => mapping = mapping.with_pwm(490),
                5 | 6 => mapping = mapping.with_pwm(980),
                _ => {}
            }
            mappings.push(mapping);
        }
        for bit in 0..6u8 {
            let mut mapping = PinMapping::new((bit + 8).to_string(), PortId::B, bit);
            if matches!(bit, 1..=3) {
                mapping = mapping.with_pwm(490);
            }
            mappings.push(mapping);
        }
        for channel in 0..6u8 {
            mappings.push(
                PinMapping::new(format!("A{}", channel), PortId::C, channel)
                    .with_analog_channel(channel),
            );
        }

        Self::index(mappings)
    }

    /// Look up a pin; also accepts the legacy `"D13"` spelling
    pub fn lookup(&self, pin: &str) -> Option<&PinMapping> {
        if let Some(&index) = self.by_id.get(pin) {
            return Some(&self.mappings[index]);
        }
        let digits = pin.strip_prefix(LEGACY_DIGITAL_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.by_id.get(digits).map(|&index| &self.mappings[index])
    }

    /// Port of a pin
    pub fn port_of(&self, pin: &str) -> Option<PortId> {
        self.lookup(pin).map(|m| m.port)
    }

    /// Bit of a pin within its port
    pub fn bit_of(&self, pin: &str) -> Option<u8> {
        self.lookup(pin).map(|m| m.bit)
    }

    /// Pins of a port, ordered by bit ascending
    pub fn pins_of_port(&self, port: PortId) -> impl Iterator<Item = &PinMapping> {
        self.by_port
            .get(&port)
            .into_iter()
            .flatten()
            .map(|&index| &self.mappings[index])
    }

    /// All mappings in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &PinMapping> {
        self.mappings.iter()
    }

    /// Number of mapped pins
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self::uno()
    }
}
