//! Firmware behavior models
//!
//! Each model reproduces what a well-known sketch does to the board, one
//! "instruction" per [`Firmware::step`]. A step reports how many CPU cycles it
//! took so the board's cycle counter advances like the real part would.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vavr_bridge::PortId;

use crate::mcu::{Board, CLOCK_HZ};

/// Cycles charged for a step that only polls or busy-waits
pub const IDLE_STEP_CYCLES: u32 = 4;

/// A program model running on a [`Board`]
pub trait Firmware: fmt::Debug + Send {
    /// Short model name
    fn name(&self) -> &'static str;

    /// Run once after reset (`setup()`)
    fn setup(&mut self, board: &mut Board);

    /// Execute one step; returns the cycles it took
    fn step(&mut self, board: &mut Board) -> u32;
}

/// Does nothing; every line stays an input
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Firmware for Idle {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn setup(&mut self, _board: &mut Board) {}

    fn step(&mut self, _board: &mut Board) -> u32 {
        IDLE_STEP_CYCLES
    }
}

/// Toggles pin 13 (PB5) with a fixed half period
#[derive(Debug, Clone)]
pub struct Blink {
    half_period: u64,
    next_toggle: u64,
    level: bool,
}

impl Blink {
    /// One second on, one second off
    pub fn new() -> Self {
        Self::with_half_period(u64::from(CLOCK_HZ))
    }

    /// Toggle every `cycles` cycles
    pub fn with_half_period(cycles: u64) -> Self {
        Self {
            half_period: cycles.max(1),
            next_toggle: 0,
            level: false,
        }
    }
}

impl Default for Blink {
    fn default() -> Self {
        Self::new()
    }
}

impl Firmware for Blink {
    fn name(&self) -> &'static str {
        "blink"
    }

    fn setup(&mut self, board: &mut Board) {
        board.pin_mode(PortId::B, 5, true);
        self.next_toggle = board.cycles();
        self.level = false;
    }

    fn step(&mut self, board: &mut Board) -> u32 {
        if board.cycles() >= self.next_toggle {
            self.level = !self.level;
            board.digital_write(PortId::B, 5, self.level);
            self.next_toggle += self.half_period;
        }
        IDLE_STEP_CYCLES
    }
}

/// Writes every received byte back
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Firmware for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn setup(&mut self, _board: &mut Board) {}

    fn step(&mut self, board: &mut Board) -> u32 {
        if let Some(byte) = board.serial_read() {
            board.serial_write(byte);
        }
        IDLE_STEP_CYCLES
    }
}

/// Software PWM on pin 9 (PB1), duty ramping up and down
#[derive(Debug, Clone)]
pub struct Fade {
    duty: u8,
    ramp_cycles: Option<u64>,
    next_ramp: u64,
    rising: bool,
}

/// Timer prescaler; one PWM period is 256 timer ticks
const PWM_PRESCALER: u64 = 64;

impl Fade {
    /// Ramp the duty cycle by one step every 30 ms
    pub fn new() -> Self {
        Self {
            duty: 0,
            ramp_cycles: Some(u64::from(CLOCK_HZ) * 30 / 1000),
            next_ramp: 0,
            rising: true,
        }
    }

    /// Hold a constant duty cycle (`analogWrite(9, duty)`)
    pub fn fixed(duty: u8) -> Self {
        Self {
            duty,
            ramp_cycles: None,
            next_ramp: 0,
            rising: true,
        }
    }

    /// Current duty cycle
    pub fn duty(&self) -> u8 {
        self.duty
    }

    fn ramp(&mut self, now: u64) {
        let Some(step) = self.ramp_cycles else {
            return;
        };
        if now < self.next_ramp {
            return;
        }
        self.next_ramp = now + step;
        match (self.rising, self.duty) {
            (true, 255) => self.rising = false,
            (false, 0) => self.rising = true,
            _ => {}
        }
        self.duty = if self.rising {
            self.duty.saturating_add(5)
        } else {
            self.duty.saturating_sub(5)
        };
    }
}

impl Default for Fade {
    fn default() -> Self {
        Self::new()
    }
}

impl Firmware for Fade {
    fn name(&self) -> &'static str {
        "fade"
    }

    fn setup(&mut self, board: &mut Board) {
        board.pin_mode(PortId::B, 1, true);
        self.next_ramp = board.cycles();
    }

    fn step(&mut self, board: &mut Board) -> u32 {
        let now = board.cycles();
        self.ramp(now);
        let counter = (now / PWM_PRESCALER) % 256;
        board.digital_write(PortId::B, 1, counter < u64::from(self.duty));
        IDLE_STEP_CYCLES
    }
}

/// Drives pin 13 high while A0 reads above half scale
#[derive(Debug, Clone, Copy, Default)]
pub struct Threshold;

/// ADC reading of 2.5 V
const HALF_SCALE: u16 = 512;

impl Firmware for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn setup(&mut self, board: &mut Board) {
        board.pin_mode(PortId::B, 5, true);
    }

    fn step(&mut self, board: &mut Board) -> u32 {
        let above = board.analog_read(0) > HALF_SCALE;
        board.digital_write(PortId::B, 5, above);
        // analogRead takes about 13 ADC clocks at prescaler 128
        13 * 128
    }
}

/// Error parsing a firmware name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown firmware model '{0}' (expected blink, echo, fade, threshold or idle)")]
pub struct UnknownFirmware(String);

/// Selectable firmware models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareKind {
    /// [`Blink`]
    #[default]
    Blink,
    /// [`Echo`]
    Echo,
    /// [`Fade`]
    Fade,
    /// [`Threshold`]
    Threshold,
    /// [`Idle`]
    Idle,
}

impl FirmwareKind {
    /// Instantiate the model
    pub fn build(&self) -> Box<dyn Firmware> {
        match self {
            FirmwareKind::Blink => Box::new(Blink::new()),
            FirmwareKind::Echo => Box::new(Echo),
            FirmwareKind::Fade => Box::new(Fade::new()),
            FirmwareKind::Threshold => Box::new(Threshold),
            FirmwareKind::Idle => Box::new(Idle),
        }
    }
}

impl FromStr for FirmwareKind {
    type Err = UnknownFirmware;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blink" => Ok(FirmwareKind::Blink),
            "echo" => Ok(FirmwareKind::Echo),
            "fade" => Ok(FirmwareKind::Fade),
            "threshold" => Ok(FirmwareKind::Threshold),
            "idle" => Ok(FirmwareKind::Idle),
            _ => Err(UnknownFirmware(s.to_string())),
        }
    }
}

impl fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FirmwareKind::Blink => "blink",
            FirmwareKind::Echo => "echo",
            FirmwareKind::Fade => "fade",
            FirmwareKind::Threshold => "threshold",
            FirmwareKind::Idle => "idle",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::VirtualMcu;
    use vavr_bridge::{Emulator, EmulatorObserver};

    struct Ignore;

    impl EmulatorObserver for Ignore {
        fn port_changed(&mut self, _port: PortId, _levels: u8, _cycle: u64) {}
        fn uart_byte_transmitted(&mut self, _byte: u8) {}
        fn uart_rx_ready(&mut self) -> Option<u8> {
            None
        }
    }

    #[test]
    fn test_blink_toggles() {
        let mut mcu = VirtualMcu::new(Box::new(Blink::with_half_period(100)));
        mcu.step(&mut Ignore);
        assert!(mcu.pin_level(PortId::B, 5));
        while mcu.cycles() <= 100 {
            mcu.step(&mut Ignore);
        }
        assert!(!mcu.pin_level(PortId::B, 5));
    }

    #[test]
    fn test_fixed_fade_duty() {
        let mut mcu = VirtualMcu::new(Box::new(Fade::fixed(64)));
        let mut high = 0u64;
        let mut total = 0u64;
        // Four PWM periods
        while mcu.cycles() < 4 * 256 * PWM_PRESCALER {
            let before = mcu.cycles();
            let level = mcu.pin_level(PortId::B, 1);
            mcu.step(&mut Ignore);
            let spent = mcu.cycles() - before;
            total += spent;
            if level {
                high += spent;
            }
        }
        let ratio = high as f64 / total as f64;
        assert!((ratio - 0.25).abs() < 0.01, "ratio {}", ratio);
    }

    #[test]
    fn test_fade_ramps_and_turns() {
        let mut fade = Fade::new();
        let step = fade.ramp_cycles.unwrap();
        for i in 0..51u64 {
            fade.ramp(i * step);
        }
        assert_eq!(fade.duty(), 255);
        fade.ramp(51 * step);
        assert_eq!(fade.duty(), 250);
    }

    #[test]
    fn test_threshold_follows_a0() {
        let mut mcu = VirtualMcu::new(Box::new(Threshold));
        mcu.set_analog_input(0, 2.5).unwrap();
        mcu.step(&mut Ignore);
        assert!(!mcu.pin_level(PortId::B, 5));

        mcu.set_analog_input(0, 3.0).unwrap();
        mcu.step(&mut Ignore);
        assert!(mcu.pin_level(PortId::B, 5));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Blink".parse::<FirmwareKind>(), Ok(FirmwareKind::Blink));
        assert_eq!("idle".parse::<FirmwareKind>(), Ok(FirmwareKind::Idle));
        assert!("tetris".parse::<FirmwareKind>().is_err());
        assert_eq!(FirmwareKind::Threshold.to_string(), "threshold");
        assert_eq!(FirmwareKind::Fade.build().name(), "fade");
    }
}
