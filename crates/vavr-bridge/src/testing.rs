//! Scripted emulator for unit tests

use std::collections::VecDeque;

use crate::emulator::{Emulator, EmulatorObserver};
use crate::error::EmulatorError;
use crate::image::Image;
use crate::pin_map::PortId;

/// Cycles the mock UART needs per byte
pub const UART_BYTE_CYCLES: u64 = 10;

/// One instruction per cycle; port outputs follow a script
#[derive(Debug, Default)]
pub struct MockEmulator {
    pub cycles: u64,
    pub outputs: [u8; 3],
    pub inputs: [u8; 3],
    pub output_mask: [u8; 3],
    pub analog: [f64; 6],
    pub script: VecDeque<(u64, PortId, u8)>,
    pub tx_script: VecDeque<(u64, u8)>,
    pub uart_received: Vec<u8>,
    pub uart_busy_until: Option<u64>,
    pub overruns: usize,
    pub loaded: Option<Image>,
    reported: [u8; 3],
}

impl MockEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `levels` on the output bits of `port` once `cycle` is reached
    pub fn at(mut self, cycle: u64, port: PortId, levels: u8) -> Self {
        self.output_mask[port.index()] = 0xFF;
        self.script.push_back((cycle, port, levels));
        self
    }

    /// Have the UART transmit `byte` at `cycle`
    pub fn transmit_at(mut self, cycle: u64, byte: u8) -> Self {
        self.tx_script.push_back((cycle, byte));
        self
    }

    fn levels(&self, port: PortId) -> u8 {
        let i = port.index();
        (self.outputs[i] & self.output_mask[i]) | (self.inputs[i] & !self.output_mask[i])
    }
}

impl Emulator for MockEmulator {
    fn load_image(&mut self, image: &Image) -> Result<(), EmulatorError> {
        if image.len() > 1024 {
            return Err(EmulatorError::ImageTooLarge {
                size: image.len(),
                capacity: 1024,
            });
        }
        self.loaded = Some(image.clone());
        Ok(())
    }

    fn step(&mut self, observer: &mut dyn EmulatorObserver) {
        self.cycles += 1;

        while let Some(&(cycle, port, levels)) = self.script.front() {
            if cycle > self.cycles {
                break;
            }
            self.outputs[port.index()] = levels;
            self.script.pop_front();
        }
        while let Some(&(cycle, byte)) = self.tx_script.front() {
            if cycle > self.cycles {
                break;
            }
            observer.uart_byte_transmitted(byte);
            self.tx_script.pop_front();
        }

        if self.uart_busy_until.is_some_and(|until| until <= self.cycles) {
            self.uart_busy_until = None;
            if let Some(next) = observer.uart_rx_ready() {
                self.uart_write_byte(next);
            }
        }

        for port in PortId::ALL {
            let levels = self.levels(port);
            if levels != self.reported[port.index()] {
                self.reported[port.index()] = levels;
                observer.port_changed(port, levels, self.cycles);
            }
        }
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn clock_hz(&self) -> u32 {
        1_000
    }

    fn pin_level(&self, port: PortId, bit: u8) -> bool {
        self.levels(port) & (1 << bit) != 0
    }

    fn set_pin(&mut self, port: PortId, bit: u8, level: bool) {
        let inputs = &mut self.inputs[port.index()];
        if level {
            *inputs |= 1 << bit;
        } else {
            *inputs &= !(1 << bit);
        }
    }

    fn uart_write_byte(&mut self, byte: u8) {
        if self.uart_busy_until.is_some() {
            self.overruns += 1;
            return;
        }
        self.uart_received.push(byte);
        self.uart_busy_until = Some(self.cycles + UART_BYTE_CYCLES);
    }

    fn set_analog_input(&mut self, channel: u8, volts: f64) -> Result<(), EmulatorError> {
        let slot = self
            .analog
            .get_mut(usize::from(channel))
            .ok_or(EmulatorError::NoSuchAnalogChannel(channel))?;
        *slot = volts;
        Ok(())
    }

    fn analog_input(&self, channel: u8) -> Option<f64> {
        self.analog.get(usize::from(channel)).copied()
    }
}
