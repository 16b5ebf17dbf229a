//! Emulator collaborator interface
//!
//! The bridge does not execute instructions itself. It drives any engine
//! that implements [`Emulator`] and receives the engine's hardware
//! notifications through an [`EmulatorObserver`] handed to every `step`.

use crate::error::EmulatorError;
use crate::image::Image;
use crate::pin_map::PortId;

/// Receiver of hardware notifications raised while stepping
pub trait EmulatorObserver {
    /// A port's externally visible levels changed
    ///
    /// `levels` holds one bit per port line; `cycle` is the emulator cycle
    /// counter at the moment of the change.
    fn port_changed(&mut self, port: PortId, levels: u8, cycle: u64);

    /// The UART finished shifting out a byte
    fn uart_byte_transmitted(&mut self, byte: u8);

    /// The UART can accept the next inbound byte
    ///
    /// Returning `Some` hands that byte to the UART immediately.
    fn uart_rx_ready(&mut self) -> Option<u8>;
}

/// A stepping CPU/peripheral engine
pub trait Emulator: Send {
    /// Load a program image and reset
    fn load_image(&mut self, image: &Image) -> Result<(), EmulatorError>;

    /// Execute one instruction, delivering any notifications it raised
    fn step(&mut self, observer: &mut dyn EmulatorObserver);

    /// Monotonic cycle counter
    fn cycles(&self) -> u64;

    /// CPU clock in Hz, used to convert cycles into seconds
    fn clock_hz(&self) -> u32;

    /// Current level of a port line
    fn pin_level(&self, port: PortId, bit: u8) -> bool;

    /// Drive a port line from outside (external digital input)
    fn set_pin(&mut self, port: PortId, bit: u8, level: bool);

    /// Start shifting a byte into the UART receiver
    fn uart_write_byte(&mut self, byte: u8);

    /// Apply a voltage to an ADC channel
    fn set_analog_input(&mut self, channel: u8, volts: f64) -> Result<(), EmulatorError>;

    /// Voltage currently applied to an ADC channel
    fn analog_input(&self, channel: u8) -> Option<f64>;
}

/// Convert a cycle count into emulated seconds
pub fn cpu_time(cycles: u64, clock_hz: u32) -> f64 {
    if clock_hz == 0 {
        return 0.0;
    }
    cycles as f64 / f64::from(clock_hz)
}
