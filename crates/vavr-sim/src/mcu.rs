//! Virtual ATmega328P board
//!
//! Models the parts of the chip the bridge observes: a cycle counter, the
//! three I/O ports, the USART and the ADC inputs. Program behavior comes from
//! a [`Firmware`] model rather than from decoding the loaded image.

use std::collections::VecDeque;

use tracing::{debug, warn};
use vavr_bridge::{Emulator, EmulatorError, EmulatorObserver, Image, PortId};

use crate::firmware::Firmware;

/// CPU clock of an Uno
pub const CLOCK_HZ: u32 = 16_000_000;

/// Program memory size
pub const FLASH_SIZE: usize = 32 * 1024;

/// Number of ADC input channels
pub const ADC_CHANNELS: usize = 8;

/// ADC reference voltage
pub const ADC_REFERENCE_VOLTS: f64 = 5.0;

/// Default USART baud rate
pub const DEFAULT_BAUD: u32 = 115_200;

/// DDR/PORT/PIN register triple of one I/O port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Port {
    ddr: u8,
    port: u8,
    pin_input: u8,
}

impl Port {
    /// Output bits show the PORT register, input bits the external level
    fn levels(&self) -> u8 {
        (self.ddr & self.port) | (!self.ddr & self.pin_input)
    }
}

/// Byte-at-a-time USART with 8N1 framing
#[derive(Debug, Clone)]
struct Uart {
    cycles_per_byte: u64,
    rx_in_flight: Option<(u8, u64)>,
    rx_fifo: VecDeque<u8>,
    tx_queue: VecDeque<u8>,
    tx_in_flight: Option<(u8, u64)>,
    overruns: u64,
}

impl Uart {
    fn new(baud: u32) -> Self {
        // 10 bits per frame, rounded up
        let cycles_per_byte = (u64::from(CLOCK_HZ) * 10).div_ceil(u64::from(baud.max(1)));
        Self {
            cycles_per_byte,
            rx_in_flight: None,
            rx_fifo: VecDeque::new(),
            tx_queue: VecDeque::new(),
            tx_in_flight: None,
            overruns: 0,
        }
    }

    fn receive(&mut self, byte: u8, now: u64) {
        if self.rx_in_flight.is_some() {
            self.overruns += 1;
            warn!(byte, "USART receiver overrun, byte dropped");
            return;
        }
        self.rx_in_flight = Some((byte, now + self.cycles_per_byte));
    }

    fn advance(&mut self, now: u64, observer: &mut dyn EmulatorObserver) {
        if let Some((byte, done_at)) = self.rx_in_flight {
            if done_at <= now {
                self.rx_in_flight = None;
                self.rx_fifo.push_back(byte);
                if let Some(next) = observer.uart_rx_ready() {
                    self.receive(next, now);
                }
            }
        }

        if let Some((byte, done_at)) = self.tx_in_flight {
            if done_at <= now {
                self.tx_in_flight = None;
                observer.uart_byte_transmitted(byte);
            }
        }
        if self.tx_in_flight.is_none() {
            if let Some(byte) = self.tx_queue.pop_front() {
                self.tx_in_flight = Some((byte, now + self.cycles_per_byte));
            }
        }
    }
}

/// Peripheral state visible to firmware models
#[derive(Debug, Clone)]
pub struct Board {
    cycles: u64,
    ports: [Port; 3],
    adc: [f64; ADC_CHANNELS],
    uart: Uart,
}

impl Board {
    fn new(baud: u32) -> Self {
        Self {
            cycles: 0,
            ports: [Port::default(); 3],
            adc: [0.0; ADC_CHANNELS],
            uart: Uart::new(baud),
        }
    }

    /// Cycles executed since reset
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Configure a port line as output (`true`) or input
    pub fn pin_mode(&mut self, port: PortId, bit: u8, output: bool) {
        let p = &mut self.ports[port.index()];
        if output {
            p.ddr |= 1 << bit;
        } else {
            p.ddr &= !(1 << bit);
        }
    }

    /// Write a port line's PORT bit
    pub fn digital_write(&mut self, port: PortId, bit: u8, level: bool) {
        let p = &mut self.ports[port.index()];
        if level {
            p.port |= 1 << bit;
        } else {
            p.port &= !(1 << bit);
        }
    }

    /// Read a port line's level
    pub fn digital_read(&self, port: PortId, bit: u8) -> bool {
        self.levels(port) & (1 << bit) != 0
    }

    /// Externally visible levels of a port
    pub fn levels(&self, port: PortId) -> u8 {
        self.ports[port.index()].levels()
    }

    /// 10-bit conversion of an ADC channel
    pub fn analog_read(&self, channel: u8) -> u16 {
        let volts = self.adc.get(usize::from(channel)).copied().unwrap_or(0.0);
        let raw = (volts / ADC_REFERENCE_VOLTS * 1024.0).floor();
        raw.clamp(0.0, 1023.0) as u16
    }

    /// Number of received bytes not yet read
    pub fn serial_available(&self) -> usize {
        self.uart.rx_fifo.len()
    }

    /// Read the oldest received byte
    pub fn serial_read(&mut self) -> Option<u8> {
        self.uart.rx_fifo.pop_front()
    }

    /// Queue a byte for transmission
    pub fn serial_write(&mut self, byte: u8) {
        self.uart.tx_queue.push_back(byte);
    }

    /// Queue a string for transmission
    pub fn serial_print(&mut self, text: &str) {
        self.uart.tx_queue.extend(text.bytes());
    }
}

/// Virtual MCU implementing the bridge's [`Emulator`] interface
#[derive(Debug)]
pub struct VirtualMcu {
    board: Board,
    firmware: Box<dyn Firmware>,
    flash: Vec<u8>,
    reported: [u8; 3],
    baud: u32,
}

impl VirtualMcu {
    /// Create a board running `firmware` at the default baud rate
    pub fn new(firmware: Box<dyn Firmware>) -> Self {
        Self::with_baud(firmware, DEFAULT_BAUD)
    }

    /// Create a board with a specific USART baud rate
    pub fn with_baud(mut firmware: Box<dyn Firmware>, baud: u32) -> Self {
        let mut board = Board::new(baud);
        firmware.setup(&mut board);
        Self {
            board,
            firmware,
            flash: Vec::new(),
            reported: [0; 3],
            baud,
        }
    }

    /// Peripheral state
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Bytes dropped because the host wrote while the receiver was busy
    pub fn uart_overruns(&self) -> u64 {
        self.board.uart.overruns
    }

    /// Cycles the USART needs for one byte
    pub fn uart_cycles_per_byte(&self) -> u64 {
        self.board.uart.cycles_per_byte
    }

    /// Loaded program memory
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Name of the firmware model
    pub fn firmware_name(&self) -> &'static str {
        self.firmware.name()
    }
}

impl Emulator for VirtualMcu {
    fn load_image(&mut self, image: &Image) -> Result<(), EmulatorError> {
        if image.len() > FLASH_SIZE {
            return Err(EmulatorError::ImageTooLarge {
                size: image.len(),
                capacity: FLASH_SIZE,
            });
        }
        self.flash = image.bytes().to_vec();
        self.board = Board::new(self.baud);
        self.reported = [0; 3];
        self.firmware.setup(&mut self.board);
        debug!(
            bytes = image.len(),
            firmware = self.firmware.name(),
            "image loaded, board reset"
        );
        Ok(())
    }

    fn step(&mut self, observer: &mut dyn EmulatorObserver) {
        let cost = self.firmware.step(&mut self.board).max(1);
        self.board.cycles += u64::from(cost);
        let now = self.board.cycles;

        self.board.uart.advance(now, observer);

        for port in PortId::ALL {
            let levels = self.board.levels(port);
            if levels != self.reported[port.index()] {
                self.reported[port.index()] = levels;
                observer.port_changed(port, levels, now);
            }
        }
    }

    fn cycles(&self) -> u64 {
        self.board.cycles
    }

    fn clock_hz(&self) -> u32 {
        CLOCK_HZ
    }

    fn pin_level(&self, port: PortId, bit: u8) -> bool {
        self.board.digital_read(port, bit)
    }

    fn set_pin(&mut self, port: PortId, bit: u8, level: bool) {
        let p = &mut self.board.ports[port.index()];
        if level {
            p.pin_input |= 1 << bit;
        } else {
            p.pin_input &= !(1 << bit);
        }
    }

    fn uart_write_byte(&mut self, byte: u8) {
        let now = self.board.cycles;
        self.board.uart.receive(byte, now);
    }

    fn set_analog_input(&mut self, channel: u8, volts: f64) -> Result<(), EmulatorError> {
        let slot = self
            .board
            .adc
            .get_mut(usize::from(channel))
            .ok_or(EmulatorError::NoSuchAnalogChannel(channel))?;
        *slot = volts;
        Ok(())
    }

    fn analog_input(&self, channel: u8) -> Option<f64> {
        self.board.adc.get(usize::from(channel)).copied()
    }
}
