//! Virtual AVR Board
//!
//! A behavioral stand-in for an instruction-level ATmega328P core. It
//! implements the [`vavr_bridge::Emulator`] interface with:
//!
//! - **VirtualMcu**: cycle counter, ports B/C/D with DDR/PORT/PIN semantics,
//!   a paced USART and an 8-channel ADC
//! - **Firmware models**: blink, serial echo, PWM fade and an analog
//!   threshold switch, standing in for the compiled program
//!
//! # Example
//!
//! ```rust
//! use vavr_bridge::{Emulator, EmulatorObserver, PortId};
//! use vavr_sim::{FirmwareKind, VirtualMcu};
//!
//! struct Print;
//!
//! impl EmulatorObserver for Print {
//!     fn port_changed(&mut self, port: PortId, levels: u8, cycle: u64) {
//!         println!("{:?} = {:08b} @ {}", port, levels, cycle);
//!     }
//!     fn uart_byte_transmitted(&mut self, _byte: u8) {}
//!     fn uart_rx_ready(&mut self) -> Option<u8> {
//!         None
//!     }
//! }
//!
//! let mut mcu = VirtualMcu::new(FirmwareKind::Blink.build());
//! for _ in 0..1000 {
//!     mcu.step(&mut Print);
//! }
//! assert!(mcu.pin_level(PortId::B, 5));
//! ```

pub mod firmware;
pub mod mcu;

pub use firmware::{Blink, Echo, Fade, Firmware, FirmwareKind, Idle, Threshold, UnknownFirmware};
pub use mcu::{Board, VirtualMcu, CLOCK_HZ, DEFAULT_BAUD, FLASH_SIZE};
