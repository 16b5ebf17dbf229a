//! Simulation Bridge
//!
//! This crate connects a stepping AVR emulator to external observers. It
//! turns raw port bits into pin events, estimates PWM duty cycles, applies
//! inbound commands at a safe point and relays serial bytes to and from the
//! emulated UART.
//!
//! # Architecture
//!
//! A [`Session`] owns the emulator and all bridge state. It is advanced by
//! [`Session::tick`], which
//!
//! - steps the emulator for one batch, feeding its port and UART
//!   notifications to the [`PortChangeTracker`] and the [`SerialBridge`],
//! - drains the [`CommandQueue`] and dispatches each command in order,
//! - lets the [`PublishScheduler`] publish analog samples when its
//!   wall-clock interval has elapsed.
//!
//! [`run_session`] drives the tick loop on tokio and forwards events to a
//! broadcast channel. Producers only ever hold a [`CommandSender`], so the
//! simulation state needs no locks.
//!
//! The emulator itself is behind the [`Emulator`] trait and compilation is
//! behind [`Toolchain`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Instant;
//! use vavr_bridge::{command_queue, BridgeConfig, PinMap, Session};
//! use vavr_protocol::Envelope;
//!
//! let (commands, queue) = command_queue();
//! let mut session = Session::load(emulator, &image, PinMap::uno(), &BridgeConfig::default(), queue)?;
//!
//! commands.submit(Envelope::from_json(r#"{"type":"pinMode","pin":"13","mode":"digital"}"#)?)?;
//! session.tick(Instant::now());
//! for event in session.drain_events() {
//!     println!("{}", event.to_json());
//! }
//! ```

pub mod actor;
pub mod config;
mod dispatch;
pub mod emulator;
pub mod error;
pub mod events;
pub mod image;
pub mod pin_map;
pub mod publish;
pub mod queue;
pub mod serial;
pub mod session;
pub mod toolchain;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use actor::{run_session, spawn_session, SessionControl, SessionHandle};
pub use config::BridgeConfig;
pub use emulator::{cpu_time, Emulator, EmulatorObserver};
pub use error::{
    BridgeError, DispatchError, EmulatorError, ImageError, PinMapError, SessionClosed,
    ToolchainError,
};
pub use events::Outbox;
pub use image::Image;
pub use pin_map::{PinMap, PinMapping, PortId};
pub use publish::{duty_cycle, PublishScheduler};
pub use queue::{command_queue, CommandQueue, CommandSender, Inbound};
pub use serial::SerialBridge;
pub use session::{RunState, Session, SessionSnapshot};
pub use toolchain::{load_program, ArduinoCli, ProgramSource, Toolchain};
pub use tracker::{ListeningMode, PinRuntimeState, PortChangeTracker};
