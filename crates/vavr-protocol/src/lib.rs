//! virtualavr control protocol
//!
//! This crate defines the JSON messages exchanged between WebSocket clients
//! and the simulation bridge:
//!
//! - **Inbound**: `pinMode`, `pinState` / `fakePinState`, `control` and
//!   `serialDebug`, each optionally carrying a `replyId`
//! - **Outbound**: `pinState` reports, `serialDebug` mirrors and
//!   acknowledgements (`{...original, "executed": true}`)
//!
//! # Architecture
//!
//! Inbound payloads are validated at the boundary into the closed
//! [`Command`] enum. Anything that fails validation is reported as a
//! [`ProtocolError`] and never reaches the simulation. Unknown message types
//! are still accepted as [`Command::Unknown`] so that newer clients do not
//! break older bridges.
//!
//! # Example
//!
//! ```rust
//! use vavr_protocol::{Command, Envelope, PinReportMode};
//!
//! let envelope = Envelope::from_json(
//!     r#"{"type":"pinMode","pin":"13","mode":"digital","replyId":"1"}"#,
//! ).unwrap();
//!
//! assert_eq!(
//!     envelope.command,
//!     Command::PinMode { pin: "13".into(), mode: PinReportMode::Digital },
//! );
//! assert!(envelope.reply_id.is_some());
//! ```

pub mod command;
pub mod error;
pub mod event;

pub use command::{Command, ControlAction, Envelope, PinReportMode, PinValue, ANALOG_INPUT_MAX};
pub use error::ProtocolError;
pub use event::{
    Acknowledgement, OutboundEvent, PinStateEvent, SerialDebugEvent, SerialDirection,
};
