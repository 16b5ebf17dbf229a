//! Error types for the simulation bridge

use std::path::PathBuf;

use thiserror::Error;

use crate::pin_map::PortId;

/// Errors that abort session loading
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Program image could not be read or decoded
    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// Toolchain failed to produce an image
    #[error("toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),

    /// Emulator rejected the image or a request
    #[error("emulator error: {0}")]
    Emulator(#[from] EmulatorError),

    /// Board description is inconsistent
    #[error("pin map error: {0}")]
    PinMap(#[from] PinMapError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors decoding a machine-code image
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Image file does not exist or could not be read
    #[error("cannot read {path}: {reason}")]
    Unreadable {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error text
        reason: String,
    },

    /// Image contains no data
    #[error("image is empty")]
    Empty,

    /// A HEX record does not start with ':' or has odd/invalid hex digits
    #[error("line {line}: malformed record")]
    MalformedRecord {
        /// 1-based line number
        line: usize,
    },

    /// A HEX record's checksum does not match its contents
    #[error("line {line}: checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    ChecksumMismatch {
        /// 1-based line number
        line: usize,
        /// Checksum computed from the record
        expected: u8,
        /// Checksum found in the record
        actual: u8,
    },

    /// Record type not defined by the Intel HEX format
    #[error("line {line}: unsupported record type 0x{record_type:02X}")]
    UnsupportedRecord {
        /// 1-based line number
        line: usize,
        /// Record type byte
        record_type: u8,
    },

    /// Image would exceed the maximum supported size
    #[error("image too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Highest address + 1
        size: usize,
        /// Maximum accepted size
        limit: usize,
    },
}

/// Errors reported by the toolchain collaborator
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// Compiler ran and reported a failure
    #[error("compilation failed:\n{diagnostic}")]
    Failed {
        /// Compiler output
        diagnostic: String,
    },

    /// Compiler binary could not be started
    #[error("cannot run {program}: {source}")]
    Spawn {
        /// Program that was started
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Compiler succeeded but no image was found in its output
    #[error("no .hex output found in {0}")]
    MissingOutput(PathBuf),

    /// Source path has no usable sketch name
    #[error("invalid sketch path: {0}")]
    InvalidSource(PathBuf),

    /// I/O error while preparing the build
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Produced image could not be decoded
    #[error("invalid compiler output: {0}")]
    Image(#[from] ImageError),
}

/// Errors reported by the emulator collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// Image does not fit in program memory
    #[error("image of {size} bytes exceeds flash size {capacity}")]
    ImageTooLarge {
        /// Image size in bytes
        size: usize,
        /// Flash capacity in bytes
        capacity: usize,
    },

    /// Analog channel index outside the ADC
    #[error("analog channel {0} does not exist")]
    NoSuchAnalogChannel(u8),

    /// Other emulator-specific failure
    #[error("{0}")]
    Rejected(String),
}

/// Errors building a pin map
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinMapError {
    /// Same pin identifier listed twice
    #[error("duplicate pin id '{0}'")]
    DuplicatePin(String),

    /// Two pins mapped onto the same port bit
    #[error("pins '{first}' and '{second}' both map to port {port:?} bit {bit}")]
    BitCollision {
        /// Pin listed first
        first: String,
        /// Pin listed second
        second: String,
        /// Shared port
        port: PortId,
        /// Shared bit
        bit: u8,
    },

    /// Bit index outside 0..=7
    #[error("pin '{pin}' has bit index {bit}, ports are 8 bits wide")]
    BitOutOfRange {
        /// Offending pin
        pin: String,
        /// Offending bit index
        bit: u8,
    },
}

/// Errors applying a single command; logged at the tick boundary
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Emulator refused the requested change
    #[error("{command} on pin {pin}: {source}")]
    Emulator {
        /// Command type
        command: String,
        /// Target pin
        pin: String,
        /// Underlying error
        #[source]
        source: EmulatorError,
    },
}

/// The session consuming the command queue has stopped
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("session is no longer running")]
pub struct SessionClosed;
