//! Error handling for GCodeBridge
//!
//! Provides error types for all layers of the proxy:
//! - Configuration errors (file parsing, validation, trigger rules)
//! - Transport errors (serial port, device discovery)
//! - Session errors (dispatcher lifecycle, submission)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Configuration error type
///
/// Raised during startup while loading and validating configuration.
/// Any variant aborts startup before a connection is accepted.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("Invalid config file {path}: {reason}")]
    Parse {
        /// The path that failed to parse.
        path: String,
        /// The parser's message.
        reason: String,
    },

    /// Unsupported configuration file extension
    #[error("Config file must be .json or .toml: {path}")]
    UnsupportedFormat {
        /// The offending path.
        path: String,
    },

    /// Neither usb-id nor dev-path was provided
    #[error(
        "Either device.usb-id or device.dev-path is required (pass --dry-run to run without hardware)"
    )]
    DeviceNotSpecified,

    /// Both usb-id and dev-path were provided
    #[error("device.usb-id and device.dev-path are mutually exclusive")]
    DeviceConflict,

    /// A numeric option is out of range
    #[error("Invalid value for {option}: {reason}")]
    InvalidValue {
        /// The option name.
        option: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A trigger entry failed validation
    #[error("Trigger '{id}' is invalid: {reason}")]
    InvalidTrigger {
        /// The trigger's id, or a placeholder when the id itself is missing.
        id: String,
        /// Why the entry is invalid.
        reason: String,
    },
}

/// Transport error type
///
/// Represents errors on the serial channel and during device discovery.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport has been closed
    #[error("Transport closed")]
    Closed,

    /// USB device lookup failed
    #[error("USB device with ID '{usb_id}' not found. Available USB serial devices: {available}")]
    DeviceNotFound {
        /// The vendor:product pair that was searched for.
        usb_id: String,
        /// Human-readable list of devices that were present.
        available: String,
    },

    /// The usb-id string is not a vendor:product pair
    #[error("Invalid USB ID format '{usb_id}'. Expected format: 'vendor:product' (e.g., '303a:4001')")]
    InvalidUsbId {
        /// The malformed id.
        usb_id: String,
    },

    /// Opening the serial port failed
    #[error("Failed to open port {port}: {reason}")]
    OpenFailed {
        /// The device node that failed to open.
        port: String,
        /// The driver's message.
        reason: String,
    },

    /// I/O error on an open transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session error type
///
/// Surfaced to submitters when the device session cannot take or finish
/// a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The service is stopping; no further submissions are accepted
    #[error("Service stopped")]
    ServiceStopped,

    /// The serial channel closed while the command was queued or in flight
    #[error("Transport closed")]
    TransportClosed,
}

/// Main error type for GCodeBridge
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this error means the serial channel is gone
    pub fn is_transport_closed(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Closed)
                | Error::Session(SessionError::TransportClosed)
        )
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
