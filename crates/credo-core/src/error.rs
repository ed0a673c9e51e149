//! Error handling for the CREDO device relay
//!
//! Provides error types for all layers of the relay:
//! - Topic key errors (malformed `name$index` keys)
//! - Router errors (subscription lifecycle)
//! - Transport errors (controller bus failures)
//! - Device errors (per-device proxy lifecycle)
//! - Configuration errors
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::router::SubscriptionId;
use thiserror::Error;

/// Topic key error type
///
/// Raised when a raw controller key cannot be split into a variable name
/// and a device index. Consumers recover from it locally by dropping the
/// event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The key has no `$` separator
    #[error("Topic key '{key}' has no '$' separator")]
    MissingSeparator {
        /// The offending raw key.
        key: String,
    },

    /// The part after the last `$` is not a canonical decimal index
    #[error("Topic key '{key}' has invalid index suffix '{suffix}'")]
    InvalidIndex {
        /// The offending raw key.
        key: String,
        /// The suffix that failed to parse.
        suffix: String,
    },

    /// The variable name is empty or contains `$`
    #[error("Invalid variable name '{name}'")]
    InvalidName {
        /// The rejected variable name.
        name: String,
    },
}

/// Router error type
///
/// Misuse of the subscription lifecycle. These are programmer errors and
/// are always surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The handle was never issued by this router or was already released
    #[error("Invalid subscription handle {id}")]
    InvalidHandle {
        /// The rejected handle.
        id: SubscriptionId,
    },
}

/// Transport error type
///
/// Failures of the controller bus while forwarding a command or reading a
/// variable. Never retried by the relay.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Controller is not connected
    #[error("Controller {controller} not connected")]
    NotConnected {
        /// The controller name.
        controller: String,
    },

    /// The controller does not know the variable
    #[error("Unknown variable '{key}'")]
    UnknownVariable {
        /// The full `name$index` key.
        key: String,
    },

    /// The controller has no axis with this index
    #[error("Controller has no device with index {index}")]
    UnknownDevice {
        /// The requested device index.
        index: u32,
    },

    /// Command was rejected by the controller
    #[error("Command rejected: {reason}")]
    CommandRejected {
        /// The reason the command was rejected.
        reason: String,
    },

    /// Requested position lies outside the soft limits
    #[error("Position {position} of device {index} outside soft limits [{left}, {right}]")]
    LimitViolation {
        /// The device index.
        index: u32,
        /// The requested absolute position.
        position: f64,
        /// The left soft limit.
        left: f64,
        /// The right soft limit.
        right: f64,
    },

    /// Controller is busy with another motion
    #[error("Controller busy: {reason}")]
    Busy {
        /// Why the controller refused.
        reason: String,
    },

    /// A variable did not hold the expected kind of value
    #[error("Variable '{key}' holds {actual}, expected {expected}")]
    TypeMismatch {
        /// The full `name$index` key.
        key: String,
        /// The expected value kind.
        expected: String,
        /// The value kind actually found.
        actual: String,
    },

    /// Generic transport error
    #[error("Transport error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Device error type
///
/// Errors raised by a per-device proxy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The event is addressed to another device
    #[error("Event for device {actual} is not for device {expected}")]
    NotForThisDevice {
        /// The index of this device.
        expected: u32,
        /// The index found in the key.
        actual: u32,
    },

    /// `teardown` was called more than once
    #[error("Device '{device}' already torn down")]
    AlreadyTornDown {
        /// The device name.
        device: String,
    },

    /// Variable name cannot be encoded as a topic key
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// Forwarded command failed on the bus
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Subscription lifecycle failure
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file has an unsupported extension
    #[error("Config file must be .json or .toml: {path}")]
    UnsupportedFormat {
        /// The rejected path.
        path: String,
    },

    /// Config content could not be parsed or serialized
    #[error("Invalid config: {reason}")]
    Invalid {
        /// The parser's message.
        reason: String,
    },

    /// A configuration value failed validation
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting {
        /// The dotted path of the setting.
        key: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// I/O error while reading or writing a config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for the relay
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Topic key error
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// Router error
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Device error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a subscription lifecycle error
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Error::Router(_)
                | Error::Device(DeviceError::AlreadyTornDown { .. })
                | Error::Device(DeviceError::Router(_))
        )
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Device(DeviceError::Transport(_))
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
