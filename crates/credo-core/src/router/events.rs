//! Event type definitions for the relay.
//!
//! Two scopes of events flow through the relay:
//! - Bus events, published by a controller for every axis it drives,
//!   keyed by the raw `name$index` string
//! - Device events, republished by a device proxy for one axis only
//!
//! Events are cloneable and serializable for logging/replay.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::Value;

/// Raw topics published by a controller bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusTopic {
    /// A controller variable changed.
    VariableChange,
    /// The controller failed to query or set a variable.
    Error,
}

impl BusTopic {
    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            BusTopic::VariableChange => "variable-change",
            BusTopic::Error => "error",
        }
    }
}

impl fmt::Display for BusTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw controller event, addressed by `name$index` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusEvent {
    /// A variable changed on the controller.
    VariableChange {
        /// Full `name$index` key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Querying or setting a variable failed.
    Error {
        /// Full `name$index` key.
        key: String,
        /// Description of the failure.
        cause: String,
        /// Diagnostic trace text from the controller backend.
        trace: String,
    },
}

impl BusEvent {
    /// Get the topic this event is published on
    pub fn topic(&self) -> BusTopic {
        match self {
            BusEvent::VariableChange { .. } => BusTopic::VariableChange,
            BusEvent::Error { .. } => BusTopic::Error,
        }
    }

    /// Raw key the event is addressed to
    pub fn key(&self) -> &str {
        match self {
            BusEvent::VariableChange { key, .. } | BusEvent::Error { key, .. } => key,
        }
    }
}

/// Topics a device consumer may subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceTopic {
    /// Any variable of the device changed.
    VariableChange,
    /// The device reported an error.
    Error,
    /// The actual position changed.
    PositionChange,
    /// A motion finished.
    Stop,
}

impl DeviceTopic {
    /// All device topics, in declaration order
    pub const ALL: [DeviceTopic; 4] = [
        DeviceTopic::VariableChange,
        DeviceTopic::Error,
        DeviceTopic::PositionChange,
        DeviceTopic::Stop,
    ];

    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTopic::VariableChange => "variable-change",
            DeviceTopic::Error => "error",
            DeviceTopic::PositionChange => "position-change",
            DeviceTopic::Stop => "stop",
        }
    }
}

impl fmt::Display for DeviceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-scoped event seen by consumers of one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A variable of this device changed.
    VariableChange {
        /// Variable name without the index suffix.
        name: String,
        /// New value.
        value: Value,
    },
    /// The controller reported an error for a variable of this device.
    Error {
        /// Variable name without the index suffix.
        name: String,
        /// Description of the failure.
        cause: String,
        /// Diagnostic trace text.
        trace: String,
    },
    /// The actual position changed.
    PositionChange {
        /// New position in physical units.
        value: f64,
    },
    /// A motion started by this device finished.
    Stop {
        /// Whether the controller reports the target position reached.
        target_reached: bool,
    },
}

impl DeviceEvent {
    /// Get the topic this event is published on
    pub fn topic(&self) -> DeviceTopic {
        match self {
            DeviceEvent::VariableChange { .. } => DeviceTopic::VariableChange,
            DeviceEvent::Error { .. } => DeviceTopic::Error,
            DeviceEvent::PositionChange { .. } => DeviceTopic::PositionChange,
            DeviceEvent::Stop { .. } => DeviceTopic::Stop,
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::VariableChange { name, value } => write!(f, "{} = {}", name, value),
            DeviceEvent::Error { name, cause, .. } => write!(f, "Error on {}: {}", name, cause),
            DeviceEvent::PositionChange { value } => write!(f, "Position: {}", value),
            DeviceEvent::Stop { target_reached } => {
                if *target_reached {
                    write!(f, "Stopped at target")
                } else {
                    write!(f, "Stopped before target")
                }
            }
        }
    }
}
