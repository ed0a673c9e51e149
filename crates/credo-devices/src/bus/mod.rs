//! Controller bus interface
//!
//! A controller bus owns the connection to one motor controller card. It
//! exposes the card's variables keyed by `name$index`, forwards motion
//! commands to an axis, and publishes raw `variable-change` and `error`
//! events on its [`BusRouter`].
//!
//! Commands are fire-and-forget: a successful return only means the card
//! accepted the command. Completion is observed later through events.

mod simulated;

pub use simulated::{BusCommand, SimulatedBus};

use credo_core::router::BusRouter;
use credo_core::{TransportError, Value};

/// Variable holding the actual position of an axis
pub const ACTUAL_POSITION: &str = "actualposition";
/// Variable holding the commanded target position of an axis
pub const TARGET_POSITION: &str = "targetposition";
/// Variable set when the last motion reached its target
pub const TARGET_REACHED: &str = "targetpositionreached";
/// Motion status of an axis, `idle` or `moving`
pub const STATUS: &str = "_status";
/// Status word of an axis at rest
pub const STATUS_IDLE: &str = "idle";
/// Status word of an axis in motion
pub const STATUS_MOVING: &str = "moving";
/// Actual speed of an axis
pub const ACTUAL_SPEED: &str = "actualspeed";
/// Motor load value
pub const LOAD: &str = "load";
/// Left limit switch state
pub const LEFT_SWITCH: &str = "leftswitchstatus";
/// Right limit switch state
pub const RIGHT_SWITCH: &str = "rightswitchstatus";
/// Driver error bit field
pub const DRIVER_ERROR: &str = "drivererror";
/// Left soft limit
pub const SOFT_LEFT: &str = "softleft";
/// Right soft limit
pub const SOFT_RIGHT: &str = "softright";

/// Transport to one motor controller card
pub trait ControllerBus: Send + Sync {
    /// Controller instance name
    fn name(&self) -> &str;

    /// True once the controller is connected and initialised
    fn is_ready(&self) -> bool;

    /// Router publishing raw variable-change and error events
    fn events(&self) -> &BusRouter;

    /// True if the controller drives an axis with this index
    fn has_device(&self, _index: u32) -> bool {
        true
    }

    /// Read the cached value of a `name$index` variable
    fn get_variable(&self, key: &str) -> Result<Value, TransportError>;

    /// Write a `name$index` variable
    fn set_variable(&self, key: &str, value: Value) -> Result<(), TransportError>;

    /// Ask the controller to re-read a variable; the fresh value arrives as an event
    fn refresh_variable(&self, key: &str) -> Result<(), TransportError>;

    /// Start moving an axis to an absolute position
    fn move_to(&self, index: u32, position: f64) -> Result<(), TransportError>;

    /// Start moving an axis by a relative amount
    fn move_relative(&self, index: u32, delta: f64) -> Result<(), TransportError>;

    /// Start stopping an axis
    fn stop(&self, index: u32) -> Result<(), TransportError>;

    /// Redefine the current position of an axis
    fn calibrate(&self, index: u32, position: f64) -> Result<(), TransportError>;

    /// Decode the driver error bit field of this card
    fn decode_error_flags(&self, flags: i64) -> Vec<&'static str>;

    /// Actual position of an axis
    fn where_is(&self, index: u32) -> Result<f64, TransportError> {
        read_f64(self, &key(ACTUAL_POSITION, index))
    }

    /// Soft limits `(left, right)` of an axis
    fn get_limits(&self, index: u32) -> Result<(f64, f64), TransportError> {
        Ok((
            read_f64(self, &key(SOFT_LEFT, index))?,
            read_f64(self, &key(SOFT_RIGHT, index))?,
        ))
    }

    /// True if `position` lies within the soft limits of an axis
    fn check_limits(&self, index: u32, position: f64) -> Result<bool, TransportError> {
        let (left, right) = self.get_limits(index)?;
        Ok(position >= left && position <= right)
    }
}

/// Encode a key for one of the well-known variables
pub(crate) fn key(name: &str, index: u32) -> String {
    format!("{}{}{}", name, credo_core::topic::SEPARATOR, index)
}

/// Read a variable that must be numeric
pub fn read_f64<B: ControllerBus + ?Sized>(bus: &B, key: &str) -> Result<f64, TransportError> {
    let value = bus.get_variable(key)?;
    value.as_f64().ok_or_else(|| type_mismatch(key, "float", &value))
}

/// Read a variable that must be an integer
pub fn read_i64<B: ControllerBus + ?Sized>(bus: &B, key: &str) -> Result<i64, TransportError> {
    let value = bus.get_variable(key)?;
    value.as_i64().ok_or_else(|| type_mismatch(key, "int", &value))
}

/// Read a variable that must be a flag
pub fn read_bool<B: ControllerBus + ?Sized>(bus: &B, key: &str) -> Result<bool, TransportError> {
    let value = bus.get_variable(key)?;
    value.as_bool().ok_or_else(|| type_mismatch(key, "bool", &value))
}

fn type_mismatch(key: &str, expected: &str, actual: &Value) -> TransportError {
    TransportError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}
