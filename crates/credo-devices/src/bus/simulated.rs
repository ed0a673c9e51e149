//! In-memory controller bus
//!
//! Behaves like a TMCM card seen through its variable table: every changed
//! variable is published as a raw event, moves are refused outside the
//! soft limits or while another axis is moving, and motions complete only
//! when [`SimulatedBus::complete_move`] is called. Used by the tests and
//! by the `credo-sim` binary.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use credo_core::router::{BusEvent, BusRouter, BusTopic, RouterConfig};
use credo_core::{TransportError, Value};

use super::{
    key, read_f64, ControllerBus, ACTUAL_POSITION, ACTUAL_SPEED, DRIVER_ERROR, LEFT_SWITCH, LOAD,
    RIGHT_SWITCH, SOFT_LEFT, SOFT_RIGHT, STATUS, STATUS_IDLE, STATUS_MOVING, TARGET_POSITION,
    TARGET_REACHED,
};
use crate::driver::DriverModel;

/// Speed reported while an axis is moving, in physical units per second
const SIMULATED_SPEED: f64 = 1.0;

/// A command received by the simulated controller
#[derive(Debug, Clone, PartialEq)]
pub enum BusCommand {
    /// Absolute move
    MoveTo {
        /// Axis index.
        index: u32,
        /// Target position.
        position: f64,
    },
    /// Relative move
    MoveRelative {
        /// Axis index.
        index: u32,
        /// Requested displacement.
        delta: f64,
    },
    /// Stop request
    Stop {
        /// Axis index.
        index: u32,
    },
    /// Position redefinition
    Calibrate {
        /// Axis index.
        index: u32,
        /// New position.
        position: f64,
    },
    /// Variable write
    SetVariable {
        /// Full `name$index` key.
        key: String,
        /// Written value.
        value: Value,
    },
    /// Variable refresh
    RefreshVariable {
        /// Full `name$index` key.
        key: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    start: f64,
    target: f64,
    interrupted: bool,
}

/// Simulated motor controller card
pub struct SimulatedBus {
    name: String,
    model: DriverModel,
    ready: AtomicBool,
    variables: RwLock<HashMap<String, Value>>,
    motions: Mutex<HashMap<u32, Motion>>,
    commands: Mutex<Vec<BusCommand>>,
    next_failure: Mutex<Option<TransportError>>,
    events: BusRouter,
}

impl SimulatedBus {
    /// Create a connected controller with every axis idle at 0 and soft limits of ±100
    pub fn new(name: impl Into<String>, model: DriverModel) -> Self {
        Self::with_router_config(name, model, RouterConfig::default())
    }

    /// Create a controller whose event router uses a custom configuration
    pub fn with_router_config(
        name: impl Into<String>,
        model: DriverModel,
        config: RouterConfig,
    ) -> Self {
        let mut variables = HashMap::new();
        for index in 0..model.axis_count() {
            variables.insert(key(ACTUAL_POSITION, index), Value::Float(0.0));
            variables.insert(key(TARGET_POSITION, index), Value::Float(0.0));
            variables.insert(key(TARGET_REACHED, index), Value::Bool(true));
            variables.insert(key(STATUS, index), Value::from(STATUS_IDLE));
            variables.insert(key(ACTUAL_SPEED, index), Value::Float(0.0));
            variables.insert(key(LOAD, index), Value::Int(0));
            variables.insert(key(LEFT_SWITCH, index), Value::Bool(false));
            variables.insert(key(RIGHT_SWITCH, index), Value::Bool(false));
            variables.insert(key(DRIVER_ERROR, index), Value::Int(0));
            variables.insert(key(SOFT_LEFT, index), Value::Float(-100.0));
            variables.insert(key(SOFT_RIGHT, index), Value::Float(100.0));
        }

        Self {
            name: name.into(),
            model,
            ready: AtomicBool::new(true),
            variables: RwLock::new(variables),
            motions: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            next_failure: Mutex::new(None),
            events: BusRouter::with_config(config),
        }
    }

    /// Card model
    pub fn model(&self) -> DriverModel {
        self.model
    }

    /// Set position and soft limits of an axis without recording a command
    pub fn configure_axis(
        &self,
        index: u32,
        position: f64,
        soft_left: f64,
        soft_right: f64,
    ) -> Result<(), TransportError> {
        self.ensure_axis(index)?;
        self.store(key(SOFT_LEFT, index), Value::Float(soft_left));
        self.store(key(SOFT_RIGHT, index), Value::Float(soft_right));
        self.store(key(ACTUAL_POSITION, index), Value::Float(position));
        self.store(key(TARGET_POSITION, index), Value::Float(position));
        Ok(())
    }

    /// Mark the controller connected or disconnected
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
        tracing::info!(controller = %self.name, ready, "Controller readiness changed");
    }

    /// Make the next command fail with `error`
    pub fn fail_next_command(&self, error: TransportError) {
        *self.next_failure.lock() = Some(error);
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<BusCommand> {
        self.commands.lock().clone()
    }

    /// True if an axis has a motion in progress
    pub fn is_axis_moving(&self, index: u32) -> bool {
        self.motions.lock().contains_key(&index)
    }

    /// Finish the motion of an axis
    ///
    /// Publishes the final position, the target-reached flag, and finally
    /// `_status = idle`, in that order. A stopped motion ends halfway with
    /// the target not reached.
    pub fn complete_move(&self, index: u32) -> Result<(), TransportError> {
        let motion = self
            .motions
            .lock()
            .remove(&index)
            .ok_or_else(|| TransportError::CommandRejected {
                reason: format!("device {} of {} is not moving", index, self.name),
            })?;

        let (position, reached) = if motion.interrupted {
            ((motion.start + motion.target) / 2.0, false)
        } else {
            (motion.target, true)
        };

        self.store(key(ACTUAL_POSITION, index), Value::Float(position));
        self.store(key(ACTUAL_SPEED, index), Value::Float(0.0));
        self.store(key(TARGET_REACHED, index), Value::Bool(reached));
        self.store(key(STATUS, index), Value::from(STATUS_IDLE));
        tracing::debug!(controller = %self.name, index, position, reached, "Motion finished");
        Ok(())
    }

    /// Publish an error for a variable, as the card backend does when a query fails
    pub fn emit_error(&self, key: &str, cause: impl Into<String>, trace: impl Into<String>) {
        self.events.publish(
            BusTopic::Error,
            BusEvent::Error {
                key: key.to_string(),
                cause: cause.into(),
                trace: trace.into(),
            },
        );
    }

    /// Publish a raw variable change without touching the variable table
    pub fn emit_raw(&self, key: &str, value: Value) {
        self.events.publish(
            BusTopic::VariableChange,
            BusEvent::VariableChange {
                key: key.to_string(),
                value,
            },
        );
    }

    /// Update a variable and publish the change
    fn store(&self, key: String, value: Value) {
        let changed = {
            let mut variables = self.variables.write();
            match variables.get(&key) {
                Some(old) if *old == value => false,
                _ => {
                    variables.insert(key.clone(), value.clone());
                    true
                }
            }
        };
        // Publish with the table unlocked: subscribers read variables back
        if changed {
            self.emit_raw(&key, value);
        }
    }

    fn record(&self, command: BusCommand) -> Result<(), TransportError> {
        if let Some(error) = self.next_failure.lock().take() {
            tracing::warn!(controller = %self.name, ?command, "Injected failure: {}", error);
            return Err(error);
        }
        if !self.ready.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected {
                controller: self.name.clone(),
            });
        }
        tracing::debug!(controller = %self.name, ?command, "Command accepted");
        self.commands.lock().push(command);
        Ok(())
    }

    fn ensure_axis(&self, index: u32) -> Result<(), TransportError> {
        if index < self.model.axis_count() {
            Ok(())
        } else {
            Err(TransportError::UnknownDevice { index })
        }
    }

    fn ensure_known(&self, key: &str) -> Result<(), TransportError> {
        if self.variables.read().contains_key(key) {
            Ok(())
        } else {
            Err(TransportError::UnknownVariable {
                key: key.to_string(),
            })
        }
    }

    fn start_motion(&self, index: u32, target: f64) -> Result<(), TransportError> {
        {
            let mut motions = self.motions.lock();
            if let Some(busy) = motions.keys().next() {
                return Err(TransportError::Busy {
                    reason: format!("device {} of {} is moving", busy, self.name),
                });
            }
            let (left, right) = self.get_limits(index)?;
            if target < left || target > right {
                return Err(TransportError::LimitViolation {
                    index,
                    position: target,
                    left,
                    right,
                });
            }
            motions.insert(
                index,
                Motion {
                    start: self.where_is(index)?,
                    target,
                    interrupted: false,
                },
            );
        }

        self.store(key(TARGET_POSITION, index), Value::Float(target));
        self.store(key(TARGET_REACHED, index), Value::Bool(false));
        self.store(key(ACTUAL_SPEED, index), Value::Float(SIMULATED_SPEED));
        self.store(key(STATUS, index), Value::from(STATUS_MOVING));
        Ok(())
    }
}

impl ControllerBus for SimulatedBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn events(&self) -> &BusRouter {
        &self.events
    }

    fn has_device(&self, index: u32) -> bool {
        index < self.model.axis_count()
    }

    fn get_variable(&self, key: &str) -> Result<Value, TransportError> {
        self.variables
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::UnknownVariable {
                key: key.to_string(),
            })
    }

    fn set_variable(&self, key: &str, value: Value) -> Result<(), TransportError> {
        self.ensure_known(key)?;
        self.record(BusCommand::SetVariable {
            key: key.to_string(),
            value: value.clone(),
        })?;
        self.store(key.to_string(), value);
        Ok(())
    }

    fn refresh_variable(&self, key: &str) -> Result<(), TransportError> {
        self.ensure_known(key)?;
        self.record(BusCommand::RefreshVariable {
            key: key.to_string(),
        })?;
        // A refresh always reports, even when the value is unchanged
        let value = self.get_variable(key)?;
        self.emit_raw(key, value);
        Ok(())
    }

    fn move_to(&self, index: u32, position: f64) -> Result<(), TransportError> {
        self.ensure_axis(index)?;
        self.record(BusCommand::MoveTo { index, position })?;
        self.start_motion(index, position)
    }

    fn move_relative(&self, index: u32, delta: f64) -> Result<(), TransportError> {
        self.ensure_axis(index)?;
        self.record(BusCommand::MoveRelative { index, delta })?;
        let target = read_f64(self, &key(ACTUAL_POSITION, index))? + delta;
        self.start_motion(index, target)
    }

    fn stop(&self, index: u32) -> Result<(), TransportError> {
        self.ensure_axis(index)?;
        self.record(BusCommand::Stop { index })?;
        if let Some(motion) = self.motions.lock().get_mut(&index) {
            motion.interrupted = true;
        }
        Ok(())
    }

    fn calibrate(&self, index: u32, position: f64) -> Result<(), TransportError> {
        self.ensure_axis(index)?;
        self.record(BusCommand::Calibrate { index, position })?;
        if self.is_axis_moving(index) {
            return Err(TransportError::Busy {
                reason: format!("cannot calibrate moving device {} of {}", index, self.name),
            });
        }
        if !self.check_limits(index, position)? {
            let (left, right) = self.get_limits(index)?;
            return Err(TransportError::LimitViolation {
                index,
                position,
                left,
                right,
            });
        }
        self.store(key(ACTUAL_POSITION, index), Value::Float(position));
        self.store(key(TARGET_POSITION, index), Value::Float(position));
        Ok(())
    }

    fn decode_error_flags(&self, flags: i64) -> Vec<&'static str> {
        self.model.decode_error_flags(flags)
    }
}

impl std::fmt::Debug for SimulatedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBus")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("ready", &self.is_ready())
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bus() -> SimulatedBus {
        SimulatedBus::new("tmcm351a", DriverModel::Tmcm351)
    }

    #[test]
    fn test_initial_variables() {
        let bus = bus();
        assert_eq!(bus.get_variable("_status$2").unwrap(), Value::from("idle"));
        assert_eq!(bus.where_is(0).unwrap(), 0.0);
        assert_eq!(bus.get_limits(1).unwrap(), (-100.0, 100.0));
        assert!(matches!(
            bus.get_variable("_status$3"),
            Err(TransportError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_move_and_complete() {
        let bus = bus();
        bus.move_to(1, 25.0).unwrap();
        assert!(bus.is_axis_moving(1));
        assert_eq!(bus.get_variable("_status$1").unwrap(), Value::from("moving"));
        assert_eq!(bus.get_variable("targetpositionreached$1").unwrap(), Value::Bool(false));

        bus.complete_move(1).unwrap();
        assert!(!bus.is_axis_moving(1));
        assert_eq!(bus.where_is(1).unwrap(), 25.0);
        assert_eq!(bus.get_variable("targetpositionreached$1").unwrap(), Value::Bool(true));
        assert_eq!(
            bus.commands(),
            vec![BusCommand::MoveTo {
                index: 1,
                position: 25.0
            }]
        );
    }

    #[test]
    fn test_move_relative() {
        let bus = bus();
        bus.configure_axis(0, 10.0, -50.0, 50.0).unwrap();
        bus.move_relative(0, -4.0).unwrap();
        bus.complete_move(0).unwrap();
        assert_eq!(bus.where_is(0).unwrap(), 6.0);
    }

    #[test]
    fn test_stop_interrupts_motion() {
        let bus = bus();
        bus.move_to(2, 40.0).unwrap();
        bus.stop(2).unwrap();
        bus.complete_move(2).unwrap();
        assert_eq!(bus.where_is(2).unwrap(), 20.0);
        assert_eq!(bus.get_variable("targetpositionreached$2").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_move_outside_soft_limits() {
        let bus = bus();
        let err = bus.move_to(0, 150.0).unwrap_err();
        assert_eq!(
            err,
            TransportError::LimitViolation {
                index: 0,
                position: 150.0,
                left: -100.0,
                right: 100.0
            }
        );
        assert!(!bus.is_axis_moving(0));
    }

    #[test]
    fn test_one_motion_at_a_time() {
        let bus = bus();
        bus.move_to(0, 1.0).unwrap();
        assert!(matches!(bus.move_to(1, 1.0), Err(TransportError::Busy { .. })));
    }

    #[test]
    fn test_unknown_axis() {
        let bus = bus();
        assert_eq!(
            bus.move_to(3, 0.0),
            Err(TransportError::UnknownDevice { index: 3 })
        );
        assert!(!bus.has_device(3));
    }

    #[test]
    fn test_injected_failure_applies_once() {
        let bus = bus();
        bus.fail_next_command(TransportError::Other {
            message: "link down".to_string(),
        });
        assert!(bus.stop(0).is_err());
        assert!(bus.stop(0).is_ok());
        assert_eq!(bus.commands(), vec![BusCommand::Stop { index: 0 }]);
    }

    #[test]
    fn test_not_ready() {
        let bus = bus();
        bus.set_ready(false);
        assert!(matches!(
            bus.move_to(0, 1.0),
            Err(TransportError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_calibrate() {
        let bus = bus();
        bus.calibrate(0, 12.5).unwrap();
        assert_eq!(bus.where_is(0).unwrap(), 12.5);
        assert!(bus.calibrate(0, 500.0).is_err());
    }

    #[test]
    fn test_store_publishes_only_changes() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.events().subscribe(BusTopic::VariableChange, move |event| {
            s.lock().push(event.key().to_string());
        });

        bus.set_variable("load$0", Value::Int(0)).unwrap();
        assert!(seen.lock().is_empty());

        bus.set_variable("load$0", Value::Int(5)).unwrap();
        assert_eq!(*seen.lock(), vec!["load$0".to_string()]);

        bus.refresh_variable("load$0").unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_check_limits() {
        let bus = bus();
        bus.configure_axis(1, 0.0, -5.0, 5.0).unwrap();
        assert!(bus.check_limits(1, 5.0).unwrap());
        assert!(!bus.check_limits(1, 5.1).unwrap());
    }
}
