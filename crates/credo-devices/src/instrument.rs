//! Motor registry
//!
//! Builds one controller bus per configured card and one [`DeviceProxy`]
//! per configured motor, and looks motors up by name.

use std::sync::Arc;

use credo_core::{DeviceError, Error, Result};

use crate::bus::{ControllerBus, SimulatedBus};
use crate::config::{InstrumentConfig, MotorConfig};
use crate::device::DeviceProxy;

/// Controllers and motors of the instrument
#[derive(Debug)]
pub struct Instrument {
    controllers: Vec<Arc<SimulatedBus>>,
    motors: Vec<DeviceProxy>,
}

impl Instrument {
    /// Build the instrument on simulated controllers
    pub fn simulated(config: &InstrumentConfig) -> Result<Self> {
        config.validate()?;

        let controllers: Vec<Arc<SimulatedBus>> = config
            .controllers
            .iter()
            .map(|c| {
                Arc::new(SimulatedBus::with_router_config(
                    c.name.clone(),
                    c.model,
                    config.router.clone(),
                ))
            })
            .collect();

        let mut motors = Vec::with_capacity(config.motors.len());
        for motor in &config.motors {
            let bus = controller_of(&controllers, motor)?;
            bus.configure_axis(motor.index, motor.position, motor.soft_left, motor.soft_right)
                .map_err(DeviceError::from)?;
            motors.push(DeviceProxy::with_router_config(
                bus.clone(),
                motor.index,
                motor.name.clone(),
                config.router.clone(),
            )?);
        }

        tracing::info!(
            controllers = controllers.len(),
            motors = motors.len(),
            "Simulated instrument ready"
        );
        Ok(Self {
            controllers,
            motors,
        })
    }

    /// Find a motor by name
    pub fn motor(&self, name: &str) -> Option<&DeviceProxy> {
        self.motors.iter().find(|m| m.name() == name)
    }

    /// All motors, in configuration order
    pub fn motors(&self) -> &[DeviceProxy] {
        &self.motors
    }

    /// Find a controller by name
    pub fn controller(&self, name: &str) -> Option<&Arc<SimulatedBus>> {
        self.controllers.iter().find(|c| c.name() == name)
    }

    /// Names of the motors currently moving
    pub fn moving_motors(&self) -> Vec<&str> {
        self.motors
            .iter()
            .filter(|m| m.is_moving())
            .map(|m| m.name())
            .collect()
    }

    /// Tear down every motor proxy
    ///
    /// Tears down all motors even if some fail, returning the first failure.
    pub fn shutdown(self) -> Result<()> {
        let mut first_error = None;
        for motor in &self.motors {
            if let Err(err) = motor.teardown() {
                tracing::error!(motor = %motor.name(), "Teardown failed: {}", err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

fn controller_of<'a>(
    controllers: &'a [Arc<SimulatedBus>],
    motor: &MotorConfig,
) -> Result<&'a Arc<SimulatedBus>> {
    controllers
        .iter()
        .find(|bus| bus.name() == motor.controller)
        .ok_or_else(|| {
            Error::other(format!(
                "Motor {} references unknown controller {}",
                motor.name, motor.controller
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_instrument() {
        let instrument = Instrument::simulated(&InstrumentConfig::default()).unwrap();
        assert_eq!(instrument.motors().len(), 12);

        let motor = instrument.motor("PH2Y").unwrap();
        assert_eq!(motor.controller_name(), "tmcm6110");
        assert_eq!(motor.index(), 3);

        let bus = instrument.controller("tmcm351a").unwrap();
        assert_eq!(bus.events().subscriber_count(), 6);

        instrument.shutdown().unwrap();
    }

    #[test]
    fn test_configured_position_and_limits() {
        let mut config = InstrumentConfig::default();
        config.motors[1].position = 12.0;
        config.motors[1].soft_left = -20.0;
        config.motors[1].soft_right = 40.0;

        let instrument = Instrument::simulated(&config).unwrap();
        let motor = instrument.motor("Sample_X").unwrap();
        assert_eq!(motor.where_is().unwrap(), 12.0);
        assert_eq!(motor.get_limits().unwrap(), (-20.0, 40.0));
        instrument.shutdown().unwrap();
    }

    #[test]
    fn test_moving_motors() {
        let instrument = Instrument::simulated(&InstrumentConfig::default()).unwrap();
        instrument.motor("BeamStop_Y").unwrap().move_to(5.0).unwrap();
        assert_eq!(instrument.moving_motors(), vec!["BeamStop_Y"]);

        instrument.controller("tmcm351b").unwrap().complete_move(1).unwrap();
        assert!(instrument.moving_motors().is_empty());
        instrument.shutdown().unwrap();
    }

    #[test]
    fn test_missing_controller_is_named() {
        let config = InstrumentConfig::default();
        let err = controller_of(&[], &config.motors[0]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Motor Unknown1 references unknown controller tmcm351a"
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = InstrumentConfig::default();
        config.motors[0].index = 9;
        let err = Instrument::simulated(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
