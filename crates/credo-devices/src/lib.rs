//! # CREDO Devices
//!
//! Motor controller access for the CREDO instrument.
//! Defines the controller bus interface, an in-memory simulated controller,
//! the per-motor device proxy that demultiplexes controller events, and the
//! instrument configuration that ties motors to controller axes.

pub mod bus;
pub mod config;
pub mod device;
pub mod driver;
pub mod instrument;

pub use bus::{BusCommand, ControllerBus, SimulatedBus};
pub use config::{ControllerConfig, InstrumentConfig, MotorConfig};
pub use device::{DeviceProxy, ProxyStats};
pub use driver::DriverModel;
pub use instrument::Instrument;
