//! # CREDO
//!
//! Device-variable change-notification relay for the motor controllers of
//! the CREDO SAXS instrument.
//!
//! ## Architecture
//!
//! The workspace is organized in two crates:
//!
//! 1. **credo-core** - Event router, topic key codec, values, errors
//! 2. **credo-devices** - Controller bus trait, simulated controller,
//!    per-device proxies, instrument configuration
//!
//! A controller publishes every variable change under a `name$index` key.
//! Each [`DeviceProxy`] listens to its controller, keeps the events that
//! carry its own index, and republishes them as position, stop, variable
//! and error events for its own subscribers.

pub use credo_core::{router, topic, value};
pub use credo_core::{
    ConfigError, DeviceError, DeviceEvent, DeviceTopic, Error, EventRouter, Result, RouterConfig,
    RouterError, SubscriptionId, TopicError, TopicKey, TransportError, Value,
};

pub use credo_devices::{
    bus, BusCommand, ControllerBus, ControllerConfig, DeviceProxy, DriverModel, Instrument,
    InstrumentConfig, MotorConfig, ProxyStats, SimulatedBus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Environment variable selecting the log output format (`pretty` or `json`)
pub const LOG_FORMAT_ENV: &str = "CREDO_LOG_FORMAT";

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output, pretty by default or JSON lines when
///   `CREDO_LOG_FORMAT=json`
/// - RUST_LOG environment variable support, `info` otherwise
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_ids(true)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
