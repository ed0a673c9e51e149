use std::path::PathBuf;

use anyhow::Context;
use credo::{init_logging, DeviceEvent, Instrument, InstrumentConfig, BUILD_DATE, VERSION};

/// Motor driven by the demo
const DEMO_MOTOR: &str = "Sample_X";

fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::info!(version = VERSION, build_date = BUILD_DATE, "credo-sim starting");

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => InstrumentConfig::load_from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => InstrumentConfig::default(),
    };

    let instrument = Instrument::simulated(&config)?;
    let motor = instrument
        .motor(DEMO_MOTOR)
        .or_else(|| instrument.motors().first())
        .context("Configuration has no motors")?;
    let controller = instrument
        .controller(motor.controller_name())
        .context("Motor controller missing")?;

    let name = motor.name().to_string();
    motor.subscribe_all(move |event| match event {
        DeviceEvent::PositionChange { value } => {
            tracing::info!(motor = %name, position = value, "Position changed")
        }
        DeviceEvent::Stop { target_reached } => {
            tracing::info!(motor = %name, target_reached, "Motor stopped")
        }
        DeviceEvent::VariableChange { name: variable, value } => {
            tracing::debug!(motor = %name, variable = %variable, value = %value, "Variable changed")
        }
        DeviceEvent::Error { name: variable, cause, .. } => {
            tracing::warn!(motor = %name, variable = %variable, "Error reported: {}", cause)
        }
    });

    let (left, right) = motor.get_limits()?;
    let target = (left + right) / 2.0 + (right - left) / 4.0;

    motor.move_to(target)?;
    controller.complete_move(motor.index())?;

    motor.move_relative(-(right - left) / 8.0)?;
    motor.stop()?;
    controller.complete_move(motor.index())?;

    controller.emit_error(
        &format!("drivererror${}", motor.index()),
        "simulated read timeout",
        "",
    );

    tracing::info!(
        motor = %motor.name(),
        position = motor.where_is()?,
        events = motor.stats().events_emitted,
        "Demo finished"
    );

    instrument.shutdown()?;
    Ok(())
}
