//! End-to-end run of a configured instrument on simulated controllers

use credo_core::router::DeviceEvent;
use credo_core::Value;
use credo_devices::{Instrument, InstrumentConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_configured_instrument_moves_and_reports() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credo.toml");
    let mut config = InstrumentConfig::default();
    config.motors[3].position = 2.0;
    config.save_to_file(&path).unwrap();

    let config = InstrumentConfig::load_from_file(&path).unwrap();
    let instrument = Instrument::simulated(&config).unwrap();

    let ph1x = instrument.motor("PH1X").unwrap();
    let ph1y = instrument.motor("PH1Y").unwrap();
    let seen_x = Arc::new(Mutex::new(Vec::new()));
    let seen_y = Arc::new(Mutex::new(Vec::new()));
    let (sx, sy) = (seen_x.clone(), seen_y.clone());
    ph1x.subscribe_all(move |event| sx.lock().push(event.clone()));
    ph1y.subscribe_all(move |event| sy.lock().push(event.clone()));

    assert_eq!(ph1x.where_is().unwrap(), 2.0);
    ph1x.move_relative(3.0).unwrap();
    assert_eq!(instrument.moving_motors(), vec!["PH1X"]);

    // Only one axis of a card may move at a time
    assert!(ph1y.move_to(1.0).is_err());
    assert!(!ph1y.is_moving());

    instrument
        .controller("tmcm6110")
        .unwrap()
        .complete_move(ph1x.index())
        .unwrap();

    let events = seen_x.lock().clone();
    let position = events
        .iter()
        .position(|e| *e == DeviceEvent::PositionChange { value: 5.0 })
        .expect("final position reported");
    let stop = events
        .iter()
        .position(|e| {
            *e == DeviceEvent::Stop {
                target_reached: true,
            }
        })
        .expect("stop reported");
    assert!(position < stop);
    assert_eq!(
        events.last(),
        Some(&DeviceEvent::VariableChange {
            name: "_status".to_string(),
            value: Value::from("idle"),
        })
    );
    assert!(seen_y.lock().is_empty());

    instrument.shutdown().unwrap();
}
