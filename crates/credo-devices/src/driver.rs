//! Motor controller card models
//!
//! The instrument uses Trinamic TMCM cards. Models differ in the number of
//! axes and in the meaning of the driver error bit field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported motor controller cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverModel {
    /// Three-axis card
    Tmcm351,
    /// Six-axis card
    Tmcm6110,
}

const TMCM351_FLAGS: [&str; 8] = [
    "Overcurrent bridge A low side",
    "Overcurrent bridge B low side",
    "Open load bridge A",
    "Open load bridge B",
    "Overcurrent high side",
    "Driver undervoltage",
    "Temperature warning",
    "Overtemperature",
];

const TMCM6110_FLAGS: [&str; 8] = [
    "stallGuard2 threshold reached",
    "Overtemperature",
    "Pre-warning overtemperature",
    "Short to ground A",
    "Short to ground B",
    "Open load A",
    "Open load B",
    "Stand still",
];

impl DriverModel {
    /// Number of motors the card drives
    pub fn axis_count(&self) -> u32 {
        match self {
            DriverModel::Tmcm351 => 3,
            DriverModel::Tmcm6110 => 6,
        }
    }

    /// Decode the `drivererror` bit field, lowest bit first
    pub fn decode_error_flags(&self, flags: i64) -> Vec<&'static str> {
        let table = match self {
            DriverModel::Tmcm351 => &TMCM351_FLAGS,
            DriverModel::Tmcm6110 => &TMCM6110_FLAGS,
        };
        table
            .iter()
            .enumerate()
            .filter(|(bit, _)| flags & (1 << bit) != 0)
            .map(|(_, text)| *text)
            .collect()
    }
}

impl fmt::Display for DriverModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverModel::Tmcm351 => write!(f, "TMCM351"),
            DriverModel::Tmcm6110 => write!(f, "TMCM6110"),
        }
    }
}
