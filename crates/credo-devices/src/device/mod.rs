//! Device proxies
//!
//! A controller card drives several motors and reports every variable of
//! every motor on one event stream. [`DeviceProxy`] turns that shared
//! stream into one event source per motor.
//!
//! ## Motion state
//!
//! ```text
//!            move_to / move_relative
//!   Idle  ---------------------------->  Moving
//!    ^                                     |
//!    |      _status$<index> == "idle"      |
//!    +-------------------------------------+
//!               (emits Stop)
//! ```
//!
//! There is no timeout transition: a motion that never reports idle keeps
//! the proxy in `Moving`.

mod proxy;

pub use proxy::{DeviceProxy, ProxyStats};
