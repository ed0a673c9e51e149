//! # Event Router Module
//!
//! Provides the publish/subscribe mechanism shared by controller buses and
//! device proxies.
//!
//! ## Overview
//!
//! - Publishers emit typed events on a topic without knowing subscribers
//! - Subscribers register a callback for one topic, several, or all of them
//! - Callbacks run synchronously, in registration order, and a failing
//!   callback never prevents the others from running
//! - Every subscription is released explicitly through its handle
//!
//! ## Usage
//!
//! ```rust
//! use credo_core::router::{DeviceEvent, DeviceTopic, EventRouter};
//!
//! let router: EventRouter<DeviceTopic, DeviceEvent> = EventRouter::new();
//!
//! let subscription = router.subscribe(DeviceTopic::PositionChange, |event| {
//!     if let DeviceEvent::PositionChange { value } = event {
//!         println!("now at {}", value);
//!     }
//! });
//!
//! router.publish(
//!     DeviceTopic::PositionChange,
//!     DeviceEvent::PositionChange { value: 12.5 },
//! );
//!
//! router.unsubscribe(subscription).expect("released once");
//! ```

mod broker;
mod events;

pub use broker::*;
pub use events::*;

/// Router carrying raw controller events
pub type BusRouter = EventRouter<BusTopic, BusEvent>;

/// Router carrying device-scoped events
pub type DeviceRouter = EventRouter<DeviceTopic, DeviceEvent>;
