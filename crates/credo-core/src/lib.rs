//! # CREDO Core
//!
//! Core types for the CREDO device relay.
//! Provides the event router, the event and value types that flow through
//! it, the `name$index` topic key codec, and the error taxonomy.

pub mod error;
pub mod router;
pub mod topic;
pub mod value;

pub use error::{ConfigError, DeviceError, Error, Result, RouterError, TopicError, TransportError};

pub use router::{
    BusEvent, BusRouter, BusTopic, DeviceEvent, DeviceRouter, DeviceTopic, DispatchReport,
    Envelope, EventRouter, RouterConfig, SubscriptionId, TopicFilter,
};

pub use topic::TopicKey;
pub use value::Value;
