//! Per-device proxy over a shared controller bus

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use credo_core::router::{
    BusEvent, BusTopic, DeviceEvent, DeviceRouter, DeviceTopic, RouterConfig, SubscriptionId,
    TopicFilter,
};
use credo_core::{topic, DeviceError, RouterError, TopicKey, TransportError, Value};

use crate::bus::{
    read_bool, read_f64, read_i64, ControllerBus, ACTUAL_POSITION, ACTUAL_SPEED, DRIVER_ERROR,
    LEFT_SWITCH, LOAD, RIGHT_SWITCH, STATUS, STATUS_IDLE, TARGET_REACHED,
};

/// Snapshot of the diagnostic counters of a proxy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Raw keys that could not be parsed as `name$index`.
    pub malformed_keys: u64,
    /// Raw keys addressed to another device of the same controller.
    pub foreign_keys: u64,
    /// Device events published to local subscribers.
    pub events_emitted: u64,
}

#[derive(Default)]
struct Counters {
    malformed_keys: AtomicU64,
    foreign_keys: AtomicU64,
    events_emitted: AtomicU64,
}

/// State shared between the proxy and its bus subscriptions
struct ProxyInner {
    name: String,
    index: u32,
    bus: Arc<dyn ControllerBus>,
    moving: AtomicBool,
    events: DeviceRouter,
    counters: Counters,
}

impl ProxyInner {
    fn key(&self, name: &str) -> Result<String, DeviceError> {
        Ok(TopicKey::new(name, self.index)?.to_string())
    }

    /// Parse a raw key and check that it addresses this device
    fn address(&self, raw_name: &str) -> Result<TopicKey, DeviceError> {
        let key = TopicKey::parse(raw_name).inspect_err(|_| self.count_malformed())?;
        self.check_index(key.index())?;
        Ok(key)
    }

    /// Like `address`, but only the index suffix has to be valid
    fn address_error<'a>(&self, raw_name: &'a str) -> Result<&'a str, DeviceError> {
        let (name, index) = topic::split(raw_name).inspect_err(|_| self.count_malformed())?;
        self.check_index(index)?;
        Ok(name)
    }

    fn check_index(&self, index: u32) -> Result<(), DeviceError> {
        if index != self.index {
            self.counters.foreign_keys.fetch_add(1, Ordering::Relaxed);
            return Err(DeviceError::NotForThisDevice {
                expected: self.index,
                actual: index,
            });
        }
        Ok(())
    }

    fn count_malformed(&self) {
        self.counters.malformed_keys.fetch_add(1, Ordering::Relaxed);
    }

    fn emit(&self, event: DeviceEvent) {
        self.counters.events_emitted.fetch_add(1, Ordering::Relaxed);
        self.events.publish(event.topic(), event);
    }

    fn on_bus_variable_change(&self, raw_name: &str, value: &Value) -> Result<(), DeviceError> {
        let key = self.address(raw_name)?;
        let name = key.name();

        if name == STATUS
            && *value == STATUS_IDLE
            && self
                .moving
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let target_reached = self.target_reached();
            tracing::debug!(device = %self.name, index = self.index, target_reached, "Motion finished");
            self.emit(DeviceEvent::Stop { target_reached });
        }

        if name == ACTUAL_POSITION {
            match value.as_f64() {
                Some(position) => self.emit(DeviceEvent::PositionChange { value: position }),
                None => tracing::warn!(
                    device = %self.name,
                    index = self.index,
                    "Non-numeric actual position '{}' ignored",
                    value
                ),
            }
        }

        self.emit(DeviceEvent::VariableChange {
            name: key.into_name(),
            value: value.clone(),
        });
        Ok(())
    }

    fn on_bus_error(&self, raw_name: &str, cause: &str, trace: &str) -> Result<(), DeviceError> {
        let name = self.address_error(raw_name)?;
        tracing::error!(
            controller = %self.bus.name(),
            device = %self.name,
            index = self.index,
            variable = %name,
            "Motor ({}:#{}) error: Variable: {}. Exception: {}\n{}",
            self.bus.name(),
            self.index,
            name,
            cause,
            trace
        );
        self.emit(DeviceEvent::Error {
            name: name.to_string(),
            cause: cause.to_string(),
            trace: trace.to_string(),
        });
        Ok(())
    }

    fn target_reached(&self) -> bool {
        let result = self
            .key(TARGET_REACHED)
            .and_then(|key| read_bool(self.bus.as_ref(), &key).map_err(DeviceError::from));
        match result {
            Ok(reached) => reached,
            Err(err) => {
                tracing::warn!(
                    device = %self.name,
                    index = self.index,
                    "Cannot read {}, reporting target not reached: {}",
                    TARGET_REACHED,
                    err
                );
                false
            }
        }
    }

    fn handle_bus_event(&self, event: &BusEvent) {
        let result = match event {
            BusEvent::VariableChange { key, value } => self.on_bus_variable_change(key, value),
            BusEvent::Error { key, cause, trace } => self.on_bus_error(key, cause, trace),
        };
        match result {
            Ok(()) | Err(DeviceError::NotForThisDevice { .. }) => {}
            Err(DeviceError::Topic(err)) => {
                tracing::trace!(device = %self.name, "Dropping unaddressed event: {}", err)
            }
            Err(err) => tracing::warn!(device = %self.name, "Event handling failed: {}", err),
        }
    }
}

/// One motor of a shared controller, seen as its own event source
///
/// Subscribes to the controller's raw `variable-change` and `error` topics
/// at construction, keeps only the events whose key carries this device's
/// index, and republishes them as [`DeviceEvent`]s. Commands are forwarded
/// to the controller with the device index filled in.
///
/// Call [`DeviceProxy::teardown`] exactly once when the device is no longer
/// needed. A proxy dropped without teardown releases its subscriptions
/// itself and logs a warning.
pub struct DeviceProxy {
    inner: Arc<ProxyInner>,
    subscriptions: Mutex<Option<[SubscriptionId; 2]>>,
}

impl DeviceProxy {
    /// Create a proxy for device `index` of `bus`
    pub fn new(
        bus: Arc<dyn ControllerBus>,
        index: u32,
        name: impl Into<String>,
    ) -> Result<Self, DeviceError> {
        Self::with_router_config(bus, index, name, RouterConfig::default())
    }

    /// Create a proxy whose local event router uses a custom configuration
    pub fn with_router_config(
        bus: Arc<dyn ControllerBus>,
        index: u32,
        name: impl Into<String>,
        config: RouterConfig,
    ) -> Result<Self, DeviceError> {
        if !bus.has_device(index) {
            return Err(TransportError::UnknownDevice { index }.into());
        }

        let inner = Arc::new(ProxyInner {
            name: name.into(),
            index,
            bus,
            moving: AtomicBool::new(false),
            events: DeviceRouter::with_config(config),
            counters: Counters::default(),
        });

        let subscriptions = [BusTopic::VariableChange, BusTopic::Error].map(|topic| {
            let weak: Weak<ProxyInner> = Arc::downgrade(&inner);
            inner.bus.events().subscribe(topic, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_bus_event(event);
                }
            })
        });

        tracing::debug!(
            controller = %inner.bus.name(),
            device = %inner.name,
            index,
            "Device proxy attached"
        );

        Ok(Self {
            inner,
            subscriptions: Mutex::new(Some(subscriptions)),
        })
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Device index on the controller
    pub fn index(&self) -> u32 {
        self.inner.index
    }

    /// Name of the controller this device belongs to
    pub fn controller_name(&self) -> &str {
        self.inner.bus.name()
    }

    /// True if the controller is connected and initialised
    pub fn is_ready(&self) -> bool {
        self.inner.bus.is_ready()
    }

    /// True between a move command and the idle status that ends it
    pub fn is_moving(&self) -> bool {
        self.inner.moving.load(Ordering::Acquire)
    }

    /// Handle a raw variable change from the controller
    ///
    /// Returns `Err` with [`DeviceError::Topic`] or
    /// [`DeviceError::NotForThisDevice`] when the key does not address this
    /// device; the event is then dropped.
    pub fn on_bus_variable_change(&self, raw_name: &str, value: &Value) -> Result<(), DeviceError> {
        self.inner.on_bus_variable_change(raw_name, value)
    }

    /// Handle a raw error from the controller
    pub fn on_bus_error(&self, raw_name: &str, cause: &str, trace: &str) -> Result<(), DeviceError> {
        self.inner.on_bus_error(raw_name, cause, trace)
    }

    /// Start moving to an absolute position
    pub fn move_to(&self, position: f64) -> Result<(), DeviceError> {
        self.start_motion(|bus, index| bus.move_to(index, position))
    }

    /// Start moving by a relative amount
    pub fn move_relative(&self, delta: f64) -> Result<(), DeviceError> {
        self.start_motion(|bus, index| bus.move_relative(index, delta))
    }

    fn start_motion<F>(&self, command: F) -> Result<(), DeviceError>
    where
        F: FnOnce(&dyn ControllerBus, u32) -> Result<(), TransportError>,
    {
        let was_moving = self.inner.moving.swap(true, Ordering::AcqRel);
        if let Err(err) = command(self.inner.bus.as_ref(), self.inner.index) {
            // A motion already in progress still ends with its own idle status
            self.inner.moving.store(was_moving, Ordering::Release);
            return Err(err.into());
        }
        Ok(())
    }

    /// Ask the controller to stop this device
    pub fn stop(&self) -> Result<(), DeviceError> {
        Ok(self.inner.bus.stop(self.inner.index)?)
    }

    /// Redefine the current position
    pub fn calibrate(&self, position: f64) -> Result<(), DeviceError> {
        Ok(self.inner.bus.calibrate(self.inner.index, position)?)
    }

    /// Actual position
    pub fn where_is(&self) -> Result<f64, DeviceError> {
        Ok(self.inner.bus.where_is(self.inner.index)?)
    }

    /// Soft limits `(left, right)`
    pub fn get_limits(&self) -> Result<(f64, f64), DeviceError> {
        Ok(self.inner.bus.get_limits(self.inner.index)?)
    }

    /// True if `position` lies within the soft limits
    pub fn check_limits(&self, position: f64) -> Result<bool, DeviceError> {
        Ok(self.inner.bus.check_limits(self.inner.index, position)?)
    }

    /// Read a variable of this device
    pub fn get_variable(&self, name: &str) -> Result<Value, DeviceError> {
        let key = self.inner.key(name)?;
        Ok(self.inner.bus.get_variable(&key)?)
    }

    /// Write a variable of this device
    pub fn set_variable(&self, name: &str, value: impl Into<Value>) -> Result<(), DeviceError> {
        let key = self.inner.key(name)?;
        Ok(self.inner.bus.set_variable(&key, value.into())?)
    }

    /// Ask the controller to re-read a variable of this device
    pub fn refresh_variable(&self, name: &str) -> Result<(), DeviceError> {
        let key = self.inner.key(name)?;
        Ok(self.inner.bus.refresh_variable(&key)?)
    }

    /// Actual speed
    pub fn speed(&self) -> Result<f64, DeviceError> {
        let key = self.inner.key(ACTUAL_SPEED)?;
        Ok(read_f64(self.inner.bus.as_ref(), &key)?)
    }

    /// Motor load
    pub fn load(&self) -> Result<f64, DeviceError> {
        let key = self.inner.key(LOAD)?;
        Ok(read_f64(self.inner.bus.as_ref(), &key)?)
    }

    /// Left limit switch state
    pub fn left_limit_switch(&self) -> Result<bool, DeviceError> {
        let key = self.inner.key(LEFT_SWITCH)?;
        Ok(read_bool(self.inner.bus.as_ref(), &key)?)
    }

    /// Right limit switch state
    pub fn right_limit_switch(&self) -> Result<bool, DeviceError> {
        let key = self.inner.key(RIGHT_SWITCH)?;
        Ok(read_bool(self.inner.bus.as_ref(), &key)?)
    }

    /// Raw driver error bit field
    pub fn error_flags(&self) -> Result<i64, DeviceError> {
        let key = self.inner.key(DRIVER_ERROR)?;
        Ok(read_i64(self.inner.bus.as_ref(), &key)?)
    }

    /// Decode a driver error bit field, reading the current one if `flags` is None
    pub fn decode_error_flags(&self, flags: Option<i64>) -> Result<Vec<&'static str>, DeviceError> {
        let flags = match flags {
            Some(flags) => flags,
            None => self.error_flags()?,
        };
        Ok(self.inner.bus.decode_error_flags(flags))
    }

    /// Subscribe to one kind of device event
    pub fn subscribe<F>(&self, topic: DeviceTopic, handler: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(topic, handler)
    }

    /// Subscribe to every device event
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_filtered(TopicFilter::All, handler)
    }

    /// Release a local subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RouterError> {
        self.inner.events.unsubscribe(id)
    }

    /// Router carrying this device's events, for async receivers and history
    pub fn events(&self) -> &DeviceRouter {
        &self.inner.events
    }

    /// Snapshot of the diagnostic counters
    pub fn stats(&self) -> ProxyStats {
        let counters = &self.inner.counters;
        ProxyStats {
            malformed_keys: counters.malformed_keys.load(Ordering::Relaxed),
            foreign_keys: counters.foreign_keys.load(Ordering::Relaxed),
            events_emitted: counters.events_emitted.load(Ordering::Relaxed),
        }
    }

    /// True once `teardown` has run
    pub fn is_torn_down(&self) -> bool {
        self.subscriptions.lock().is_none()
    }

    /// Release the controller subscriptions taken at construction
    ///
    /// A second call fails with [`DeviceError::AlreadyTornDown`].
    pub fn teardown(&self) -> Result<(), DeviceError> {
        let subscriptions =
            self.subscriptions
                .lock()
                .take()
                .ok_or_else(|| DeviceError::AlreadyTornDown {
                    device: self.inner.name.clone(),
                })?;

        let events = self.inner.bus.events();
        let mut result = Ok(());
        for id in subscriptions {
            // Release both even if the first one fails
            if let Err(err) = events.unsubscribe(id) {
                result = Err(err.into());
            }
        }

        tracing::debug!(
            controller = %self.inner.bus.name(),
            device = %self.inner.name,
            index = self.inner.index,
            "Device proxy detached"
        );
        result
    }
}

impl Drop for DeviceProxy {
    fn drop(&mut self) {
        if self.subscriptions.get_mut().is_some() {
            tracing::warn!(
                device = %self.inner.name,
                index = self.inner.index,
                "Device proxy dropped without teardown"
            );
            if let Err(err) = self.teardown() {
                tracing::error!(device = %self.inner.name, "Teardown on drop failed: {}", err);
            }
        }
    }
}

impl fmt::Debug for DeviceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProxy")
            .field("name", &self.inner.name)
            .field("controller", &self.inner.bus.name())
            .field("index", &self.inner.index)
            .field("moving", &self.is_moving())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
