//! Event router implementation.
//!
//! Provides the generic [`EventRouter`] used by controller buses and by
//! device proxies: topic-keyed registration, ordered synchronous dispatch,
//! and explicit subscription handles.

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{ConfigError, RouterError};

/// Subscription handle for unsubscribing from a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", &self.0.simple().to_string()[..8])
    }
}

/// Selects which topics a subscription receives
#[derive(Debug, Clone, PartialEq)]
pub enum TopicFilter<T> {
    /// Receive events on every topic.
    All,
    /// Receive events on any of these topics.
    Topics(Vec<T>),
}

impl<T: PartialEq> TopicFilter<T> {
    /// Filter for a single topic
    pub fn topic(topic: T) -> Self {
        TopicFilter::Topics(vec![topic])
    }

    /// Check if a topic matches this filter
    pub fn matches(&self, topic: &T) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Topics(topics) => topics.contains(topic),
        }
    }
}

/// Configuration for an event router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Channel capacity for the async broadcast receivers.
    pub channel_capacity: usize,
    /// Whether to keep event history.
    pub enable_history: bool,
    /// Maximum number of events to retain in history.
    pub max_history_size: usize,
    /// How long to retain events in history, in milliseconds.
    pub history_retention_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            enable_history: false,
            max_history_size: 1000,
            history_retention_ms: 300_000,
        }
    }
}

impl RouterConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "router.channel_capacity".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.enable_history && self.max_history_size == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "router.max_history_size".to_string(),
                reason: "must be > 0 when history is enabled".to_string(),
            });
        }
        Ok(())
    }

    fn history_retention(&self) -> Duration {
        Duration::from_millis(self.history_retention_ms)
    }
}

/// A published event together with its topic and publication time
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T, E> {
    /// Topic the event was published on.
    pub topic: T,
    /// The event itself.
    pub event: E,
    /// Wall-clock publication time.
    pub published_at: DateTime<Utc>,
}

/// Outcome of one `publish` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that ran to completion.
    pub delivered: usize,
    /// Callbacks that panicked or returned an error.
    pub failed: usize,
}

type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

struct Registration<T, E> {
    id: SubscriptionId,
    filter: TopicFilter<T>,
    handler: Handler<E>,
    active: Arc<AtomicBool>,
}

struct TimestampedEnvelope<T, E> {
    envelope: Envelope<T, E>,
    recorded: Instant,
}

/// Ordered publish/subscribe broker
///
/// Callbacks run synchronously on the publishing thread, in registration
/// order. Dispatches on one router never overlap: a re-entrant lock
/// serialises `publish` calls coming from different threads while still
/// allowing a callback to publish again on the same router.
pub struct EventRouter<T, E> {
    /// Registered callbacks, in registration order
    registrations: RwLock<Vec<Registration<T, E>>>,
    /// Serialises dispatch across threads
    dispatch_lock: ReentrantMutex<()>,
    /// Broadcast sender for async receivers
    sender: broadcast::Sender<Envelope<T, E>>,
    /// Event history (optional)
    history: RwLock<VecDeque<TimestampedEnvelope<T, E>>>,
    config: RouterConfig,
}

impl<T, E> EventRouter<T, E>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new router with default configuration
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration
    pub fn with_config(config: RouterConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            registrations: RwLock::new(Vec::new()),
            dispatch_lock: ReentrantMutex::new(()),
            sender,
            history: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Subscribe to a single topic
    pub fn subscribe<F>(&self, topic: T, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_filtered(TopicFilter::topic(topic), handler)
    }

    /// Subscribe to every topic
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_filtered(TopicFilter::All, handler)
    }

    /// Subscribe to the topics selected by `filter`
    pub fn subscribe_filtered<F>(&self, filter: TopicFilter<T>, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(
            filter,
            Arc::new(move |event: &E| {
                handler(event);
                Ok(())
            }),
        )
    }

    /// Subscribe with a handler that may fail
    ///
    /// An `Err` is logged and counted as a failed delivery; it does not stop
    /// the remaining callbacks.
    pub fn subscribe_fallible<F>(&self, filter: TopicFilter<T>, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(filter, Arc::new(handler))
    }

    fn register(&self, filter: TopicFilter<T>, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.registrations.write().push(Registration {
            id,
            filter,
            handler,
            active: Arc::new(AtomicBool::new(true)),
        });
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Unsubscribe a handler
    ///
    /// Once this returns the handler is never invoked again. Releasing the
    /// same handle twice fails with [`RouterError::InvalidHandle`].
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RouterError> {
        // Waits for a dispatch running on another thread to finish.
        let _dispatch = self.dispatch_lock.lock();
        let mut registrations = self.registrations.write();
        let position = registrations
            .iter()
            .position(|r| r.id == id)
            .ok_or(RouterError::InvalidHandle { id })?;
        let registration = registrations.remove(position);
        registration.active.store(false, Ordering::Release);
        tracing::debug!("Subscription {} removed", id);
        Ok(())
    }

    /// Publish an event to every subscriber of `topic`
    pub fn publish(&self, topic: T, event: E) -> DispatchReport {
        let _dispatch = self.dispatch_lock.lock();

        if self.config.enable_history {
            self.add_to_history(&topic, &event);
        }

        // Snapshot so callbacks may (un)subscribe while we iterate
        let snapshot: Vec<(SubscriptionId, Handler<E>, Arc<AtomicBool>)> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.filter.matches(&topic))
            .map(|r| (r.id, r.handler.clone(), r.active.clone()))
            .collect();

        let mut report = DispatchReport::default();
        for (id, handler, active) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::error!(subscription = %id, topic = ?topic, "Subscriber failed: {:#}", err);
                }
                Err(payload) => {
                    report.failed += 1;
                    tracing::error!(
                        subscription = %id,
                        topic = ?topic,
                        "Subscriber panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        if self.sender.receiver_count() > 0 {
            // Lagging receivers see RecvError::Lagged, nothing to do here
            let _ = self.sender.send(Envelope {
                topic,
                event,
                published_at: Utc::now(),
            });
        }

        report
    }

    /// Get a receiver for async consumption
    ///
    /// Receives every event published after this call, regardless of topic.
    pub fn receiver(&self) -> broadcast::Receiver<Envelope<T, E>> {
        self.sender.subscribe()
    }

    /// Get the number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.registrations.read().len()
    }

    /// Get recent event history (if enabled)
    ///
    /// Returns events recorded since the given instant, or all history if None.
    pub fn history(&self, since: Option<Instant>) -> Vec<Envelope<T, E>> {
        if !self.config.enable_history {
            return Vec::new();
        }

        let history = self.history.read();
        history
            .iter()
            .filter(|e| since.is_none_or(|since| e.recorded >= since))
            .map(|e| e.envelope.clone())
            .collect()
    }

    /// Clear event history
    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    /// Get the current configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Add an event to history, maintaining size and age limits
    fn add_to_history(&self, topic: &T, event: &E) {
        let mut history = self.history.write();
        let now = Instant::now();

        history.push_back(TimestampedEnvelope {
            envelope: Envelope {
                topic: topic.clone(),
                event: event.clone(),
                published_at: Utc::now(),
            },
            recorded: now,
        });

        let retention = self.config.history_retention();
        while history
            .front()
            .is_some_and(|e| now.duration_since(e.recorded) > retention)
        {
            history.pop_front();
        }

        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }
}

impl<T, E> Default for EventRouter<T, E>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for EventRouter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("subscribers", &self.registrations.read().len())
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Topic {
        A,
        B,
    }

    type TestRouter = EventRouter<Topic, u32>;

    #[test]
    fn test_router_creation() {
        let router = TestRouter::new();
        assert_eq!(router.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let router = TestRouter::new();

        let id = router.subscribe(Topic::A, |_| {});
        assert_eq!(router.subscriber_count(), 1);

        assert!(router.unsubscribe(id).is_ok());
        assert_eq!(router.subscriber_count(), 0);

        // Double unsubscribe is a lifecycle error
        assert_eq!(
            router.unsubscribe(id),
            Err(RouterError::InvalidHandle { id })
        );
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let router = TestRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            router.subscribe(Topic::A, move |value| seen.lock().push((tag, *value)));
        }

        let report = router.publish(Topic::A, 7);
        assert_eq!(report.delivered, 3);
        assert_eq!(
            *seen.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_topic_filtering() {
        let router = TestRouter::new();
        let a_count = Arc::new(AtomicUsize::new(0));
        let all_count = Arc::new(AtomicUsize::new(0));

        let ac = a_count.clone();
        router.subscribe(Topic::A, move |_| {
            ac.fetch_add(1, Ordering::SeqCst);
        });
        let alc = all_count.clone();
        router.subscribe_all(move |_| {
            alc.fetch_add(1, Ordering::SeqCst);
        });

        router.publish(Topic::A, 1);
        router.publish(Topic::B, 2);

        assert_eq!(a_count.load(Ordering::SeqCst), 1);
        assert_eq!(all_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let router = TestRouter::new();
        assert_eq!(router.publish(Topic::B, 1), DispatchReport::default());
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let router = TestRouter::new();
        let counter = Arc::new(AtomicUsize::new(0));

        router.subscribe(Topic::A, |_| panic!("subscriber bug"));
        let c = counter.clone();
        router.subscribe(Topic::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let report = router.publish(Topic::A, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fallible_subscriber_error_is_isolated() {
        let router = TestRouter::new();
        let counter = Arc::new(AtomicUsize::new(0));

        router.subscribe_fallible(TopicFilter::topic(Topic::A), |value| {
            anyhow::bail!("cannot handle {}", value)
        });
        let c = counter.clone();
        router.subscribe(Topic::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let report = router.publish(Topic::A, 3);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let router = Arc::new(TestRouter::new());
        let later: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let later_calls = Arc::new(AtomicUsize::new(0));

        let r = router.clone();
        let l = later.clone();
        router.subscribe(Topic::A, move |_| {
            if let Some(id) = l.lock().take() {
                r.unsubscribe(id).expect("first release succeeds");
            }
        });
        let lc = later_calls.clone();
        let id = router.subscribe(Topic::A, move |_| {
            lc.fetch_add(1, Ordering::SeqCst);
        });
        *later.lock() = Some(id);

        let report = router.publish(Topic::A, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_from_other_thread_waits_for_dispatch() {
        let router = Arc::new(TestRouter::new());
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let late_calls = Arc::new(AtomicUsize::new(0));

        router.subscribe(Topic::A, move |_| {
            let _ = started_tx.lock().send(());
            std::thread::sleep(Duration::from_millis(50));
        });
        let (c, lc, rel) = (calls.clone(), late_calls.clone(), released.clone());
        let id = router.subscribe(Topic::A, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if rel.load(Ordering::SeqCst) {
                lc.fetch_add(1, Ordering::SeqCst);
            }
        });

        let r = router.clone();
        let publisher = std::thread::spawn(move || r.publish(Topic::A, 1));

        started_rx.recv().expect("dispatch started");
        router.unsubscribe(id).expect("first release succeeds");
        released.store(true, Ordering::SeqCst);

        let report = publisher.join().expect("publisher thread");
        assert_eq!(report.delivered, 2);
        router.publish(Topic::A, 2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_during_dispatch_takes_effect_next_publish() {
        let router = Arc::new(TestRouter::new());
        let added = Arc::new(AtomicUsize::new(0));

        let r = router.clone();
        let a = added.clone();
        router.subscribe(Topic::A, move |_| {
            let a = a.clone();
            r.subscribe(Topic::B, move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            });
        });

        router.publish(Topic::A, 1);
        assert_eq!(added.load(Ordering::SeqCst), 0);
        router.publish(Topic::B, 2);
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_publish_on_same_router() {
        let router = Arc::new(TestRouter::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let r = router.clone();
        router.subscribe(Topic::A, move |value| {
            r.publish(Topic::B, value + 1);
        });
        let s = seen.clone();
        router.subscribe(Topic::B, move |value| s.lock().push(*value));

        router.publish(Topic::A, 1);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_dispatch_is_serialized_across_threads() {
        let router = Arc::new(TestRouter::new());
        let in_callback = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let ic = in_callback.clone();
        let ov = overlaps.clone();
        router.subscribe(Topic::A, move |_| {
            if ic.swap(true, Ordering::SeqCst) {
                ov.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(1));
            ic.store(false, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = router.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        r.publish(Topic::A, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("publisher thread");
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_history() {
        let config = RouterConfig {
            enable_history: true,
            max_history_size: 10,
            ..Default::default()
        };
        let router = TestRouter::with_config(config);

        for i in 0..5 {
            router.publish(Topic::A, i);
        }

        let history = router.history(None);
        assert_eq!(history.len(), 5);
        assert_eq!(history[4].event, 4);

        router.clear_history();
        assert_eq!(router.history(None).len(), 0);
    }

    #[test]
    fn test_history_max_size() {
        let config = RouterConfig {
            enable_history: true,
            max_history_size: 5,
            ..Default::default()
        };
        let router = TestRouter::with_config(config);

        for i in 0..10 {
            router.publish(Topic::B, i);
        }

        let history = router.history(None);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].event, 5);
    }

    #[test]
    fn test_history_disabled_by_default() {
        let router = TestRouter::new();
        router.publish(Topic::A, 1);
        assert!(router.history(None).is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(RouterConfig::default().validate().is_ok());

        let config = RouterConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_matches() {
        assert!(TopicFilter::All.matches(&Topic::A));
        assert!(TopicFilter::topic(Topic::A).matches(&Topic::A));
        assert!(!TopicFilter::topic(Topic::A).matches(&Topic::B));
        assert!(TopicFilter::Topics(vec![Topic::A, Topic::B]).matches(&Topic::B));
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let router = TestRouter::new();
        let mut receiver = router.receiver();

        router.publish(Topic::B, 42);

        let received = receiver.try_recv().expect("Should receive envelope");
        assert_eq!(received.topic, Topic::B);
        assert_eq!(received.event, 42);
    }
}
