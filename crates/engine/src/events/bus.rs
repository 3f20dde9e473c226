//! In-process publish/subscribe for safety events.

use super::{EventKind, SafetyEvent};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifier returned by [`EventBus::subscribe`].
pub type SubscriptionId = Uuid;

/// Receives events from the bus.
///
/// Each call runs in its own task, so an error or a panic is contained to
/// that one delivery.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: SafetyEvent) -> anyhow::Result<()>;
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Queue capacity per subscriber before deliveries are deferred.
    pub queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventBusStats {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Deliveries that found a full queue and were handed to a spawned send.
    pub deferred: u64,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    deferred: AtomicU64,
}

struct Subscriber {
    id: SubscriptionId,
    name: String,
    /// Empty means every kind.
    kinds: Vec<EventKind>,
    tx: mpsc::Sender<SafetyEvent>,
}

impl Subscriber {
    fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Event bus with a bounded queue and a dedicated worker per subscriber.
///
/// `publish` never blocks and never fails because of a subscriber. Events
/// are not persisted; a subscriber only sees events published after it
/// subscribed.
pub struct EventBus {
    config: EventBusConfig,
    subscribers: RwLock<Vec<Subscriber>>,
    counters: Arc<Counters>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Registers a handler for the given kinds (all kinds when empty).
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<H: EventHandler>(
        &self,
        name: impl Into<String>,
        kinds: &[EventKind],
        handler: H,
    ) -> SubscriptionId {
        self.subscribe_arc(name, kinds, Arc::new(handler))
    }

    /// Same as [`subscribe`](Self::subscribe) for a shared handler.
    pub fn subscribe_arc(
        &self,
        name: impl Into<String>,
        kinds: &[EventKind],
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));

        tokio::spawn(run_worker(name.clone(), rx, handler, self.counters.clone()));

        info!(subscriber = %name, kinds = ?kinds, "Subscribed to event bus");
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                name,
                kinds: kinds.to_vec(),
                tx,
            });
        id
    }

    /// Subscribes and returns a channel receiving the matching events.
    pub fn subscribe_channel(
        &self,
        name: impl Into<String>,
        kinds: &[EventKind],
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<SafetyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(name, kinds, ForwardingHandler { tx });
        (id, rx)
    }

    /// Removes a subscriber. Its worker stops once queued events are handled.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() < before;
        if removed {
            debug!(subscription = %id, "Unsubscribed from event bus");
        }
        removed
    }

    /// Delivers the event to every subscriber registered right now.
    ///
    /// Returns the number of subscribers the event was handed to.
    pub fn publish(&self, event: SafetyEvent) -> usize {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();

        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut recipients = 0;

        for subscriber in subscribers.iter().filter(|s| s.accepts(kind)) {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => recipients += 1,
                Err(TrySendError::Full(event)) => {
                    let Ok(handle) = tokio::runtime::Handle::try_current() else {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(subscriber = %subscriber.name, event = %kind, "Queue full outside runtime, event dropped");
                        continue;
                    };
                    self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber = %subscriber.name, event = %kind, "Subscriber queue full, deferring delivery");
                    let tx = subscriber.tx.clone();
                    handle.spawn(async move {
                        let _ = tx.send(event).await;
                    });
                    recipients += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %subscriber.name, "Subscriber worker closed");
                }
            }
        }

        recipients
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

async fn run_worker(
    name: String,
    mut rx: mpsc::Receiver<SafetyEvent>,
    handler: Arc<dyn EventHandler>,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        let kind = event.kind();
        let handler = handler.clone();

        match tokio::spawn(async move { handler.handle(event).await }).await {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(subscriber = %name, event = %kind, error = %e, "Event handler failed");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(subscriber = %name, event = %kind, error = %e, "Event handler panicked");
            }
        }
    }
    debug!(subscriber = %name, "Event worker stopped");
}

/// Forwards events into an unbounded channel.
struct ForwardingHandler {
    tx: mpsc::UnboundedSender<SafetyEvent>,
}

#[async_trait]
impl EventHandler for ForwardingHandler {
    async fn handle(&self, event: SafetyEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("receiver dropped"))
    }
}
