//! In-process event bus (publish/subscribe with handler isolation).
//!
//! The bus is an explicit value with its own lifecycle: construct it once, share
//! it by `Arc` with every component that publishes or subscribes, and `close()`
//! it on shutdown. There is no process-global instance.
//!
//! ## Delivery semantics
//!
//! - **After commit**: publishers call `publish()` only once the change the event
//!   describes is durable. The bus never participates in that transaction.
//! - **Synchronous, in order**: handlers run one after another, in subscription
//!   order, on the publisher's task.
//! - **Best-effort, isolated**: a failing handler is logged and recorded in the
//!   bus failure ledger. Sibling handlers still run and the publisher is not
//!   failed. Failed deliveries can be re-driven later with `redrive_failures()`.
//! - **Wildcards are additive**: a `Topic::All` subscriber receives every event
//!   in addition to any type-specific subscribers, never instead of them.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{Event, SystemEvent};

/// Upper bound on retained delivery failures; the oldest entries are dropped first.
const MAX_RETAINED_FAILURES: usize = 10_000;

/// Error returned by an event handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A subscriber reacting to committed events.
///
/// Handlers that mutate other records must go through the same validated,
/// version-checked paths as any other caller. Handlers should be idempotent:
/// a failed delivery may be re-driven.
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// Stable name used in logs and in the failure ledger.
    fn name(&self) -> &str;

    async fn handle(&self, event: &SystemEvent<E>) -> Result<(), HandlerError>;
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Every event published on the bus.
    All,
    /// Only events whose `event_type()` equals this name.
    Event(Cow<'static, str>),
}

impl Topic {
    pub fn event(name: impl Into<Cow<'static, str>>) -> Self {
        Topic::Event(name.into())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Topic::All => true,
            Topic::Event(name) => name == event_type,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber<E> {
    id: SubscriptionId,
    topic: Topic,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            topic: self.topic.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// A delivery that failed and has not been successfully re-driven.
#[derive(Debug, Clone)]
pub struct DeliveryFailure<E> {
    pub subscription: SubscriptionId,
    pub handler: String,
    pub event: SystemEvent<E>,
    pub error: String,
    pub attempts: u32,
    pub last_failed_at: DateTime<Utc>,
}

/// Outcome of a `publish()` or `redrive_failures()` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Injectable publish/subscribe component.
pub struct EventBus<E> {
    subscribers: RwLock<Vec<Subscriber<E>>>,
    failures: Mutex<Vec<DeliveryFailure<E>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<E> core::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }
}

impl<E> EventBus<E>
where
    E: Event,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers run in the order they were subscribed.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler<E>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(handler = handler.name(), ?topic, "event handler subscribed");
        subs.push(Subscriber { id, topic, handler });
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Stop delivering. Later publishes are dropped with a warning.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver an event to every matching subscriber, in subscription order.
    pub async fn publish(&self, event: SystemEvent<E>) -> PublishReport {
        if self.is_closed() {
            tracing::warn!(
                event_type = event.event_type(),
                event_id = %event.event_id(),
                "event bus closed; dropping event"
            );
            return PublishReport::default();
        }

        let event_type = event.event_type();
        let matching = self.matching_subscribers(event_type);

        let mut report = PublishReport::default();
        for sub in matching {
            match sub.handler.handle(&event).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        handler = sub.handler.name(),
                        event_type,
                        event_id = %event.event_id(),
                        error = %err,
                        "event handler failed"
                    );
                    self.record_failure(DeliveryFailure {
                        subscription: sub.id,
                        handler: sub.handler.name().to_string(),
                        event: event.clone(),
                        error: err.to_string(),
                        attempts: 1,
                        last_failed_at: Utc::now(),
                    });
                }
            }
        }

        report
    }

    /// Deliveries that failed and are still awaiting a successful re-drive.
    pub fn failures(&self) -> Vec<DeliveryFailure<E>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-invoke only the handlers whose delivery failed.
    ///
    /// Failures whose subscription was removed are dropped. Deliveries that fail
    /// again stay in the ledger with their attempt counter incremented.
    pub async fn redrive_failures(&self) -> PublishReport {
        let pending: Vec<DeliveryFailure<E>> = {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *failures)
        };

        let mut report = PublishReport::default();
        for mut failure in pending {
            let Some(sub) = self.subscriber(failure.subscription) else {
                tracing::warn!(
                    handler = %failure.handler,
                    event_id = %failure.event.event_id(),
                    "dropping failed delivery for removed subscription"
                );
                continue;
            };

            match sub.handler.handle(&failure.event).await {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::info!(
                        handler = %failure.handler,
                        event_id = %failure.event.event_id(),
                        attempts = failure.attempts + 1,
                        "failed delivery re-driven"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    failure.attempts += 1;
                    failure.error = err.to_string();
                    failure.last_failed_at = Utc::now();
                    tracing::error!(
                        handler = %failure.handler,
                        event_id = %failure.event.event_id(),
                        attempts = failure.attempts,
                        error = %err,
                        "event handler failed again on re-drive"
                    );
                    self.record_failure(failure);
                }
            }
        }

        report
    }

    fn matching_subscribers(&self, event_type: &str) -> Vec<Subscriber<E>> {
        // Snapshot so no lock is held while handlers run (they may subscribe or publish).
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|s| s.topic.matches(event_type))
            .cloned()
            .collect()
    }

    fn subscriber(&self, id: SubscriptionId) -> Option<Subscriber<E>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    fn record_failure(&self, failure: DeliveryFailure<E>) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if failures.len() >= MAX_RETAINED_FAILURES {
            let dropped = failures.remove(0);
            tracing::warn!(
                handler = %dropped.handler,
                event_id = %dropped.event.event_id(),
                "failure ledger full; dropping oldest failed delivery"
            );
        }
        failures.push(failure);
    }
}
