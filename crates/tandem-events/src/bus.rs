// bus.rs — Subscription seam for the realtime event bus.
//
// The real transport is external: it delivers named events scoped to a
// topic, in order within a topic, at least once. The session core only sees
// the `EventBus` trait. `MemoryBus` is the in-process implementation used by
// tests and the local authority; it awaits each handler in turn, so events
// on one topic are reconciled strictly in publish order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tandem_changeset::{ChangeSetId, WorkspaceId};

use crate::event::RealtimeEvent;

/// Scope of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Everything happening in one workspace.
    Workspace(WorkspaceId),
    /// Events scoped to a single change set.
    ChangeSet(ChangeSetId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Workspace(id) => write!(f, "workspace/{}", id),
            Topic::ChangeSet(id) => write!(f, "change-set/{}", id),
        }
    }
}

/// Receives events for one subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivered event.
    async fn handle(&self, event: &RealtimeEvent);
}

/// Subscribe/unsubscribe contract of the realtime transport.
pub trait EventBus: Send + Sync {
    /// Register `handler` for every event on `topic` under `subscriber`.
    fn subscribe(&self, subscriber: &str, topic: Topic, handler: Arc<dyn EventHandler>);

    /// Remove every subscription registered under `subscriber`.
    ///
    /// Synchronous: once this returns, no handler of `subscriber` is
    /// invoked again. Returns whether anything was removed.
    fn unsubscribe(&self, subscriber: &str) -> bool;
}

struct Subscription {
    subscriber: String,
    topic: Topic,
    handler: Arc<dyn EventHandler>,
    active: Arc<AtomicBool>,
}

/// In-process event bus with in-order delivery.
#[derive(Default)]
pub struct MemoryBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber of `topic`, one after another.
    ///
    /// Returns the number of handlers invoked.
    pub async fn publish(&self, topic: &Topic, event: RealtimeEvent) -> usize {
        let targets: Vec<(Arc<dyn EventHandler>, Arc<AtomicBool>)> = self
            .lock()
            .iter()
            .filter(|s| &s.topic == topic)
            .map(|s| (s.handler.clone(), s.active.clone()))
            .collect();

        tracing::debug!(
            topic = %topic,
            event = event.event_type(),
            subscribers = targets.len(),
            "publishing realtime event"
        );

        let mut delivered = 0;
        for (handler, active) in targets {
            // A handler earlier in this round may have unsubscribed a later one.
            if !active.load(Ordering::Acquire) {
                continue;
            }
            handler.handle(&event).await;
            delivered += 1;
        }
        delivered
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `subscriber` holds at least one subscription.
    pub fn is_subscribed(&self, subscriber: &str) -> bool {
        self.lock().iter().any(|s| s.subscriber == subscriber)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventBus for MemoryBus {
    fn subscribe(&self, subscriber: &str, topic: Topic, handler: Arc<dyn EventHandler>) {
        tracing::debug!(subscriber, topic = %topic, "subscribing");
        self.lock().push(Subscription {
            subscriber: subscriber.to_string(),
            topic,
            handler,
            active: Arc::new(AtomicBool::new(true)),
        });
    }

    fn unsubscribe(&self, subscriber: &str) -> bool {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| {
            if s.subscriber == subscriber {
                s.active.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
        let removed = before != subscriptions.len();
        if removed {
            tracing::debug!(subscriber, "unsubscribed");
        }
        removed
    }
}
