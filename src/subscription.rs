//! Alert subscriptions
//!
//! Each subscriber owns a bounded channel and a filter. Publishing never
//! blocks: a full channel drops the alert for that subscriber only and bumps
//! its dropped counter. A closed channel removes the subscriber.

use crate::config::SubscriptionConfig;
use crate::error::AlertError;
use crate::types::{Alert, AlertFilter};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

#[derive(Debug)]
struct Subscriber {
    filter: AlertFilter,
    sender: mpsc::Sender<Alert>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug)]
struct HubInner {
    config: SubscriptionConfig,
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
}

/// Fan-out point for distributed alerts
#[derive(Debug, Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(SubscriptionConfig::default())
    }
}

impl SubscriptionHub {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber. An empty filter receives every alert.
    pub fn subscribe(&self, filter: AlertFilter) -> Result<Subscription, AlertError> {
        let max = self.inner.config.max_subscribers;
        if self.inner.subscribers.len() >= max {
            return Err(AlertError::Subscription(format!(
                "subscriber limit of {max} reached"
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.config.channel_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        self.inner.subscribers.insert(
            id,
            Subscriber {
                filter,
                sender,
                dropped: Arc::clone(&dropped),
            },
        );
        debug!(subscriber = id, "subscriber registered");

        Ok(Subscription {
            receiver,
            handle: SubscriptionHandle {
                id,
                hub: Arc::downgrade(&self.inner),
                closed: Arc::new(AtomicBool::new(false)),
                dropped,
            },
        })
    }

    /// Deliver an alert to every matching subscriber. Returns the number of
    /// subscribers that accepted it.
    pub fn publish(&self, alert: &Alert) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.inner.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.filter.matches(alert) {
                continue;
            }
            match subscriber.sender.try_send(alert.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    let total = subscriber.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        subscriber = *entry.key(),
                        alert_id = %alert.id,
                        dropped_total = total,
                        "subscriber channel full, alert dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.inner.subscribers.remove(&id);
            debug!(subscriber = id, "removed closed subscriber");
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// Cancellation handle for a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: u64,
    hub: Weak<HubInner>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.remove(&self.id);
            debug!(subscriber = self.id, "subscriber removed");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.hub.strong_count() > 0
    }

    /// Alerts dropped for this subscriber because its channel was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Alert>,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Next alert, or `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Alert> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Alert> {
        self.receiver.try_recv().ok()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
