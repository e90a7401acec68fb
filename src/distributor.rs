//! Alert distribution
//!
//! Hands each surfaced alert to the persistence worker (fire and forget),
//! publishes it to matching subscribers and records dispatch metrics.
//! Nothing here awaits I/O, so a batch is published in one synchronous step.

use crate::config::SentinelConfig;
use crate::error::AlertError;
use crate::persistence::{AlertPersistence, PersistJob, PersistenceSnapshot, PersistenceWorker};
use crate::subscription::{Subscription, SubscriptionHub};
use crate::telemetry::AlertMetricsRecorder;
use crate::types::{Alert, AlertFilter, AlertMetrics, TimeRange};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Persistence and fan-out for finalized alerts
#[derive(Debug)]
pub struct AlertDistributor {
    hub: SubscriptionHub,
    persistence: PersistenceWorker,
    recorder: AlertMetricsRecorder,
}

impl AlertDistributor {
    /// Must be called inside a tokio runtime (starts the persistence worker)
    pub fn new(config: &SentinelConfig, store: Arc<dyn AlertPersistence>) -> Self {
        Self {
            hub: SubscriptionHub::new(config.subscription.clone()),
            persistence: PersistenceWorker::spawn(store, &config.persistence),
            recorder: AlertMetricsRecorder::new(config.persistence.metrics_capacity),
        }
    }

    /// Persist, publish and record a batch of surfaced alerts.
    /// `latency` is the receipt-to-dispatch time of the batch.
    pub fn distribute(&self, alerts: &[Alert], latency: Duration) {
        for alert in alerts {
            self.persistence.submit(PersistJob::Save(alert.clone()));
            let delivered = self.hub.publish(alert);
            self.recorder.record(alert, latency);
            debug!(
                alert_id = %alert.id,
                severity = alert.severity.as_str(),
                delivered,
                "alert distributed"
            );
        }
    }

    /// Propagate status changes (transitions and superseded primaries) to persistence
    pub fn submit_updates(&self, alerts: Vec<Alert>) {
        if !alerts.is_empty() {
            self.persistence.submit(PersistJob::BulkUpdate(alerts));
        }
    }

    pub fn subscribe(&self, filter: AlertFilter) -> Result<Subscription, AlertError> {
        self.hub.subscribe(filter)
    }

    pub fn metrics(&self, range: &TimeRange) -> AlertMetrics {
        self.recorder.metrics(range)
    }

    pub fn persistence_stats(&self) -> PersistenceSnapshot {
        self.persistence.stats()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}
