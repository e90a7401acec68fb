//! Alert metrics
//!
//! Records one entry per distributed alert (category, severity and the
//! receipt-to-dispatch latency of its batch) in a bounded buffer, and
//! aggregates them over a time range.

use crate::types::{Alert, AlertMetrics, AlertType, Severity, TimeRange};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct DispatchRecord {
    at: DateTime<Utc>,
    alert_type: AlertType,
    severity: Severity,
    latency_ms: f64,
}

/// Bounded in-memory record of distributed alerts
#[derive(Debug)]
pub struct AlertMetricsRecorder {
    records: Mutex<VecDeque<DispatchRecord>>,
    capacity: usize,
}

impl Default for AlertMetricsRecorder {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AlertMetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Record a dispatched alert and the latency of the batch that produced it
    pub fn record(&self, alert: &Alert, latency: Duration) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push_back(DispatchRecord {
            at: Utc::now(),
            alert_type: alert.alert_type,
            severity: alert.severity,
            latency_ms: latency.as_secs_f64() * 1000.0,
        });
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Aggregate the records dispatched within `range`
    pub fn metrics(&self, range: &TimeRange) -> AlertMetrics {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut metrics = AlertMetrics::default();
        let mut latency_sum = 0.0;

        for record in records.iter().filter(|r| range.contains(r.at)) {
            metrics.total_alerts += 1;
            latency_sum += record.latency_ms;
            *metrics.alerts_by_type.entry(record.alert_type).or_insert(0) += 1;
            *metrics.alerts_by_severity.entry(record.severity).or_insert(0) += 1;
        }

        if metrics.total_alerts > 0 {
            metrics.average_latency_ms = latency_sum / metrics.total_alerts as f64;
        }
        metrics
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
