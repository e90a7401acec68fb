//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Sentinel. It runs each
//! sensor reading through the full pipeline:
//!
//! 1. MetricExtractor - quality gate and metric formulas
//! 2. ThresholdAnalyzer and AnomalyDetector - concurrently, on blocking threads
//! 3. AlertSynthesizer - one alert per metric with confidence and context
//! 4. Correlator - deduplication within the correlation window
//! 5. AlertDistributor - persistence hand-off and subscriber fan-out
//!
//! Stages 2-5 run under the circuit breaker and its time budget. Work for one
//! session is serialized by a per-session lock, and state for one sensor by a
//! per-sensor lock.

use crate::anomaly::AnomalyDetector;
use crate::baseline::Baseline;
use crate::breaker::{BreakerStats, CircuitBreaker, CircuitState};
use crate::config::SentinelConfig;
use crate::correlator::Correlator;
use crate::distributor::AlertDistributor;
use crate::error::AlertError;
use crate::extractor::MetricExtractor;
use crate::locks::KeyedLocks;
use crate::persistence::{AlertPersistence, PersistenceSnapshot};
use crate::subscription::Subscription;
use crate::synthesizer::{AlertSynthesizer, SynthesisInput};
use crate::threshold::ThresholdAnalyzer;
use crate::types::{
    Alert, AlertFilter, AlertMetrics, AlertStatus, AlertType, MetricMap, ProcessOptions,
    SensorReading, Severity, TimeRange,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stateful alert pipeline shared by all sensor streams.
///
/// Create it inside a tokio runtime; it starts a background persistence worker.
/// Share it between tasks behind an `Arc`.
pub struct AlertPipeline {
    config: SentinelConfig,
    threshold: Arc<ThresholdAnalyzer>,
    anomaly: Arc<AnomalyDetector>,
    synthesizer: AlertSynthesizer,
    correlator: Correlator,
    distributor: AlertDistributor,
    breaker: CircuitBreaker,
    session_locks: KeyedLocks,
    sensor_locks: KeyedLocks,
    store: Arc<dyn AlertPersistence>,
}

impl AlertPipeline {
    /// Build a pipeline over the given persistence collaborator
    pub fn new(config: SentinelConfig, store: Arc<dyn AlertPersistence>) -> Result<Self, AlertError> {
        config.validate()?;
        Ok(Self {
            threshold: Arc::new(ThresholdAnalyzer::new(config.threshold.clone())),
            anomaly: Arc::new(AnomalyDetector::new(config.anomaly.clone())),
            synthesizer: AlertSynthesizer::new(config.synthesis.clone()),
            correlator: Correlator::new(config.correlation.clone()),
            distributor: AlertDistributor::new(&config, Arc::clone(&store)),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            session_locks: KeyedLocks::new(),
            sensor_locks: KeyedLocks::new(),
            store,
            config,
        })
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Process one reading and return the alerts that surfaced.
    ///
    /// Returns once the alerts have been published to subscribers; persistence
    /// continues in the background. Readings that fail the quality gate yield
    /// no alerts. Fails with `PipelineUnavailable` while the circuit is open
    /// and `PipelineTimeout` when the time budget is exceeded, in which case
    /// nothing from the reading is published.
    pub async fn process_incoming_data(
        &self,
        reading: SensorReading,
        session_id: &str,
        options: ProcessOptions,
    ) -> Result<Vec<Alert>, AlertError> {
        let received = Instant::now();
        self.breaker
            .call(self.run(reading, session_id, options, received))
            .await
    }

    async fn run(
        &self,
        reading: SensorReading,
        session_id: &str,
        options: ProcessOptions,
        received: Instant,
    ) -> Result<Vec<Alert>, AlertError> {
        let _session = self.session_locks.lock(session_id).await;
        let sensor_guard = Arc::new(self.sensor_locks.lock(&reading.sensor_id).await);

        let metrics = match MetricExtractor::extract(&reading, &self.config.extractor) {
            Ok(metrics) => metrics,
            Err(AlertError::DataQuality(reason)) => {
                debug!(sensor_id = %reading.sensor_id, %reason, "reading dropped");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let reading = Arc::new(reading);
        let metrics = Arc::new(metrics);

        // Blocking tasks keep the sensor lock alive even if this future is
        // abandoned on timeout
        let threshold_task = {
            let analyzer = Arc::clone(&self.threshold);
            let reading = Arc::clone(&reading);
            let metrics = Arc::clone(&metrics);
            let overrides = options.threshold_overrides.clone();
            let guard = Arc::clone(&sensor_guard);
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                analyzer.analyze(&reading.sensor_id, &metrics, reading.timestamp, &overrides)
            })
        };
        let anomaly_task = {
            let detector = Arc::clone(&self.anomaly);
            let reading = Arc::clone(&reading);
            let metrics = Arc::clone(&metrics);
            let guard = Arc::clone(&sensor_guard);
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                detector.detect(&reading.sensor_id, &metrics, reading.data_quality)
            })
        };

        let (threshold, anomaly) = tokio::join!(threshold_task, anomaly_task);
        let threshold = threshold.map_err(|e| AlertError::Analysis(e.to_string()))?;
        let anomaly = anomaly.map_err(|e| AlertError::Analysis(e.to_string()))?;

        if options.calibrate {
            self.anomaly.update_baseline(&reading.sensor_id, &metrics);
        } else if self.anomaly.seed_baseline(&reading.sensor_id, &metrics) {
            debug!(sensor_id = %reading.sensor_id, "baseline seeded");
        }

        let alerts = self.synthesizer.synthesize(SynthesisInput {
            session_id,
            sensor_id: &reading.sensor_id,
            reading_type: reading.reading_type,
            data_quality: reading.data_quality,
            threshold: &threshold,
            anomaly: &anomaly,
        });

        // From here on nothing awaits: correlation and publishing either
        // happen for the whole batch or not at all
        let elapsed = received.elapsed();
        if elapsed >= self.config.breaker.timeout() {
            warn!(
                sensor_id = %reading.sensor_id,
                session_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "batch exceeded time budget, discarding"
            );
            return Err(AlertError::PipelineTimeout(self.config.breaker.timeout_ms));
        }

        let correlation = self.correlator.correlate(alerts);
        self.distributor.distribute(&correlation.surfaced, received.elapsed());
        self.distributor.submit_updates(correlation.superseded);
        Ok(correlation.surfaced)
    }

    /// Subscribe to distributed alerts matching `filter`
    pub fn subscribe_to_alerts(&self, filter: AlertFilter) -> Result<Subscription, AlertError> {
        self.distributor.subscribe(filter)
    }

    /// Alerts that share a correlation id with `alert_id`
    pub fn get_correlated_alerts(&self, alert_id: Uuid) -> Vec<Alert> {
        self.correlator.get_correlated_alerts(alert_id)
    }

    pub fn get_priority_alerts(&self) -> Vec<Alert> {
        self.correlator.get_priority_alerts()
    }

    pub fn get_alert_metrics(&self, range: &TimeRange) -> AlertMetrics {
        self.distributor.metrics(range)
    }

    pub fn get_alert(&self, alert_id: Uuid) -> Option<Alert> {
        self.correlator.get_alert(alert_id)
    }

    pub fn acknowledge(&self, alert_id: Uuid) -> Result<Alert, AlertError> {
        self.transition(alert_id, AlertStatus::Acknowledged)
    }

    pub fn dismiss(&self, alert_id: Uuid) -> Result<Alert, AlertError> {
        self.transition(alert_id, AlertStatus::Dismissed)
    }

    pub fn resolve(&self, alert_id: Uuid) -> Result<Alert, AlertError> {
        self.transition(alert_id, AlertStatus::Resolved)
    }

    fn transition(&self, alert_id: Uuid, status: AlertStatus) -> Result<Alert, AlertError> {
        let alert = self.correlator.transition(alert_id, status)?;
        self.distributor.submit_updates(vec![alert.clone()]);
        Ok(alert)
    }

    /// Active alerts from persistence (may lag recent activity)
    pub async fn active_alerts(
        &self,
        alert_type: Option<AlertType>,
        min_severity: Severity,
    ) -> Result<Vec<Alert>, AlertError> {
        self.store.query_active(alert_type, min_severity).await
    }

    /// Retention housekeeping: drop persisted alerts older than the retention period
    pub async fn purge_expired_alerts(&self) -> Result<usize, AlertError> {
        let removed = self
            .store
            .purge_older_than(self.config.persistence.retention())
            .await?;
        if removed > 0 {
            debug!(removed, "expired alerts purged");
        }
        Ok(removed)
    }

    /// Fold a calibration vector into a sensor's baseline
    pub async fn update_baseline(&self, sensor_id: &str, metrics: &MetricMap) -> Arc<Baseline> {
        let _sensor = self.sensor_locks.lock(sensor_id).await;
        self.anomaly.update_baseline(sensor_id, metrics)
    }

    /// Drop the historical windows of a disconnected sensor. Its baseline is kept.
    pub async fn disconnect_sensor(&self, sensor_id: &str) {
        {
            let _sensor = self.sensor_locks.lock(sensor_id).await;
            self.threshold.windows().clear_sensor(sensor_id);
        }
        self.sensor_locks.remove_idle(sensor_id);
        debug!(sensor_id, "sensor disconnected, windows cleared");
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker_stats(&self) -> BreakerStats {
        self.breaker.stats()
    }

    pub fn persistence_stats(&self) -> PersistenceSnapshot {
        self.distributor.persistence_stats()
    }

    /// Load baseline state from JSON
    pub fn load_baselines(&self, json: &str) -> Result<usize, AlertError> {
        self.anomaly.baselines().load_json(json)
    }

    /// Save baseline state to JSON
    pub fn save_baselines(&self) -> Result<String, AlertError> {
        self.anomaly.baselines().to_json()
    }

    /// Number of samples in a sensor's historical window for one metric
    pub fn window_len(&self, sensor_id: &str, metric: crate::types::Metric) -> usize {
        self.threshold.windows().len(sensor_id, metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryAlertStore;
    use crate::types::{ChannelValue, Metric, ReadingType};

    fn config() -> SentinelConfig {
        let mut config = SentinelConfig::default();
        config.breaker.timeout_ms = 5_000;
        config
    }

    fn accel(x: f64, y: f64, z: f64, quality: f64) -> SensorReading {
        SensorReading::new(
            "sensor-1",
            ReadingType::Accelerometer,
            vec![
                ChannelValue::new("x", x),
                ChannelValue::new("y", y),
                ChannelValue::new("z", z),
            ],
            quality,
        )
    }

    fn pipeline() -> AlertPipeline {
        AlertPipeline::new(config(), Arc::new(InMemoryAlertStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_low_quality_reading_is_a_no_op() {
        let pipeline = pipeline();
        let alerts = pipeline
            .process_incoming_data(accel(5000.0, 0.0, 0.0, 50.0), "session", ProcessOptions::default())
            .await
            .unwrap();

        assert!(alerts.is_empty());
        assert_eq!(pipeline.window_len("sensor-1", Metric::PeakForce), 0);
        assert_eq!(pipeline.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_ceiling_alert_surfaces() {
        let pipeline = pipeline();
        let alerts = pipeline
            .process_incoming_data(accel(1300.0, 10.0, 10.0, 95.0), "session", ProcessOptions::default())
            .await
            .unwrap();

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.metric(), Metric::PeakForce);
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.correlation_id.is_some());
        assert!((0.0..=1.0).contains(&alert.confidence_score));
        assert_eq!(pipeline.window_len("sensor-1", Metric::PeakForce), 1);
    }

    #[tokio::test]
    async fn test_disconnect_clears_windows_keeps_baseline() {
        let pipeline = pipeline();
        pipeline
            .process_incoming_data(accel(100.0, 50.0, 20.0, 95.0), "session", ProcessOptions::calibration())
            .await
            .unwrap();
        assert_eq!(pipeline.window_len("sensor-1", Metric::PeakForce), 1);

        pipeline.disconnect_sensor("sensor-1").await;
        assert_eq!(pipeline.window_len("sensor-1", Metric::PeakForce), 0);
        assert!(pipeline.save_baselines().unwrap().contains("sensor-1"));
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_alerts() {
        let store = Arc::new(InMemoryAlertStore::new());
        let pipeline = AlertPipeline::new(config(), store.clone()).unwrap();
        let alerts = pipeline
            .process_incoming_data(accel(1300.0, 10.0, 10.0, 95.0), "session", ProcessOptions::default())
            .await
            .unwrap();

        for _ in 0..100 {
            if store.get(alerts[0].id).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pipeline.purge_expired_alerts().await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.synthesis.consistency_weight = 0.9;
        let result = AlertPipeline::new(bad, Arc::new(InMemoryAlertStore::new()));
        assert!(matches!(result, Err(AlertError::Config(_))));
    }
}
