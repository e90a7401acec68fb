//! End-to-end tests for the alert pipeline

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use synheart_sentinel::persistence::BulkUpdateResult;
use synheart_sentinel::{
    Alert, AlertError, AlertFilter, AlertPersistence, AlertPipeline, AlertStatus, AlertType,
    ChannelValue, CircuitState, InMemoryAlertStore, Metric, ProcessOptions, ReadingType,
    SensorReading, SentinelConfig, Severity, TimeRange,
};

fn config() -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.breaker.timeout_ms = 5_000;
    config
}

fn pipeline_with(config: SentinelConfig) -> (AlertPipeline, Arc<InMemoryAlertStore>) {
    let store = Arc::new(InMemoryAlertStore::new());
    let pipeline = AlertPipeline::new(config, store.clone()).unwrap();
    (pipeline, store)
}

fn accel(sensor: &str, x: f64, y: f64, z: f64, quality: f64) -> SensorReading {
    SensorReading::new(
        sensor,
        ReadingType::Accelerometer,
        vec![
            ChannelValue::new("x", x),
            ChannelValue::new("y", y),
            ChannelValue::new("z", z),
        ],
        quality,
    )
}

fn insole(sensor: &str, left: f64, right: f64) -> SensorReading {
    SensorReading::new(
        sensor,
        ReadingType::Pressure,
        vec![ChannelValue::new("left", left), ChannelValue::new("right", right)],
        95.0,
    )
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_single_force_reading_over_threshold() {
    let (pipeline, _) = pipeline_with(config());

    let alerts = pipeline
        .process_incoming_data(
            accel("imu-1", 900.0, 10.0, 10.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.metric(), Metric::PeakForce);
    assert!(alert.severity >= Severity::High);
    assert_eq!(alert.context.threshold, Some(850.0));
    assert!((alert.context.deviation_percent - 5.882).abs() < 0.01);
}

#[tokio::test]
async fn test_force_spike_after_stable_history() {
    let (pipeline, _) = pipeline_with(config());

    // Peak force climbs 500..595 while mean acceleration stays at 400
    for k in 0..20 {
        let step = 5.0 * k as f64;
        let alerts = pipeline
            .process_incoming_data(
                accel("imu-1", 500.0 + step, 400.0 - step, 300.0, 95.0),
                "session-1",
                ProcessOptions::default(),
            )
            .await
            .unwrap();
        assert!(alerts.is_empty(), "warm-up reading {k} raised {alerts:?}");
    }

    let alerts = pipeline
        .process_incoming_data(
            accel("imu-1", 900.0, 100.0, 100.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.metric(), Metric::PeakForce);
    assert_eq!(alert.alert_type, AlertType::Biomechanical);
    assert!(alert.severity >= Severity::High);
    assert_eq!(alert.context.threshold, Some(850.0));
    assert!((alert.context.deviation_percent - 5.882).abs() < 0.01);
    assert!(alert.context.z_score.unwrap() > 3.0);
    assert!((alert.context.historical_baseline.unwrap() - 547.5).abs() < 1e-9);
    assert!((0.0..=1.0).contains(&alert.confidence_score));
}

#[tokio::test]
async fn test_identical_readings_surface_once() {
    let (pipeline, _) = pipeline_with(config());
    let mut surfaced = Vec::new();

    for _ in 0..100 {
        let alerts = pipeline
            .process_incoming_data(
                accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
                "session-1",
                ProcessOptions::default(),
            )
            .await
            .unwrap();
        surfaced.extend(alerts);
    }

    assert_eq!(surfaced.len(), 1);
    let primary = &surfaced[0];
    assert_eq!(primary.severity, Severity::High);

    let correlated = pipeline.get_correlated_alerts(primary.id);
    assert_eq!(correlated.len(), 99);
    assert!(correlated
        .iter()
        .all(|a| a.correlation_id == primary.correlation_id));
}

#[tokio::test]
async fn test_surfaced_alerts_are_unique_per_key() {
    let (pipeline, _) = pipeline_with(config());
    let mut surfaced = Vec::new();

    for session in ["a", "b"] {
        for _ in 0..10 {
            surfaced.extend(
                pipeline
                    .process_incoming_data(
                        accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
                        session,
                        ProcessOptions::default(),
                    )
                    .await
                    .unwrap(),
            );
        }
    }

    let keys: HashSet<_> = surfaced
        .iter()
        .filter(|a| a.is_active())
        .map(|a| (a.session_id.clone(), a.metric(), a.alert_type))
        .collect();
    assert_eq!(keys.len(), surfaced.len());
    assert_eq!(surfaced.len(), 2);
}

#[tokio::test]
async fn test_escalation_resolves_previous_primary() {
    let (pipeline, store) = pipeline_with(config());
    let mut surfaced = Vec::new();

    // Asymmetry 25%, 25%, then 60%
    for (left, right) in [(112.5, 87.5), (112.5, 87.5), (130.0, 70.0)] {
        surfaced.extend(
            pipeline
                .process_incoming_data(insole("insole-1", left, right), "s", ProcessOptions::default())
                .await
                .unwrap(),
        );
    }

    assert_eq!(surfaced.len(), 2);
    let (first, escalated) = (&surfaced[0], &surfaced[1]);
    assert_eq!(first.metric(), Metric::Asymmetry);
    assert_eq!(first.severity, Severity::Medium);
    assert_eq!(escalated.severity, Severity::Critical);
    assert_eq!(first.correlation_id, escalated.correlation_id);
    assert_eq!(
        pipeline.get_alert(first.id).map(|a| a.status),
        Some(AlertStatus::Resolved)
    );

    wait_for(|| {
        store.get(first.id).map(|a| a.status) == Some(AlertStatus::Resolved)
            && store.get(escalated.id).is_some()
    })
    .await;
    let active: Vec<_> = pipeline
        .active_alerts(None, Severity::Low)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.session_id == "s" && a.metric() == Metric::Asymmetry)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, escalated.id);
}

#[tokio::test]
async fn test_low_quality_reading_yields_nothing() {
    let (pipeline, _) = pipeline_with(config());
    let mut subscription = pipeline.subscribe_to_alerts(AlertFilter::all()).unwrap();

    let alerts = pipeline
        .process_incoming_data(
            accel("imu-1", 5000.0, 10.0, 10.0, 50.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    assert!(alerts.is_empty());
    assert!(subscription.try_recv().is_none());
    assert_eq!(pipeline.window_len("imu-1", Metric::PeakForce), 0);
}

#[tokio::test]
async fn test_subscription_and_metrics() {
    let (pipeline, store) = pipeline_with(config());
    let mut all = pipeline.subscribe_to_alerts(AlertFilter::all()).unwrap();
    let mut other_session = pipeline
        .subscribe_to_alerts(AlertFilter::for_session("elsewhere"))
        .unwrap();

    let alerts = pipeline
        .process_incoming_data(
            accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);

    let received = all.recv().await.unwrap();
    assert_eq!(received.id, alerts[0].id);
    assert!(other_session.try_recv().is_none());

    wait_for(|| store.get(alerts[0].id).is_some()).await;
    assert!(store.get(alerts[0].id).is_some());

    let metrics = pipeline.get_alert_metrics(&TimeRange::last(chrono::Duration::minutes(1)));
    assert_eq!(metrics.total_alerts, 1);
    assert_eq!(metrics.alerts_by_severity.get(&Severity::High), Some(&1));
    assert!(metrics.average_latency_ms >= 0.0);
}

#[tokio::test]
async fn test_status_transitions_propagate() {
    let (pipeline, store) = pipeline_with(config());
    let alert = pipeline
        .process_incoming_data(
            accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap()
        .remove(0);
    wait_for(|| store.get(alert.id).is_some()).await;

    let acknowledged = pipeline.acknowledge(alert.id).unwrap();
    assert_eq!(acknowledged.status, AlertStatus::Acknowledged);
    assert_eq!(acknowledged.id, alert.id);
    assert_eq!(acknowledged.timestamp, alert.timestamp);
    assert_eq!(acknowledged.context, alert.context);
    assert_eq!(
        Alert {
            status: AlertStatus::Active,
            ..acknowledged.clone()
        },
        alert
    );
    assert_eq!(
        pipeline.get_alert(alert.id).map(|a| a.status),
        Some(AlertStatus::Acknowledged)
    );

    wait_for(|| {
        store
            .get(alert.id)
            .map(|a| a.status == AlertStatus::Acknowledged)
            .unwrap_or(false)
    })
    .await;
    let active = pipeline
        .active_alerts(Some(AlertType::Biomechanical), Severity::Low)
        .await
        .unwrap();
    assert!(active.iter().all(|a| a.id != alert.id));

    pipeline.resolve(alert.id).unwrap();
    assert!(matches!(
        pipeline.dismiss(alert.id),
        Err(AlertError::InvalidTransition { .. })
    ));
    assert!(matches!(
        pipeline.acknowledge(uuid::Uuid::new_v4()),
        Err(AlertError::AlertNotFound(_))
    ));

    // A closed primary lets the next breach surface under the same correlation id
    let next = pipeline
        .process_incoming_data(
            accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].correlation_id, alert.correlation_id);
}

/// Fails its first save, then behaves like the in-memory store
#[derive(Default)]
struct FirstSaveFails {
    inner: InMemoryAlertStore,
    failed: AtomicBool,
}

#[async_trait]
impl AlertPersistence for FirstSaveFails {
    async fn save(&self, alert: &Alert) -> Result<(), AlertError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(AlertError::PersistenceFailure("transient".to_string()));
        }
        self.inner.save(alert).await
    }

    async fn bulk_update(&self, alerts: &[Alert]) -> Result<BulkUpdateResult, AlertError> {
        self.inner.bulk_update(alerts).await
    }

    async fn query_active(
        &self,
        alert_type: Option<AlertType>,
        min_severity: Severity,
    ) -> Result<Vec<Alert>, AlertError> {
        self.inner.query_active(alert_type, min_severity).await
    }
}

#[tokio::test]
async fn test_acknowledge_while_save_is_retrying() {
    let store = Arc::new(FirstSaveFails::default());
    let pipeline = AlertPipeline::new(config(), store.clone()).unwrap();

    let alert = pipeline
        .process_incoming_data(
            accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap()
        .remove(0);
    wait_for(|| pipeline.persistence_stats().failed_attempts > 0).await;

    pipeline.acknowledge(alert.id).unwrap();
    wait_for(|| {
        store.inner.get(alert.id).map(|a| a.status) == Some(AlertStatus::Acknowledged)
            && pipeline.persistence_stats().completed >= 2
    })
    .await;

    assert_eq!(
        store.inner.get(alert.id).map(|a| a.status),
        Some(AlertStatus::Acknowledged)
    );
    assert_eq!(
        pipeline.get_alert(alert.id).map(|a| a.status),
        Some(AlertStatus::Acknowledged)
    );
}

struct FailingStore;

#[async_trait]
impl AlertPersistence for FailingStore {
    async fn save(&self, _alert: &Alert) -> Result<(), AlertError> {
        Err(AlertError::PersistenceFailure("store offline".to_string()))
    }

    async fn bulk_update(&self, _alerts: &[Alert]) -> Result<BulkUpdateResult, AlertError> {
        Err(AlertError::PersistenceFailure("store offline".to_string()))
    }

    async fn query_active(
        &self,
        _alert_type: Option<AlertType>,
        _min_severity: Severity,
    ) -> Result<Vec<Alert>, AlertError> {
        Err(AlertError::PersistenceFailure("store offline".to_string()))
    }
}

#[tokio::test]
async fn test_persistence_failure_does_not_block_delivery() {
    let pipeline = AlertPipeline::new(config(), Arc::new(FailingStore)).unwrap();
    let mut subscription = pipeline.subscribe_to_alerts(AlertFilter::all()).unwrap();

    let alerts = pipeline
        .process_incoming_data(
            accel("imu-1", 1300.0, 10.0, 10.0, 95.0),
            "session-1",
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(alerts.len(), 1);
    assert_eq!(subscription.recv().await.unwrap().id, alerts[0].id);
    assert_eq!(pipeline.circuit_state(), CircuitState::Closed);

    wait_for(|| pipeline.persistence_stats().failed_attempts > 0).await;
    assert!(pipeline.persistence_stats().failed_attempts > 0);
}

#[tokio::test]
async fn test_circuit_opens_after_repeated_timeouts() {
    let mut config = config();
    config.breaker.timeout_ms = 0;
    let (pipeline, _) = pipeline_with(config);

    for _ in 0..50 {
        let result = pipeline
            .process_incoming_data(
                accel("imu-1", 100.0, 50.0, 20.0, 95.0),
                "session-1",
                ProcessOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }
    assert_eq!(pipeline.circuit_state(), CircuitState::Open);

    let calls = 100;
    let started = Instant::now();
    for _ in 0..calls {
        let result = pipeline
            .process_incoming_data(
                accel("imu-1", 100.0, 50.0, 20.0, 95.0),
                "session-1",
                ProcessOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(AlertError::PipelineUnavailable)));
    }
    assert!(started.elapsed() / calls < Duration::from_millis(1));
}

#[tokio::test]
async fn test_baselines_round_trip() {
    let (pipeline, _) = pipeline_with(config());
    for value in [100.0, 110.0, 120.0] {
        pipeline
            .process_incoming_data(
                accel("imu-1", value, 50.0, 20.0, 95.0),
                "session-1",
                ProcessOptions::calibration(),
            )
            .await
            .unwrap();
    }
    let saved = pipeline.save_baselines().unwrap();

    let (restored, _) = pipeline_with(config());
    assert_eq!(restored.load_baselines(&saved).unwrap(), 1);
    assert_eq!(restored.save_baselines().unwrap(), saved);
    assert!(restored.load_baselines("{\"version\":\"other\",\"baselines\":{}}").is_err());
}
