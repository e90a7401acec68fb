//! Core types for the Synheart Sentinel pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: sensor readings, derived metrics, alert candidates, and alerts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Class of sensor that produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingType {
    /// Tri-axial accelerometer (impact / load)
    Accelerometer,
    /// Pressure insole with left/right lateral channels
    Pressure,
    /// Distance sensor pair (stance width)
    Distance,
    /// EMG, heart rate and similar physiological channels
    Physiological,
}

impl ReadingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingType::Accelerometer => "accelerometer",
            ReadingType::Pressure => "pressure",
            ReadingType::Distance => "distance",
            ReadingType::Physiological => "physiological",
        }
    }
}

/// A single named channel value within a reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelValue {
    pub name: String,
    pub value: f64,
}

impl ChannelValue {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Raw sensor reading batch as delivered by the ingestion boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Sensor identifier
    pub sensor_id: String,
    /// When the reading was taken (UTC)
    pub timestamp: DateTime<Utc>,
    /// Class of sensor
    pub reading_type: ReadingType,
    /// Ordered channel values
    pub channels: Vec<ChannelValue>,
    /// Data quality score (0-100)
    pub data_quality: f64,
}

impl SensorReading {
    /// Create a reading stamped with the current time
    pub fn new(
        sensor_id: impl Into<String>,
        reading_type: ReadingType,
        channels: Vec<ChannelValue>,
        data_quality: f64,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp: Utc::now(),
            reading_type,
            channels,
            data_quality,
        }
    }

    /// Raw channel values in order
    pub fn values(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.value).collect()
    }
}

/// Named scalar metrics derived from readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PeakForce,
    MeanAcceleration,
    BalanceRatio,
    Asymmetry,
    StanceWidth,
    SignalMean,
    Strain,
    /// Relative deviation from the sensor baseline (anomaly detector only)
    Fatigue,
    /// Multivariate baseline distance (anomaly detector only)
    CompositeDeviation,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::PeakForce => "peak_force",
            Metric::MeanAcceleration => "mean_acceleration",
            Metric::BalanceRatio => "balance_ratio",
            Metric::Asymmetry => "asymmetry",
            Metric::StanceWidth => "stance_width",
            Metric::SignalMean => "signal_mean",
            Metric::Strain => "strain",
            Metric::Fatigue => "fatigue",
            Metric::CompositeDeviation => "composite_deviation",
        }
    }

    /// Alert category raised for this metric
    pub fn alert_type(&self) -> AlertType {
        match self {
            Metric::SignalMean | Metric::Strain | Metric::Fatigue => AlertType::Physiological,
            _ => AlertType::Biomechanical,
        }
    }

    /// Alert category for a metric seen on a given sensor class.
    /// Baseline-derived metrics follow the sensor rather than the metric.
    pub fn alert_type_for(&self, reading_type: ReadingType) -> AlertType {
        match self {
            Metric::Fatigue | Metric::CompositeDeviation => match reading_type {
                ReadingType::Physiological => AlertType::Physiological,
                _ => AlertType::Biomechanical,
            },
            _ => self.alert_type(),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric values for one reading, ordered by metric
pub type MetricMap = BTreeMap<Metric, f64>;

/// A single metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub sensor_id: String,
    pub metric: Metric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Biomechanical,
    Physiological,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Biomechanical => "biomechanical",
            AlertType::Physiological => "physiological",
        }
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Numeric rank (LOW = 1 .. CRITICAL = 4)
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

/// Lifecycle status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Dismissed,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Dismissed => "DISMISSED",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    /// Dismissed and resolved alerts are terminal.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (AlertStatus::Active, AlertStatus::Acknowledged)
                | (AlertStatus::Active, AlertStatus::Dismissed)
                | (AlertStatus::Active, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Dismissed)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
        )
    }
}

/// Direction of a metric relative to its historical baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

/// Trend of the alerting metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// |current - baseline| / baseline
    pub rate: f64,
}

/// Context attached to every alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    pub metric: Metric,
    pub current_value: f64,
    /// Configured threshold or baseline reference that was exceeded
    pub threshold: Option<f64>,
    /// Mean of the historical window (or baseline mean for anomaly-only alerts)
    pub historical_baseline: Option<f64>,
    pub deviation_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    pub trend: Trend,
    /// Analysis time window in seconds
    pub time_window_secs: u64,
    pub risk_factors: Vec<String>,
    pub recommendation: String,
}

/// A fully-formed alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub session_id: String,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Blended confidence (0-1)
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub context: AlertContext,
}

impl Alert {
    pub fn metric(&self) -> Metric {
        self.context.metric
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Threshold breach produced by the threshold analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCandidate {
    pub metric: Metric,
    pub current_value: f64,
    pub threshold: f64,
    pub deviation_percent: f64,
    pub z_score: f64,
    pub severity: Severity,
    /// min(tanh(|z|/2), 1)
    pub raw_confidence: f64,
}

/// Kind of anomaly check that fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Mahalanobis-style distance from the sensor baseline
    Multivariate,
    ForceCeiling,
    Asymmetry,
    Strain,
    Fatigue,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Multivariate => "multivariate_deviation",
            AnomalyKind::ForceCeiling => "force_ceiling",
            AnomalyKind::Asymmetry => "asymmetry_limit",
            AnomalyKind::Strain => "physiological_strain",
            AnomalyKind::Fatigue => "fatigue",
        }
    }
}

/// Deviation produced by the anomaly detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCandidate {
    pub kind: AnomalyKind,
    pub metric: Metric,
    pub current_value: f64,
    /// Limit or baseline value the metric was compared against
    pub reference: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    pub deviation_percent: f64,
    pub severity: Severity,
    pub raw_confidence: f64,
}

/// Candidate emitted by either analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AlertCandidate {
    Threshold(ThresholdCandidate),
    Anomaly(AnomalyCandidate),
}

impl AlertCandidate {
    pub fn metric(&self) -> Metric {
        match self {
            AlertCandidate::Threshold(c) => c.metric,
            AlertCandidate::Anomaly(c) => c.metric,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertCandidate::Threshold(c) => c.severity,
            AlertCandidate::Anomaly(c) => c.severity,
        }
    }

    pub fn current_value(&self) -> f64 {
        match self {
            AlertCandidate::Threshold(c) => c.current_value,
            AlertCandidate::Anomaly(c) => c.current_value,
        }
    }

    pub fn deviation_percent(&self) -> f64 {
        match self {
            AlertCandidate::Threshold(c) => c.deviation_percent,
            AlertCandidate::Anomaly(c) => c.deviation_percent,
        }
    }

    pub fn raw_confidence(&self) -> f64 {
        match self {
            AlertCandidate::Threshold(c) => c.raw_confidence,
            AlertCandidate::Anomaly(c) => c.raw_confidence,
        }
    }
}

/// Per-call processing options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Treat this reading as a calibration event and fold it into the baseline
    pub calibrate: bool,
    /// Static thresholds that override the configured rule for this call
    pub threshold_overrides: BTreeMap<Metric, f64>,
}

impl ProcessOptions {
    pub fn calibration() -> Self {
        Self {
            calibrate: true,
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, metric: Metric, threshold: f64) -> Self {
        self.threshold_overrides.insert(metric, threshold);
        self
    }
}

/// Subscriber filter. An empty filter receives every alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub types: Option<Vec<AlertType>>,
    pub min_severity: Option<Severity>,
    pub session_id: Option<String>,
}

impl AlertFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn with_types(mut self, types: Vec<AlertType>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&alert.alert_type) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if alert.severity < min {
                return false;
            }
        }
        if let Some(session) = &self.session_id {
            if session != &alert.session_id {
                return false;
            }
        }
        true
    }
}

/// Inclusive time range for metric queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The trailing window ending now
    pub fn last(window: Duration) -> Self {
        let end = Utc::now();
        Self {
            start: end - window,
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Aggregate alert metrics over a time range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertMetrics {
    pub total_alerts: u64,
    /// Mean receipt-to-dispatch latency in milliseconds
    pub average_latency_ms: f64,
    pub alerts_by_type: BTreeMap<AlertType, u64>,
    pub alerts_by_severity: BTreeMap<Severity, u64>,
}
