//! Pipeline configuration
//!
//! Every section has serde defaults, so a config file only needs to name the
//! values it changes.

use crate::error::AlertError;
use crate::types::{Metric, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub extractor: ExtractorConfig,
    pub threshold: ThresholdConfig,
    pub anomaly: AnomalyConfig,
    pub synthesis: SynthesisConfig,
    pub correlation: CorrelationConfig,
    pub breaker: BreakerConfig,
    pub subscription: SubscriptionConfig,
    pub persistence: PersistenceConfig,
}

/// Metric extractor quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Readings below this data quality (0-100) are dropped
    pub min_data_quality: f64,
    /// Body-mass scale applied to accelerometer peak force
    pub force_scale: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_data_quality: 80.0,
            force_scale: 1.0,
        }
    }
}

/// How the threshold for a metric is resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    /// Fixed threshold
    Static(f64),
    /// `max(floor, mean + sigma * std_dev)` over the historical window
    Dynamic { sigma: f64, floor: f64 },
}

/// Threshold analyzer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Historical window length per (sensor, metric)
    pub window_size: usize,
    /// Minimum statistical confidence for a candidate to be promoted
    pub confidence_floor: f64,
    /// Lower bound applied to the window standard deviation in z-scores
    pub std_dev_floor: f64,
    pub rules: BTreeMap<Metric, ThresholdRule>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        let dynamic = ThresholdRule::Dynamic {
            sigma: 2.0,
            floor: 0.0,
        };
        let rules = BTreeMap::from([
            (Metric::PeakForce, ThresholdRule::Static(850.0)),
            (Metric::Asymmetry, ThresholdRule::Static(10.0)),
            (Metric::Strain, ThresholdRule::Static(2500.0)),
            (Metric::MeanAcceleration, dynamic),
            (Metric::BalanceRatio, dynamic),
            (Metric::StanceWidth, dynamic),
            (Metric::SignalMean, dynamic),
        ]);

        Self {
            window_size: 100,
            confidence_floor: 0.85,
            std_dev_floor: 1.0,
            rules,
        }
    }
}

/// Anomaly detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Weight of the incoming vector in baseline updates (new = (1-a)*old + a*incoming)
    pub smoothing: f64,
    /// Baseline updates required before distance and fatigue checks run
    pub min_baseline_samples: u32,
    /// Distance at which a multivariate candidate is raised
    pub distance_threshold: f64,
    /// Minimum tanh(d/2) for a multivariate candidate
    pub confidence_floor: f64,
    /// Singular values below this are treated as zero in the pseudo-inverse
    pub pinv_epsilon: f64,
    /// Variance used for identity-scaled fallback covariance
    pub variance_floor: f64,
    /// Absolute force ceiling, matching the static peak force threshold (always HIGH)
    pub force_ceiling: f64,
    /// Left/right asymmetry limit in percent of the mean (MEDIUM)
    pub asymmetry_limit_pct: f64,
    /// Physiological strain limit, mean x std-dev (HIGH)
    pub strain_limit: f64,
    /// Fatigue score limit in percent (MEDIUM)
    pub fatigue_limit_pct: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.3,
            min_baseline_samples: 3,
            distance_threshold: 3.0,
            confidence_floor: 0.85,
            pinv_epsilon: 1e-9,
            variance_floor: 1.0,
            force_ceiling: 850.0,
            asymmetry_limit_pct: 20.0,
            strain_limit: 4000.0,
            fatigue_limit_pct: 25.0,
        }
    }
}

/// Alert synthesizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Analysis time window reported in alert context
    pub analysis_window_secs: u64,
    pub data_quality_weight: f64,
    pub deviation_weight: f64,
    pub consistency_weight: f64,
    /// Consistency used when the window holds too little history
    pub fallback_consistency: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            analysis_window_secs: 300,
            data_quality_weight: 0.4,
            deviation_weight: 0.3,
            consistency_weight: 0.3,
            fallback_consistency: 0.85,
        }
    }
}

/// Deduplication and correlation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Sliding window for merging alerts with the same key
    pub window_ms: u64,
    /// Alerts kept in memory (oldest evicted first)
    pub max_tracked_alerts: usize,
    /// Active alerts at or above this confidence are priority alerts
    pub priority_confidence: f64,
    /// Active alerts at or above this severity are priority alerts
    pub priority_severity: Severity,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            max_tracked_alerts: 1_000,
            priority_confidence: 0.9,
            priority_severity: Severity::High,
        }
    }
}

impl CorrelationConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.window_ms as i64)
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Budget for analyze -> synthesize -> distribute
    pub timeout_ms: u64,
    /// Failure ratio at which the breaker opens
    pub error_rate_threshold: f64,
    /// Span of the rolling outcome window
    pub rolling_window_ms: u64,
    /// Outcomes required in the window before the ratio is evaluated
    pub minimum_calls: usize,
    /// Time spent open before a half-open trial call
    pub cool_down_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 90,
            error_rate_threshold: 0.5,
            rolling_window_ms: 10_000,
            minimum_calls: 5,
            cool_down_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

/// Subscriber channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub max_subscribers: usize,
    /// Alerts buffered per subscriber before new ones are dropped for it
    pub channel_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 256,
            channel_capacity: 1_024,
        }
    }
}

/// Persistence retry and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Alerts older than this are eligible for housekeeping
    pub retention_days: u32,
    /// Jobs waiting for the persistence worker; overflow is abandoned
    pub queue_capacity: usize,
    /// Failed jobs retrying concurrently; failures beyond this are abandoned
    pub max_pending_retries: usize,
    /// Latency records kept for metrics queries
    pub metrics_capacity: usize,
}

impl PersistenceConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
            retention_days: 90,
            queue_capacity: 1_024,
            max_pending_retries: 256,
            metrics_capacity: 10_000,
        }
    }
}

impl SentinelConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, AlertError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, AlertError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, AlertError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), AlertError> {
        if !(0.0..=100.0).contains(&self.extractor.min_data_quality) {
            return Err(AlertError::Config(
                "extractor.min_data_quality must be within 0-100".to_string(),
            ));
        }
        if !(self.extractor.force_scale > 0.0) {
            return Err(AlertError::Config(
                "extractor.force_scale must be positive".to_string(),
            ));
        }
        if self.threshold.window_size < 2 {
            return Err(AlertError::Config(
                "threshold.window_size must be at least 2".to_string(),
            ));
        }
        for (name, floor) in [
            ("threshold.confidence_floor", self.threshold.confidence_floor),
            ("anomaly.confidence_floor", self.anomaly.confidence_floor),
            ("correlation.priority_confidence", self.correlation.priority_confidence),
            ("breaker.error_rate_threshold", self.breaker.error_rate_threshold),
        ] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(AlertError::Config(format!("{name} must be within 0-1")));
            }
        }
        if self.threshold.std_dev_floor <= 0.0 {
            return Err(AlertError::Config(
                "threshold.std_dev_floor must be positive".to_string(),
            ));
        }
        if !(0.0 < self.anomaly.smoothing && self.anomaly.smoothing <= 1.0) {
            return Err(AlertError::Config(
                "anomaly.smoothing must be within (0, 1]".to_string(),
            ));
        }
        let weights = self.synthesis.data_quality_weight
            + self.synthesis.deviation_weight
            + self.synthesis.consistency_weight;
        if (weights - 1.0).abs() > 1e-6 {
            return Err(AlertError::Config(format!(
                "synthesis weights must sum to 1.0, got {weights}"
            )));
        }
        if self.correlation.max_tracked_alerts == 0 {
            return Err(AlertError::Config(
                "correlation.max_tracked_alerts must be positive".to_string(),
            ));
        }
        if self.subscription.channel_capacity == 0 {
            return Err(AlertError::Config(
                "subscription.channel_capacity must be positive".to_string(),
            ));
        }
        if self.persistence.queue_capacity == 0 {
            return Err(AlertError::Config(
                "persistence.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
