//! Anomaly detection
//!
//! Compares each reading's metric vector with the sensor baseline using a
//! covariance-based distance, and layers fixed domain checks on top:
//! - Force above an absolute ceiling (HIGH)
//! - Left/right asymmetry above a percentage of the mean (MEDIUM)
//! - Physiological strain above its limit (HIGH)
//! - Fatigue, the mean relative deviation from the baseline mean (MEDIUM)
//!
//! Domain checks run on every reading. Distance and fatigue need a baseline
//! with enough samples; until then the detector reports insufficient history.

use crate::baseline::{Baseline, BaselineStore};
use crate::config::AnomalyConfig;
use crate::error::AlertError;
use crate::types::{AnomalyCandidate, AnomalyKind, Metric, MetricMap, Severity};
use std::sync::Arc;
use tracing::trace;

/// Output of one anomaly pass
#[derive(Debug, Clone, Default)]
pub struct AnomalyReport {
    pub candidates: Vec<AnomalyCandidate>,
    /// Distance from the baseline, when one could be computed
    pub distance: Option<f64>,
    /// Baseline the reading was compared against
    pub baseline: Option<Arc<Baseline>>,
}

/// Anomaly detector owning the per-sensor baselines
#[derive(Debug)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    baselines: BaselineStore,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        let baselines = BaselineStore::new(config.smoothing, config.variance_floor);
        Self { config, baselines }
    }

    pub fn baselines(&self) -> &BaselineStore {
        &self.baselines
    }

    /// Run all checks against a reading's metrics
    pub fn detect(&self, sensor_id: &str, metrics: &MetricMap, data_quality: f64) -> AnomalyReport {
        let mut report = AnomalyReport {
            candidates: self.domain_checks(metrics, data_quality),
            ..Default::default()
        };

        match self.sufficient_baseline(sensor_id) {
            Ok(baseline) => {
                report.distance = baseline.distance(
                    metrics,
                    self.config.pinv_epsilon,
                    self.config.variance_floor,
                );
                if let Some(candidate) = report.distance.and_then(|d| self.multivariate(d)) {
                    report.candidates.push(candidate);
                }
                if let Some(candidate) = self.fatigue(&baseline, metrics, data_quality) {
                    report.candidates.push(candidate);
                }
                report.baseline = Some(baseline);
            }
            Err(err) => {
                trace!(sensor_id, %err, "skipping baseline checks");
                report.baseline = self.baselines.get(sensor_id);
            }
        }

        report
    }

    /// Fold a metric vector into the sensor baseline
    pub fn update_baseline(&self, sensor_id: &str, metrics: &MetricMap) -> Arc<Baseline> {
        self.baselines.update(sensor_id, metrics)
    }

    /// Seed the sensor baseline if it has none
    pub fn seed_baseline(&self, sensor_id: &str, metrics: &MetricMap) -> bool {
        self.baselines.seed_if_absent(sensor_id, metrics)
    }

    /// Baseline with at least `min_baseline_samples` updates
    pub fn sufficient_baseline(&self, sensor_id: &str) -> Result<Arc<Baseline>, AlertError> {
        let baseline = self.baselines.get(sensor_id).ok_or_else(|| {
            AlertError::InsufficientHistory(format!("no baseline for sensor {sensor_id}"))
        })?;

        if baseline.samples < self.config.min_baseline_samples {
            return Err(AlertError::InsufficientHistory(format!(
                "baseline for sensor {} has {} of {} samples",
                sensor_id, baseline.samples, self.config.min_baseline_samples
            )));
        }
        Ok(baseline)
    }

    fn multivariate(&self, distance: f64) -> Option<AnomalyCandidate> {
        let threshold = self.config.distance_threshold;
        let confidence = (distance / 2.0).tanh();
        if distance < threshold || confidence < self.config.confidence_floor {
            return None;
        }

        Some(AnomalyCandidate {
            kind: AnomalyKind::Multivariate,
            metric: Metric::CompositeDeviation,
            current_value: distance,
            reference: threshold,
            distance: Some(distance),
            deviation_percent: percent_over(distance, threshold),
            severity: distance_severity(distance),
            raw_confidence: confidence,
        })
    }

    fn fatigue(
        &self,
        baseline: &Baseline,
        metrics: &MetricMap,
        data_quality: f64,
    ) -> Option<AnomalyCandidate> {
        let score = baseline.fatigue_score(metrics)?;
        let limit = self.config.fatigue_limit_pct;
        if score <= limit {
            return None;
        }

        Some(AnomalyCandidate {
            kind: AnomalyKind::Fatigue,
            metric: Metric::Fatigue,
            current_value: score,
            reference: limit,
            distance: None,
            deviation_percent: score,
            severity: Severity::Medium,
            raw_confidence: quality_confidence(data_quality),
        })
    }

    fn domain_checks(&self, metrics: &MetricMap, data_quality: f64) -> Vec<AnomalyCandidate> {
        let checks = [
            (AnomalyKind::ForceCeiling, Metric::PeakForce, self.config.force_ceiling, Severity::High),
            (AnomalyKind::Asymmetry, Metric::Asymmetry, self.config.asymmetry_limit_pct, Severity::Medium),
            (AnomalyKind::Strain, Metric::Strain, self.config.strain_limit, Severity::High),
        ];

        checks
            .into_iter()
            .filter_map(|(kind, metric, limit, severity)| {
                let value = *metrics.get(&metric)?;
                (value > limit).then(|| AnomalyCandidate {
                    kind,
                    metric,
                    current_value: value,
                    reference: limit,
                    distance: None,
                    deviation_percent: percent_over(value, limit),
                    severity,
                    raw_confidence: quality_confidence(data_quality),
                })
            })
            .collect()
    }
}

/// Severity bands for the multivariate distance
pub fn distance_severity(distance: f64) -> Severity {
    if distance >= 5.0 {
        Severity::Critical
    } else if distance >= 4.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

fn percent_over(value: f64, limit: f64) -> f64 {
    if limit.abs() <= f64::EPSILON {
        return 0.0;
    }
    (value - limit) / limit * 100.0
}

fn quality_confidence(data_quality: f64) -> f64 {
    (data_quality / 100.0).clamp(0.0, 1.0)
}
