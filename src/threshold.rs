//! Threshold analysis
//!
//! Evaluates each extracted metric against its static or dynamic threshold and
//! against the z-score of its historical window. Every evaluated value is
//! appended to the window, breach or not.

use crate::config::{ThresholdConfig, ThresholdRule};
use crate::types::{Metric, MetricMap, Severity, ThresholdCandidate};
use crate::window::{WindowStats, WindowStore};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::trace;

/// Output of one threshold pass
#[derive(Debug, Clone, Default)]
pub struct ThresholdReport {
    pub candidates: Vec<ThresholdCandidate>,
    /// Window statistics per metric, taken before the current value was appended
    pub stats: BTreeMap<Metric, WindowStats>,
}

/// Threshold analyzer owning the historical windows
#[derive(Debug)]
pub struct ThresholdAnalyzer {
    config: ThresholdConfig,
    windows: WindowStore,
}

impl ThresholdAnalyzer {
    pub fn new(config: ThresholdConfig) -> Self {
        let windows = WindowStore::new(config.window_size);
        Self { config, windows }
    }

    pub fn windows(&self) -> &WindowStore {
        &self.windows
    }

    /// Analyze one reading's metrics for a sensor
    pub fn analyze(
        &self,
        sensor_id: &str,
        metrics: &MetricMap,
        timestamp: DateTime<Utc>,
        overrides: &BTreeMap<Metric, f64>,
    ) -> ThresholdReport {
        let mut report = ThresholdReport::default();

        for (&metric, &value) in metrics {
            let stats = self.windows.stats(sensor_id, metric);
            let threshold = self.resolve_threshold(metric, &stats, overrides);
            self.windows.append(sensor_id, metric, value, timestamp);
            report.stats.insert(metric, stats);

            let Some(threshold) = threshold else {
                continue;
            };
            if let Some(candidate) = self.evaluate(metric, value, threshold, &stats) {
                report.candidates.push(candidate);
            }
        }

        report
    }

    /// Threshold for a metric, or `None` when it cannot be resolved yet
    pub fn resolve_threshold(
        &self,
        metric: Metric,
        stats: &WindowStats,
        overrides: &BTreeMap<Metric, f64>,
    ) -> Option<f64> {
        if let Some(threshold) = overrides.get(&metric) {
            return Some(*threshold);
        }
        match self.config.rules.get(&metric)? {
            ThresholdRule::Static(threshold) => Some(*threshold),
            ThresholdRule::Dynamic { sigma, floor } => {
                if !stats.is_sufficient() {
                    return None;
                }
                Some(floor.max(stats.mean + sigma * stats.std_dev))
            }
        }
    }

    fn evaluate(
        &self,
        metric: Metric,
        value: f64,
        threshold: f64,
        stats: &WindowStats,
    ) -> Option<ThresholdCandidate> {
        // Deviation percent is undefined for non-positive thresholds
        if threshold <= 0.0 || value <= threshold {
            return None;
        }

        let deviation_percent = (value - threshold) / threshold * 100.0;
        let z_score = stats.z_score(value, self.config.std_dev_floor);
        let raw_confidence = confidence_from_z(z_score);

        if raw_confidence < self.config.confidence_floor {
            trace!(
                metric = metric.as_str(),
                value,
                threshold,
                z_score,
                raw_confidence,
                "breach below confidence floor"
            );
            return None;
        }

        Some(ThresholdCandidate {
            metric,
            current_value: value,
            threshold,
            deviation_percent,
            z_score,
            severity: classify_severity(deviation_percent, z_score),
            raw_confidence,
        })
    }
}

/// min(tanh(|z| / 2), 1)
pub fn confidence_from_z(z_score: f64) -> f64 {
    (z_score.abs() / 2.0).tanh().min(1.0)
}

/// Severity from deviation percent and z-score; first matching rule wins
pub fn classify_severity(deviation_percent: f64, z_score: f64) -> Severity {
    let z = z_score.abs();
    if deviation_percent >= 50.0 || z >= 3.0 {
        Severity::Critical
    } else if deviation_percent >= 25.0 || z >= 2.0 {
        Severity::High
    } else if deviation_percent >= 10.0 || z >= 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> ThresholdAnalyzer {
        ThresholdAnalyzer::new(ThresholdConfig::default())
    }

    fn force(value: f64) -> MetricMap {
        MetricMap::from([(Metric::PeakForce, value)])
    }

    fn warm_up(analyzer: &ThresholdAnalyzer, values: &[f64]) {
        for v in values {
            analyzer.analyze("s1", &force(*v), Utc::now(), &BTreeMap::new());
        }
    }

    #[test]
    fn test_severity_policy() {
        assert_eq!(classify_severity(60.0, 0.0), Severity::Critical);
        assert_eq!(classify_severity(0.0, -3.2), Severity::Critical);
        assert_eq!(classify_severity(30.0, 0.0), Severity::High);
        assert_eq!(classify_severity(5.9, 2.1), Severity::High);
        assert_eq!(classify_severity(12.0, 0.0), Severity::Medium);
        assert_eq!(classify_severity(1.0, 1.5), Severity::Medium);
        assert_eq!(classify_severity(5.0, 1.0), Severity::Low);
    }

    #[test]
    fn test_force_breach_with_history() {
        let analyzer = analyzer();
        warm_up(&analyzer, &[500.0, 505.0, 510.0, 515.0, 520.0]);

        let report = analyzer.analyze("s1", &force(900.0), Utc::now(), &BTreeMap::new());
        assert_eq!(report.candidates.len(), 1);

        let candidate = &report.candidates[0];
        assert_eq!(candidate.threshold, 850.0);
        assert!((candidate.deviation_percent - 5.882).abs() < 0.01);
        assert!(candidate.severity >= Severity::High);
        assert!(candidate.raw_confidence >= 0.85 && candidate.raw_confidence <= 1.0);

        // Stats are from before the 900 was appended
        assert!((report.stats[&Metric::PeakForce].mean - 510.0).abs() < 1e-9);
        assert_eq!(analyzer.windows().len("s1", Metric::PeakForce), 6);
    }

    #[test]
    fn test_no_history_gives_zero_z_and_no_candidate() {
        let analyzer = analyzer();
        let report = analyzer.analyze("s1", &force(900.0), Utc::now(), &BTreeMap::new());

        assert!(report.candidates.is_empty());
        // Evaluated value still lands in the window
        assert_eq!(analyzer.windows().len("s1", Metric::PeakForce), 1);
    }

    #[test]
    fn test_value_below_threshold_not_promoted() {
        let analyzer = analyzer();
        warm_up(&analyzer, &[100.0, 110.0, 120.0]);
        let report = analyzer.analyze("s1", &force(800.0), Utc::now(), &BTreeMap::new());
        assert!(report.candidates.is_empty());
    }

    #[test]
    fn test_override_replaces_rule() {
        let analyzer = analyzer();
        warm_up(&analyzer, &[100.0, 110.0, 120.0]);

        let overrides = BTreeMap::from([(Metric::PeakForce, 400.0)]);
        let report = analyzer.analyze("s1", &force(800.0), Utc::now(), &overrides);
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].threshold, 400.0);
        assert_eq!(report.candidates[0].severity, Severity::Critical);
    }

    #[test]
    fn test_dynamic_threshold_needs_history() {
        let analyzer = analyzer();
        let metric = MetricMap::from([(Metric::StanceWidth, 30.0)]);
        let stats = analyzer.windows().stats("s1", Metric::StanceWidth);
        assert_eq!(
            analyzer.resolve_threshold(Metric::StanceWidth, &stats, &BTreeMap::new()),
            None
        );

        for v in [20.0, 22.0, 18.0, 20.0] {
            analyzer.analyze("s1", &MetricMap::from([(Metric::StanceWidth, v)]), Utc::now(), &BTreeMap::new());
        }
        let report = analyzer.analyze("s1", &metric, Utc::now(), &BTreeMap::new());

        assert_eq!(report.candidates.len(), 1);
        let candidate = &report.candidates[0];
        // mean 20 + 2 * 1.633
        assert!((candidate.threshold - 23.266).abs() < 0.01);
        assert!(candidate.z_score > 3.0);
    }

    #[test]
    fn test_confidence_bounds() {
        for z in [0.0, 0.5, 2.5, 10.0, -40.0, 1e9] {
            let c = confidence_from_z(z);
            assert!((0.0..=1.0).contains(&c));
        }
    }
}
