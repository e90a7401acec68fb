//! Alert synthesis
//!
//! Merges threshold and anomaly candidates into alerts, one per metric. Each
//! alert gets a fresh id, the current timestamp, ACTIVE status, the highest
//! candidate severity, a trend/context block and a blended confidence score:
//!
//! `confidence = 0.4 * quality + 0.3 * min(|deviation| / 100, 1) + 0.3 * consistency`
//!
//! Consistency is `1 / (1 + CV)` over the metric's historical window. When the
//! window holds fewer than two samples, or the metric has no window (fatigue,
//! composite deviation), the configured fallback (0.85) stands in. The fallback
//! is an approximation, not a measured stability.

use crate::anomaly::AnomalyReport;
use crate::config::SynthesisConfig;
use crate::threshold::ThresholdReport;
use crate::types::{
    Alert, AlertCandidate, AlertContext, AlertStatus, AnomalyKind, Metric, ReadingType, Severity,
    Trend, TrendDirection,
};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything the synthesizer needs from one processed reading
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub session_id: &'a str,
    pub sensor_id: &'a str,
    pub reading_type: ReadingType,
    pub data_quality: f64,
    pub threshold: &'a ThresholdReport,
    pub anomaly: &'a AnomalyReport,
}

/// Alert synthesizer
#[derive(Debug, Clone, Default)]
pub struct AlertSynthesizer {
    config: SynthesisConfig,
}

impl AlertSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Build one alert per metric with at least one candidate
    pub fn synthesize(&self, input: SynthesisInput<'_>) -> Vec<Alert> {
        let mut grouped: BTreeMap<Metric, Vec<AlertCandidate>> = BTreeMap::new();
        let threshold = input.threshold.candidates.iter().cloned().map(AlertCandidate::Threshold);
        let anomaly = input.anomaly.candidates.iter().cloned().map(AlertCandidate::Anomaly);
        for candidate in threshold.chain(anomaly) {
            grouped.entry(candidate.metric()).or_default().push(candidate);
        }

        grouped
            .into_iter()
            .map(|(metric, candidates)| self.build_alert(metric, &candidates, &input))
            .collect()
    }

    fn build_alert(&self, metric: Metric, candidates: &[AlertCandidate], input: &SynthesisInput<'_>) -> Alert {
        let primary = primary_candidate(candidates);
        let severity = primary.severity();
        let current_value = primary.current_value();
        let deviation_percent = primary.deviation_percent();

        let threshold_candidate = candidates.iter().find_map(|c| match c {
            AlertCandidate::Threshold(t) => Some(t),
            AlertCandidate::Anomaly(_) => None,
        });
        let threshold = match primary {
            AlertCandidate::Threshold(t) => Some(t.threshold),
            AlertCandidate::Anomaly(a) => Some(a.reference),
        };
        let distance = candidates.iter().find_map(|c| match c {
            AlertCandidate::Anomaly(a) => a.distance,
            AlertCandidate::Threshold(_) => None,
        });

        let window = input.threshold.stats.get(&metric).filter(|s| s.is_sufficient());
        let historical_baseline = window.map(|s| s.mean).or_else(|| {
            input
                .anomaly
                .baseline
                .as_ref()
                .and_then(|b| b.mean_of(metric))
        });
        let consistency = window
            .and_then(|s| s.consistency())
            .unwrap_or(self.config.fallback_consistency);

        let confidence_score = self.confidence(input.data_quality, deviation_percent, consistency);
        let alert_type = metric.alert_type_for(input.reading_type);

        let message = format!(
            "{} {} alert: {} at {:.2} ({:+.1}% over {:.2})",
            severity.as_str(),
            alert_type.as_str(),
            metric,
            current_value,
            deviation_percent,
            threshold.unwrap_or(current_value),
        );

        Alert {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            status: AlertStatus::Active,
            session_id: input.session_id.to_string(),
            sensor_id: input.sensor_id.to_string(),
            timestamp: Utc::now(),
            message,
            confidence_score,
            correlation_id: None,
            context: AlertContext {
                metric,
                current_value,
                threshold,
                historical_baseline,
                deviation_percent,
                z_score: threshold_candidate.map(|t| t.z_score),
                distance,
                trend: trend(current_value, historical_baseline),
                time_window_secs: self.config.analysis_window_secs,
                risk_factors: candidates.iter().map(risk_factor).collect(),
                recommendation: recommendation(metric, severity).to_string(),
            },
        }
    }

    /// Weighted blend of data quality, deviation and consistency, clamped to [0, 1]
    pub fn confidence(&self, data_quality: f64, deviation_percent: f64, consistency: f64) -> f64 {
        let quality = (data_quality / 100.0).clamp(0.0, 1.0);
        let deviation = (deviation_percent.abs() / 100.0).min(1.0);
        let blended = self.config.data_quality_weight * quality
            + self.config.deviation_weight * deviation
            + self.config.consistency_weight * consistency.clamp(0.0, 1.0);

        if blended.is_finite() {
            blended.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Highest-severity candidate; on ties the first one (threshold before anomaly)
fn primary_candidate(candidates: &[AlertCandidate]) -> &AlertCandidate {
    let mut primary = &candidates[0];
    for candidate in &candidates[1..] {
        if candidate.severity() > primary.severity() {
            primary = candidate;
        }
    }
    primary
}

fn trend(current: f64, baseline: Option<f64>) -> Trend {
    match baseline {
        Some(b) => Trend {
            direction: if current > b {
                TrendDirection::Increasing
            } else {
                TrendDirection::Decreasing
            },
            rate: if b.abs() > f64::EPSILON {
                (current - b).abs() / b.abs()
            } else {
                0.0
            },
        },
        None => Trend {
            direction: TrendDirection::Increasing,
            rate: 0.0,
        },
    }
}

fn risk_factor(candidate: &AlertCandidate) -> String {
    match candidate {
        AlertCandidate::Threshold(t) => format!(
            "{} above threshold {:.2} (z-score {:.2})",
            t.metric, t.threshold, t.z_score
        ),
        AlertCandidate::Anomaly(a) => match a.kind {
            AnomalyKind::Multivariate => {
                format!("baseline distance {:.2} exceeds {:.2}", a.current_value, a.reference)
            }
            AnomalyKind::Fatigue => {
                format!("drift from baseline {:.1}% exceeds {:.1}%", a.current_value, a.reference)
            }
            kind => format!("{}: {:.2} exceeds limit {:.2}", kind.as_str(), a.current_value, a.reference),
        },
    }
}

fn recommendation(metric: Metric, severity: Severity) -> &'static str {
    let urgent = severity >= Severity::High;
    match metric {
        Metric::PeakForce | Metric::MeanAcceleration if urgent => {
            "Stop the activity and check for impact injury before resuming"
        }
        Metric::PeakForce | Metric::MeanAcceleration => "Reduce load intensity and monitor impact forces",
        Metric::Asymmetry | Metric::BalanceRatio => "Check gait balance and correct left/right loading",
        Metric::StanceWidth => "Review stance and foot placement",
        Metric::Strain | Metric::SignalMean if urgent => "Rest immediately and reassess physiological strain",
        Metric::Strain | Metric::SignalMean => "Reduce effort and monitor physiological signals",
        Metric::Fatigue => "Schedule a recovery break; performance is drifting from baseline",
        Metric::CompositeDeviation => "Movement pattern deviates from baseline; review technique",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnomalyCandidate, ThresholdCandidate};
    use crate::window::WindowStats;

    fn threshold_candidate(severity: Severity) -> ThresholdCandidate {
        ThresholdCandidate {
            metric: Metric::PeakForce,
            current_value: 900.0,
            threshold: 850.0,
            deviation_percent: 50.0 / 850.0 * 100.0,
            z_score: 4.0,
            severity,
            raw_confidence: 0.96,
        }
    }

    fn ceiling_candidate() -> AnomalyCandidate {
        AnomalyCandidate {
            kind: AnomalyKind::ForceCeiling,
            metric: Metric::PeakForce,
            current_value: 1300.0,
            reference: 850.0,
            distance: None,
            deviation_percent: 450.0 / 850.0 * 100.0,
            severity: Severity::High,
            raw_confidence: 0.9,
        }
    }

    fn input<'a>(threshold: &'a ThresholdReport, anomaly: &'a AnomalyReport) -> SynthesisInput<'a> {
        SynthesisInput {
            session_id: "session-1",
            sensor_id: "sensor-1",
            reading_type: ReadingType::Accelerometer,
            data_quality: 95.0,
            threshold,
            anomaly,
        }
    }

    #[test]
    fn test_merges_candidates_per_metric() {
        let threshold = ThresholdReport {
            candidates: vec![threshold_candidate(Severity::Medium)],
            stats: BTreeMap::from([(
                Metric::PeakForce,
                WindowStats {
                    mean: 500.0,
                    std_dev: 100.0,
                    count: 10,
                },
            )]),
        };
        let anomaly = AnomalyReport {
            candidates: vec![ceiling_candidate()],
            ..Default::default()
        };

        let alerts = AlertSynthesizer::default().synthesize(input(&threshold, &anomaly));
        assert_eq!(alerts.len(), 1);

        let alert = &alerts[0];
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.context.historical_baseline, Some(500.0));
        assert_eq!(alert.context.z_score, Some(4.0));
        assert_eq!(alert.context.risk_factors.len(), 2);
        assert_eq!(alert.context.trend.direction, TrendDirection::Increasing);
        assert_eq!(alert.context.time_window_secs, 300);
    }

    #[test]
    fn test_confidence_blend() {
        let synth = AlertSynthesizer::default();
        // 0.4 * 0.9 + 0.3 * 0.5 + 0.3 * 0.8
        assert!((synth.confidence(90.0, 50.0, 0.8) - 0.75).abs() < 1e-9);
        assert_eq!(synth.confidence(100.0, 500.0, 1.0), 1.0);
        assert_eq!(synth.confidence(f64::NAN, 10.0, 0.85), 0.0);
        assert!(synth.confidence(-40.0, -10.0, -3.0) >= 0.0);
    }

    #[test]
    fn test_fallback_consistency_without_history() {
        let threshold = ThresholdReport {
            candidates: vec![threshold_candidate(Severity::High)],
            ..Default::default()
        };
        let anomaly = AnomalyReport::default();
        let alerts = AlertSynthesizer::default().synthesize(input(&threshold, &anomaly));

        let dev = 50.0 / 850.0;
        let expected = 0.4 * 0.95 + 0.3 * dev + 0.3 * 0.85;
        assert!((alerts[0].confidence_score - expected).abs() < 1e-9);
        assert_eq!(alerts[0].context.historical_baseline, None);
    }

    #[test]
    fn test_trend_rate() {
        let t = trend(75.0, Some(100.0));
        assert_eq!(t.direction, TrendDirection::Decreasing);
        assert!((t.rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_composite_alert_follows_sensor_class() {
        let threshold = ThresholdReport::default();
        let anomaly = AnomalyReport {
            candidates: vec![AnomalyCandidate {
                kind: AnomalyKind::Multivariate,
                metric: Metric::CompositeDeviation,
                current_value: 4.5,
                reference: 3.0,
                distance: Some(4.5),
                deviation_percent: 50.0,
                severity: Severity::High,
                raw_confidence: 0.97,
            }],
            ..Default::default()
        };
        let mut inp = input(&threshold, &anomaly);
        inp.reading_type = ReadingType::Physiological;

        let alerts = AlertSynthesizer::default().synthesize(inp);
        assert_eq!(alerts[0].alert_type, crate::types::AlertType::Physiological);
        assert_eq!(alerts[0].context.distance, Some(4.5));
    }
}
