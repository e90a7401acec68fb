//! Metric extraction
//!
//! This module derives named scalar metrics from raw sensor readings:
//! - Peak force and mean acceleration from accelerometers
//! - Balance ratio and left/right asymmetry from pressure insoles
//! - Stance width from distance sensors
//! - Signal mean and strain from physiological channels
//!
//! Readings that fail the quality gate are rejected with `AlertError::DataQuality`.

use crate::config::ExtractorConfig;
use crate::error::AlertError;
use crate::types::{ChannelValue, Metric, MetricMap, ReadingType, SensorReading};

/// Metric extractor for sensor readings
pub struct MetricExtractor;

impl MetricExtractor {
    /// Extract metrics from a reading
    pub fn extract(
        reading: &SensorReading,
        config: &ExtractorConfig,
    ) -> Result<MetricMap, AlertError> {
        check_quality(reading, config)?;

        let values = reading.values();
        let mut metrics = MetricMap::new();

        match reading.reading_type {
            ReadingType::Accelerometer => {
                metrics.insert(Metric::PeakForce, peak_abs(&values) * config.force_scale);
                metrics.insert(Metric::MeanAcceleration, mean_abs(&values));
            }
            ReadingType::Pressure => {
                let (left, right) = split_lateral(&reading.channels);
                let left_mean = mean(&left);
                let right_mean = mean(&right);

                metrics.insert(Metric::PeakForce, peak_abs(&values));
                metrics.insert(Metric::BalanceRatio, (left_mean + right_mean) / 2.0);
                metrics.insert(Metric::Asymmetry, asymmetry_pct(left_mean, right_mean));
            }
            ReadingType::Distance => {
                metrics.insert(Metric::StanceWidth, range(&values));
            }
            ReadingType::Physiological => {
                let m = mean(&values);
                metrics.insert(Metric::SignalMean, m);
                metrics.insert(Metric::Strain, m * std_dev(&values));
            }
        }

        Ok(metrics)
    }

    /// Minimum channel count for a reading type
    pub fn expected_channels(reading_type: ReadingType) -> usize {
        match reading_type {
            ReadingType::Accelerometer => 3,
            ReadingType::Pressure => 2,
            ReadingType::Distance => 2,
            ReadingType::Physiological => 1,
        }
    }
}

fn check_quality(reading: &SensorReading, config: &ExtractorConfig) -> Result<(), AlertError> {
    let expected = MetricExtractor::expected_channels(reading.reading_type);
    if reading.channels.len() < expected {
        return Err(AlertError::DataQuality(format!(
            "{} reading from {} has {} channels, expected at least {}",
            reading.reading_type.as_str(),
            reading.sensor_id,
            reading.channels.len(),
            expected
        )));
    }

    if !reading.data_quality.is_finite() || reading.data_quality < config.min_data_quality {
        return Err(AlertError::DataQuality(format!(
            "reading from {} has quality {:.1}, minimum is {:.1}",
            reading.sensor_id, reading.data_quality, config.min_data_quality
        )));
    }

    if let Some(channel) = reading.channels.iter().find(|c| !c.value.is_finite()) {
        return Err(AlertError::DataQuality(format!(
            "channel {} from {} is not a finite number",
            channel.name, reading.sensor_id
        )));
    }

    Ok(())
}

/// Split channels into left and right groups by name prefix.
/// Falls back to first half / second half when names carry no side.
fn split_lateral(channels: &[ChannelValue]) -> (Vec<f64>, Vec<f64>) {
    let side = |c: &ChannelValue, prefix: &str| c.name.to_ascii_lowercase().starts_with(prefix);

    let left: Vec<f64> = channels
        .iter()
        .filter(|c| side(c, "left") || side(c, "l_"))
        .map(|c| c.value)
        .collect();
    let right: Vec<f64> = channels
        .iter()
        .filter(|c| side(c, "right") || side(c, "r_"))
        .map(|c| c.value)
        .collect();

    if !left.is_empty() && !right.is_empty() {
        return (left, right);
    }

    let mid = channels.len() / 2;
    (
        channels[..mid].iter().map(|c| c.value).collect(),
        channels[mid..].iter().map(|c| c.value).collect(),
    )
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_abs(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64
}

fn peak_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

fn range(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    if values.is_empty() {
        0.0
    } else {
        max - min
    }
}

/// Population standard deviation of the channel values
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// |L - R| as a percentage of the mean of both sides
fn asymmetry_pct(left: f64, right: f64) -> f64 {
    let avg = (left.abs() + right.abs()) / 2.0;
    if avg <= f64::EPSILON {
        return 0.0;
    }
    ((left - right).abs() / avg) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(reading_type: ReadingType, channels: &[(&str, f64)], quality: f64) -> SensorReading {
        SensorReading::new(
            "sensor-1",
            reading_type,
            channels
                .iter()
                .map(|(n, v)| ChannelValue::new(*n, *v))
                .collect(),
            quality,
        )
    }

    #[test]
    fn test_accelerometer_peak_force() {
        let r = reading(
            ReadingType::Accelerometer,
            &[("x", 120.0), ("y", -900.0), ("z", 300.0)],
            95.0,
        );
        let metrics = MetricExtractor::extract(&r, &ExtractorConfig::default()).unwrap();

        assert_eq!(metrics[&Metric::PeakForce], 900.0);
        assert!((metrics[&Metric::MeanAcceleration] - 440.0).abs() < 1e-9);
    }

    #[test]
    fn test_force_scale_applies_to_accelerometer_only() {
        let config = ExtractorConfig {
            force_scale: 1.5,
            ..Default::default()
        };
        let accel = reading(
            ReadingType::Accelerometer,
            &[("x", 100.0), ("y", 0.0), ("z", 0.0)],
            95.0,
        );
        let metrics = MetricExtractor::extract(&accel, &config).unwrap();
        assert_eq!(metrics[&Metric::PeakForce], 150.0);

        let insole = reading(ReadingType::Pressure, &[("left", 100.0), ("right", 80.0)], 95.0);
        let metrics = MetricExtractor::extract(&insole, &config).unwrap();
        assert_eq!(metrics[&Metric::PeakForce], 100.0);
    }

    #[test]
    fn test_pressure_asymmetry() {
        let r = reading(
            ReadingType::Pressure,
            &[("left_heel", 110.0), ("left_toe", 90.0), ("right_heel", 60.0), ("right_toe", 40.0)],
            90.0,
        );
        let metrics = MetricExtractor::extract(&r, &ExtractorConfig::default()).unwrap();

        // left mean 100, right mean 50 -> |50| / 75 = 66.7%
        assert!((metrics[&Metric::Asymmetry] - 66.666).abs() < 0.01);
        assert!((metrics[&Metric::BalanceRatio] - 75.0).abs() < 1e-9);
        assert_eq!(metrics[&Metric::PeakForce], 110.0);
    }

    #[test]
    fn test_pressure_unnamed_channels_split_in_half() {
        let r = reading(ReadingType::Pressure, &[("a", 100.0), ("b", 100.0)], 90.0);
        let metrics = MetricExtractor::extract(&r, &ExtractorConfig::default()).unwrap();
        assert_eq!(metrics[&Metric::Asymmetry], 0.0);
    }

    #[test]
    fn test_distance_range() {
        let r = reading(ReadingType::Distance, &[("d1", 12.0), ("d2", 30.5), ("d3", 20.0)], 85.0);
        let metrics = MetricExtractor::extract(&r, &ExtractorConfig::default()).unwrap();
        assert!((metrics[&Metric::StanceWidth] - 18.5).abs() < 1e-9);
    }

    #[test]
    fn test_physiological_strain() {
        let r = reading(ReadingType::Physiological, &[("emg1", 10.0), ("emg2", 30.0)], 99.0);
        let metrics = MetricExtractor::extract(&r, &ExtractorConfig::default()).unwrap();

        // mean 20, population std-dev 10
        assert_eq!(metrics[&Metric::SignalMean], 20.0);
        assert!((metrics[&Metric::Strain] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_quality_rejected() {
        let r = reading(
            ReadingType::Accelerometer,
            &[("x", 1.0), ("y", 2.0), ("z", 3.0)],
            50.0,
        );
        let result = MetricExtractor::extract(&r, &ExtractorConfig::default());
        assert!(matches!(result, Err(AlertError::DataQuality(_))));
    }

    #[test]
    fn test_missing_channels_rejected() {
        let r = reading(ReadingType::Accelerometer, &[("x", 1.0), ("y", 2.0)], 99.0);
        let result = MetricExtractor::extract(&r, &ExtractorConfig::default());
        assert!(matches!(result, Err(AlertError::DataQuality(_))));
    }

    #[test]
    fn test_non_finite_channel_rejected() {
        let r = reading(ReadingType::Distance, &[("d1", f64::NAN), ("d2", 3.0)], 99.0);
        let result = MetricExtractor::extract(&r, &ExtractorConfig::default());
        assert!(matches!(result, Err(AlertError::DataQuality(_))));
    }
}
