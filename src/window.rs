//! Historical window management
//!
//! Rolling per-(sensor, metric) windows of recent metric samples. Windows feed the
//! mean / standard deviation used for z-scores, dynamic thresholds and the
//! consistency term of the alert confidence.

use crate::types::{Metric, MetricSample};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default window length in samples
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Summary statistics of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    pub count: usize,
}

impl WindowStats {
    /// At least two samples are needed for a standard deviation
    pub fn is_sufficient(&self) -> bool {
        self.count >= 2
    }

    /// z-score of `value`, with the standard deviation floored at `std_dev_floor`.
    /// Returns 0 when history is insufficient.
    pub fn z_score(&self, value: f64, std_dev_floor: f64) -> f64 {
        if !self.is_sufficient() {
            return 0.0;
        }
        (value - self.mean) / self.std_dev.max(std_dev_floor)
    }

    /// Stability of the window: 1 / (1 + coefficient of variation)
    pub fn consistency(&self) -> Option<f64> {
        if !self.is_sufficient() || self.mean.abs() <= f64::EPSILON {
            return None;
        }
        let cv = self.std_dev / self.mean.abs();
        Some((1.0 / (1.0 + cv)).clamp(0.0, 1.0))
    }
}

/// Bounded FIFO of samples for one (sensor, metric)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalWindow {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl HistoricalWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn stats(&self) -> WindowStats {
        let count = self.samples.len();
        if count < 2 {
            return WindowStats {
                mean: 0.0,
                std_dev: 0.0,
                count,
            };
        }
        let n = count as f64;
        let mean = self.samples.iter().map(|s| s.value).sum::<f64>() / n;
        let sum_sq: f64 = self.samples.iter().map(|s| (s.value - mean).powi(2)).sum();
        WindowStats {
            mean,
            std_dev: (sum_sq / (n - 1.0)).sqrt(),
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    sensor_id: String,
    metric: Metric,
}

impl WindowKey {
    fn new(sensor_id: &str, metric: Metric) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            metric,
        }
    }
}

/// Sharded store of historical windows
#[derive(Debug)]
pub struct WindowStore {
    windows: DashMap<WindowKey, HistoricalWindow>,
    window_size: usize,
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl WindowStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window_size,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append a value to the (sensor, metric) window
    pub fn append(&self, sensor_id: &str, metric: Metric, value: f64, timestamp: DateTime<Utc>) {
        let capacity = self.window_size;
        self.windows
            .entry(WindowKey::new(sensor_id, metric))
            .or_insert_with(|| HistoricalWindow::new(capacity))
            .push(MetricSample {
                sensor_id: sensor_id.to_string(),
                metric,
                value,
                timestamp,
            });
    }

    /// Mean and standard deviation, or (0, 0) with fewer than two samples
    pub fn mean_and_std_dev(&self, sensor_id: &str, metric: Metric) -> (f64, f64) {
        let stats = self.stats(sensor_id, metric);
        (stats.mean, stats.std_dev)
    }

    pub fn stats(&self, sensor_id: &str, metric: Metric) -> WindowStats {
        self.windows
            .get(&WindowKey::new(sensor_id, metric))
            .map(|w| w.stats())
            .unwrap_or_default()
    }

    pub fn len(&self, sensor_id: &str, metric: Metric) -> usize {
        self.windows
            .get(&WindowKey::new(sensor_id, metric))
            .map(|w| w.len())
            .unwrap_or(0)
    }

    /// Drop every window belonging to a sensor
    pub fn clear_sensor(&self, sensor_id: &str) {
        self.windows.retain(|key, _| key.sensor_id != sensor_id);
    }

    /// Number of (sensor, metric) windows held
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history_sentinel() {
        let store = WindowStore::new(10);
        assert_eq!(store.mean_and_std_dev("s1", Metric::PeakForce), (0.0, 0.0));

        store.append("s1", Metric::PeakForce, 500.0, Utc::now());
        assert_eq!(store.mean_and_std_dev("s1", Metric::PeakForce), (0.0, 0.0));
        assert!(!store.stats("s1", Metric::PeakForce).is_sufficient());
    }

    #[test]
    fn test_z_score_never_divides_by_zero() {
        let store = WindowStore::new(10);
        // Zero and one sample: z is zero, not infinite
        assert_eq!(store.stats("s1", Metric::PeakForce).z_score(900.0, 1.0), 0.0);
        store.append("s1", Metric::PeakForce, 900.0, Utc::now());
        assert_eq!(store.stats("s1", Metric::PeakForce).z_score(900.0, 1.0), 0.0);

        // Two identical samples: std-dev 0 is floored to 1
        store.append("s1", Metric::PeakForce, 900.0, Utc::now());
        let z = store.stats("s1", Metric::PeakForce).z_score(905.0, 1.0);
        assert!(z.is_finite());
        assert!((z - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_rolling() {
        let store = WindowStore::new(3);
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            store.append("s1", Metric::StanceWidth, v, Utc::now());
        }

        assert_eq!(store.len("s1", Metric::StanceWidth), 3);
        let (mean, std_dev) = store.mean_and_std_dev("s1", Metric::StanceWidth);
        // Only 30, 40, 50 remain
        assert!((mean - 40.0).abs() < 1e-9);
        assert!((std_dev - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_windows_are_per_sensor_and_metric() {
        let store = WindowStore::new(10);
        store.append("s1", Metric::PeakForce, 1.0, Utc::now());
        store.append("s2", Metric::PeakForce, 1.0, Utc::now());
        store.append("s1", Metric::Asymmetry, 1.0, Utc::now());
        assert_eq!(store.window_count(), 3);

        store.clear_sensor("s1");
        assert_eq!(store.window_count(), 1);
        assert_eq!(store.len("s2", Metric::PeakForce), 1);
    }

    #[test]
    fn test_consistency() {
        let stable = WindowStats {
            mean: 100.0,
            std_dev: 0.0,
            count: 10,
        };
        assert_eq!(stable.consistency(), Some(1.0));

        let noisy = WindowStats {
            mean: 100.0,
            std_dev: 100.0,
            count: 10,
        };
        assert!((noisy.consistency().unwrap() - 0.5).abs() < 1e-9);

        assert_eq!(WindowStats::default().consistency(), None);
    }
}
