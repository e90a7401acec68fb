//! Baseline management
//!
//! This module manages per-sensor multivariate baselines: an exponentially
//! weighted mean vector and covariance matrix over the metric vectors of
//! calibration readings. Baselines back the anomaly detector's distance check.
//!
//! A stored baseline is never mutated in place. Updates build a new `Baseline`
//! and swap the `Arc`, so readers always see a fully-formed value.

use crate::error::AlertError;
use crate::types::{Metric, MetricMap};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default weight of the incoming vector (new = 0.7 * old + 0.3 * incoming)
pub const DEFAULT_SMOOTHING: f64 = 0.3;

/// Snapshot format version for saved baselines
pub const BASELINE_SNAPSHOT_VERSION: &str = "sentinel.baselines.v1";

/// Weighted mean and covariance over a sensor's metric vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Metric for each row/column, sorted
    pub dimensions: Vec<Metric>,
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Number of vectors folded in, including the seed
    pub samples: u32,
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    /// Seed a baseline from a single vector with identity-scaled covariance
    pub fn seed(vector: &MetricMap, variance_floor: f64) -> Self {
        let dimensions: Vec<Metric> = vector.keys().copied().collect();
        let n = dimensions.len();
        Self {
            mean: DVector::from_iterator(n, vector.values().copied()),
            covariance: DMatrix::identity(n, n) * variance_floor,
            dimensions,
            samples: 1,
            updated_at: Utc::now(),
        }
    }

    /// Build the next baseline from an incoming vector.
    ///
    /// Metrics not yet tracked extend the baseline; tracked metrics missing
    /// from `vector` keep their current statistics.
    pub fn updated(&self, vector: &MetricMap, smoothing: f64, variance_floor: f64) -> Self {
        let extended = self.extend(vector, variance_floor);
        let n = extended.dimensions.len();
        let keep = 1.0 - smoothing;

        let present: Vec<(usize, f64)> = extended
            .dimensions
            .iter()
            .enumerate()
            .filter_map(|(i, m)| vector.get(m).map(|v| (i, *v)))
            .collect();

        // Deviations are taken against the previous mean
        let mut diff = vec![0.0; n];
        for &(i, value) in &present {
            diff[i] = value - extended.mean[i];
        }

        let mut mean = extended.mean.clone();
        let mut covariance = extended.covariance.clone();
        for &(i, value) in &present {
            mean[i] = keep * mean[i] + smoothing * value;
            for &(j, _) in &present {
                covariance[(i, j)] = keep * covariance[(i, j)] + smoothing * diff[i] * diff[j];
            }
        }

        // Cross terms against absent dimensions shrink by sqrt(keep), which is
        // a congruence scaling and keeps the matrix positive semi-definite
        let cross = keep.sqrt();
        for &(i, _) in &present {
            for j in (0..n).filter(|j| !present.iter().any(|(p, _)| p == j)) {
                covariance[(i, j)] *= cross;
                covariance[(j, i)] *= cross;
            }
        }

        if !is_well_formed(&mean, &covariance) {
            covariance = DMatrix::identity(n, n) * variance_floor;
        }

        Self {
            dimensions: extended.dimensions,
            mean,
            covariance,
            samples: self.samples.saturating_add(1),
            updated_at: Utc::now(),
        }
    }

    /// Copy of this baseline with any new metrics from `vector` appended
    fn extend(&self, vector: &MetricMap, variance_floor: f64) -> Self {
        let mut dimensions = self.dimensions.clone();
        for metric in vector.keys() {
            if !dimensions.contains(metric) {
                dimensions.push(*metric);
            }
        }
        dimensions.sort();
        if dimensions.len() == self.dimensions.len() {
            return self.clone();
        }

        let n = dimensions.len();
        let old_index: Vec<Option<usize>> = dimensions
            .iter()
            .map(|m| self.index_of(*m))
            .collect();

        let mean = DVector::from_iterator(
            n,
            dimensions.iter().zip(&old_index).map(|(m, old)| match old {
                Some(i) => self.mean[*i],
                None => vector.get(m).copied().unwrap_or(0.0),
            }),
        );
        let covariance = DMatrix::from_fn(n, n, |r, c| match (old_index[r], old_index[c]) {
            (Some(i), Some(j)) => self.covariance[(i, j)],
            _ if r == c => variance_floor,
            _ => 0.0,
        });

        Self {
            dimensions,
            mean,
            covariance,
            samples: self.samples,
            updated_at: self.updated_at,
        }
    }

    pub fn index_of(&self, metric: Metric) -> Option<usize> {
        self.dimensions.iter().position(|m| *m == metric)
    }

    /// Baseline mean of one metric
    pub fn mean_of(&self, metric: Metric) -> Option<f64> {
        self.index_of(metric).map(|i| self.mean[i])
    }

    /// Metrics present in both the baseline and `vector`, with their indices
    fn shared(&self, vector: &MetricMap) -> Vec<(usize, Metric, f64)> {
        self.dimensions
            .iter()
            .enumerate()
            .filter_map(|(i, m)| vector.get(m).map(|v| (i, *m, *v)))
            .collect()
    }

    /// Mahalanobis-style distance of `vector` from the baseline over the shared
    /// metrics, using the pseudo-inverse of the covariance.
    ///
    /// Returns `None` when no metric is shared.
    pub fn distance(&self, vector: &MetricMap, pinv_epsilon: f64, variance_floor: f64) -> Option<f64> {
        let shared = self.shared(vector);
        if shared.is_empty() {
            return None;
        }

        let k = shared.len();
        let diff = DVector::from_iterator(k, shared.iter().map(|(i, _, v)| v - self.mean[*i]));
        let sub = DMatrix::from_fn(k, k, |r, c| self.covariance[(shared[r].0, shared[c].0)]);

        let squared = match sub.pseudo_inverse(pinv_epsilon) {
            Ok(inverse) if inverse.iter().all(|v| v.is_finite()) => diff.dot(&(&inverse * &diff)),
            _ => diff.norm_squared() / variance_floor,
        };

        Some(squared.max(0.0).sqrt())
    }

    /// Mean absolute relative deviation from the baseline mean, in percent.
    /// Metrics whose baseline mean is zero are skipped.
    pub fn fatigue_score(&self, vector: &MetricMap) -> Option<f64> {
        let ratios: Vec<f64> = self
            .shared(vector)
            .into_iter()
            .filter(|(i, _, _)| self.mean[*i].abs() > f64::EPSILON)
            .map(|(i, _, v)| ((v - self.mean[i]) / self.mean[i]).abs())
            .collect();

        if ratios.is_empty() {
            return None;
        }
        Some(ratios.iter().sum::<f64>() / ratios.len() as f64 * 100.0)
    }
}

fn is_well_formed(mean: &DVector<f64>, covariance: &DMatrix<f64>) -> bool {
    mean.iter().all(|v| v.is_finite())
        && covariance.iter().all(|v| v.is_finite())
        && covariance.diagonal().iter().all(|v| *v >= 0.0)
        && min_eigenvalue(covariance) >= -PSD_TOLERANCE * covariance.diagonal().amax().max(1.0)
}

/// Relative slack for rounding when checking positive semi-definiteness
const PSD_TOLERANCE: f64 = 1e-9;

/// Smallest eigenvalue of a symmetric matrix, 0 for an empty one
fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.symmetric_eigenvalues().min()
}

/// Serialized form of a `BaselineStore`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub version: String,
    pub baselines: BTreeMap<String, Baseline>,
}

/// Per-sensor baselines
#[derive(Debug)]
pub struct BaselineStore {
    baselines: DashMap<String, Arc<Baseline>>,
    smoothing: f64,
    variance_floor: f64,
}

impl Default for BaselineStore {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING, 1.0)
    }
}

impl BaselineStore {
    pub fn new(smoothing: f64, variance_floor: f64) -> Self {
        Self {
            baselines: DashMap::new(),
            smoothing,
            variance_floor,
        }
    }

    /// Current baseline for a sensor
    pub fn get(&self, sensor_id: &str) -> Option<Arc<Baseline>> {
        self.baselines.get(sensor_id).map(|b| Arc::clone(b.value()))
    }

    /// Fold a vector into the sensor's baseline, seeding it if absent
    pub fn update(&self, sensor_id: &str, vector: &MetricMap) -> Arc<Baseline> {
        match self.baselines.entry(sensor_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = Arc::new(entry.get().updated(vector, self.smoothing, self.variance_floor));
                entry.insert(Arc::clone(&next));
                next
            }
            Entry::Vacant(entry) => {
                let seeded = Arc::new(Baseline::seed(vector, self.variance_floor));
                entry.insert(Arc::clone(&seeded));
                seeded
            }
        }
    }

    /// Seed a baseline for a sensor that has none. Returns true if seeded.
    pub fn seed_if_absent(&self, sensor_id: &str, vector: &MetricMap) -> bool {
        if vector.is_empty() {
            return false;
        }
        let mut seeded = false;
        self.baselines
            .entry(sensor_id.to_string())
            .or_insert_with(|| {
                seeded = true;
                Arc::new(Baseline::seed(vector, self.variance_floor))
            });
        seeded
    }

    pub fn remove(&self, sensor_id: &str) -> Option<Arc<Baseline>> {
        self.baselines.remove(sensor_id).map(|(_, b)| b)
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn snapshot(&self) -> BaselineSnapshot {
        BaselineSnapshot {
            version: BASELINE_SNAPSHOT_VERSION.to_string(),
            baselines: self
                .baselines
                .iter()
                .map(|e| (e.key().clone(), Baseline::clone(e.value())))
                .collect(),
        }
    }

    /// Serialize all baselines to JSON
    pub fn to_json(&self) -> Result<String, AlertError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Replace all baselines with the contents of a JSON snapshot
    pub fn load_json(&self, json: &str) -> Result<usize, AlertError> {
        let snapshot: BaselineSnapshot = serde_json::from_str(json)?;
        if snapshot.version != BASELINE_SNAPSHOT_VERSION {
            return Err(AlertError::ParseError(format!(
                "unsupported baseline snapshot version {}",
                snapshot.version
            )));
        }
        for (sensor_id, baseline) in &snapshot.baselines {
            let n = baseline.dimensions.len();
            if baseline.mean.len() != n || baseline.covariance.shape() != (n, n) {
                return Err(AlertError::ParseError(format!(
                    "baseline for {sensor_id} has mismatched dimensions"
                )));
            }
        }

        self.baselines.clear();
        let count = snapshot.baselines.len();
        for (sensor_id, baseline) in snapshot.baselines {
            self.baselines.insert(sensor_id, Arc::new(baseline));
        }
        Ok(count)
    }
}
