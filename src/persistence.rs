//! Persistence collaborator contract and the asynchronous save path
//!
//! The pipeline never awaits persistence. Jobs are handed to a bounded queue
//! drained by a background worker that makes the first attempt in submission
//! order; failed jobs are retried on their own task with exponential backoff,
//! up to a cap on concurrent retries. Saves always write the newest known
//! version of an alert, so a status change made while a save is still being
//! retried is not overwritten by the stale copy.

use crate::config::PersistenceConfig;
use crate::error::AlertError;
use crate::types::{Alert, AlertType, Severity};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Result of a bulk status update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdateResult {
    pub updated: usize,
    /// Ids the store did not know about
    pub missing: Vec<Uuid>,
}

/// Storage collaborator for alerts.
///
/// Reads may lag writes (bounded staleness); callers must not assume strong
/// consistency.
#[async_trait]
pub trait AlertPersistence: Send + Sync {
    /// Store a new alert
    async fn save(&self, alert: &Alert) -> Result<(), AlertError>;

    /// Overwrite stored alerts with the given versions
    async fn bulk_update(&self, alerts: &[Alert]) -> Result<BulkUpdateResult, AlertError>;

    /// Active alerts at or above `min_severity`, optionally of one type
    async fn query_active(
        &self,
        alert_type: Option<AlertType>,
        min_severity: Severity,
    ) -> Result<Vec<Alert>, AlertError>;

    /// Delete alerts older than `retention`. Returns how many were removed.
    /// Stores that expire data on their own can keep the default.
    async fn purge_older_than(&self, _retention: ChronoDuration) -> Result<usize, AlertError> {
        Ok(0)
    }
}

/// Process-local store, used by the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<HashMap<Uuid, Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.alerts.read().ok()?.get(&id).cloned()
    }
}

#[async_trait]
impl AlertPersistence for InMemoryAlertStore {
    async fn save(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| AlertError::PersistenceFailure("store lock poisoned".to_string()))?;
        alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn bulk_update(&self, updates: &[Alert]) -> Result<BulkUpdateResult, AlertError> {
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| AlertError::PersistenceFailure("store lock poisoned".to_string()))?;

        let mut result = BulkUpdateResult::default();
        for alert in updates {
            match alerts.get_mut(&alert.id) {
                Some(stored) => {
                    *stored = alert.clone();
                    result.updated += 1;
                }
                None => result.missing.push(alert.id),
            }
        }
        Ok(result)
    }

    async fn query_active(
        &self,
        alert_type: Option<AlertType>,
        min_severity: Severity,
    ) -> Result<Vec<Alert>, AlertError> {
        let alerts = self
            .alerts
            .read()
            .map_err(|_| AlertError::PersistenceFailure("store lock poisoned".to_string()))?;

        let mut active: Vec<Alert> = alerts
            .values()
            .filter(|a| a.is_active() && a.severity >= min_severity)
            .filter(|a| alert_type.map(|t| t == a.alert_type).unwrap_or(true))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(active)
    }

    async fn purge_older_than(&self, retention: ChronoDuration) -> Result<usize, AlertError> {
        let cutoff = Utc::now() - retention;
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| AlertError::PersistenceFailure("store lock poisoned".to_string()))?;
        let before = alerts.len();
        alerts.retain(|_, a| a.timestamp >= cutoff);
        Ok(before - alerts.len())
    }
}

/// Exponential backoff for persistence retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PersistenceConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            multiplier: 2.0,
        }
    }

    /// Delay before retry `attempt` (0-indexed), or `None` when retries are exhausted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Some(Duration::from_millis(delay_ms as u64).min(self.max_delay))
    }
}

/// Work handed to the persistence worker
#[derive(Debug, Clone)]
pub enum PersistJob {
    Save(Alert),
    BulkUpdate(Vec<Alert>),
}

impl PersistJob {
    fn describe(&self) -> String {
        match self {
            PersistJob::Save(alert) => format!("save {}", alert.id),
            PersistJob::BulkUpdate(alerts) => format!("bulk update of {} alerts", alerts.len()),
        }
    }

    async fn run(&self, store: &dyn AlertPersistence, unsaved: &UnsavedAlerts) -> Result<(), AlertError> {
        match self {
            PersistJob::Save(alert) => save_latest(store, unsaved, alert.id).await,
            PersistJob::BulkUpdate(alerts) => {
                let result = store.bulk_update(alerts).await?;
                // Ids with a save still outstanding are written by that save
                let unknown = result
                    .missing
                    .iter()
                    .filter(|id| !unsaved.contains_key(*id))
                    .count();
                if unknown > 0 {
                    warn!(unknown, "bulk update skipped alerts the store does not hold");
                }
                Ok(())
            }
        }
    }
}

/// Latest version of every alert whose save has not completed yet
type UnsavedAlerts = DashMap<Uuid, Alert>;

/// Save the newest known version of an alert. Loops when a status change
/// lands while an older version is being written.
async fn save_latest(
    store: &dyn AlertPersistence,
    unsaved: &UnsavedAlerts,
    alert_id: Uuid,
) -> Result<(), AlertError> {
    loop {
        let Some(current) = unsaved.get(&alert_id).map(|a| a.value().clone()) else {
            return Ok(());
        };
        store.save(&current).await?;
        if unsaved
            .remove_if(&alert_id, |_, latest| *latest == current)
            .is_some()
        {
            return Ok(());
        }
    }
}

/// Persistence counters
#[derive(Debug, Default)]
pub struct PersistenceStats {
    completed: AtomicU64,
    failed_attempts: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of `PersistenceStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSnapshot {
    pub completed: u64,
    pub failed_attempts: u64,
    pub abandoned: u64,
}

impl PersistenceStats {
    pub fn snapshot(&self) -> PersistenceSnapshot {
        PersistenceSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Shared state of the worker, its retry tasks and its handles
struct WorkerState {
    store: Arc<dyn AlertPersistence>,
    policy: RetryPolicy,
    unsaved: UnsavedAlerts,
    retry_slots: Arc<Semaphore>,
    stats: PersistenceStats,
}

impl std::fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerState")
            .field("policy", &self.policy)
            .field("unsaved", &self.unsaved.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl WorkerState {
    fn abandon(&self, job: &PersistJob) {
        if let PersistJob::Save(alert) = job {
            self.unsaved.remove(&alert.id);
        }
        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to the background persistence worker
#[derive(Debug, Clone)]
pub struct PersistenceWorker {
    sender: mpsc::Sender<PersistJob>,
    state: Arc<WorkerState>,
}

impl PersistenceWorker {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn AlertPersistence>, config: &PersistenceConfig) -> Self {
        let (sender, mut receiver) = mpsc::channel::<PersistJob>(config.queue_capacity.max(1));
        let state = Arc::new(WorkerState {
            store,
            policy: RetryPolicy::from_config(config),
            unsaved: UnsavedAlerts::new(),
            retry_slots: Arc::new(Semaphore::new(config.max_pending_retries)),
            stats: PersistenceStats::default(),
        });
        let worker = Arc::clone(&state);

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job.run(worker.store.as_ref(), &worker.unsaved).await {
                    Ok(()) => {
                        worker.stats.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        worker.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                        match Arc::clone(&worker.retry_slots).try_acquire_owned() {
                            Ok(slot) => {
                                warn!(job = %job.describe(), %err, "persistence failed, scheduling retry");
                                tokio::spawn(retry(job, Arc::clone(&worker), slot));
                            }
                            Err(_) => {
                                error!(job = %job.describe(), %err, "retry capacity exhausted, job abandoned");
                                worker.abandon(&job);
                            }
                        }
                    }
                }
            }
        });

        Self { sender, state }
    }

    /// Queue a job without waiting for it. A full queue abandons the job.
    pub fn submit(&self, job: PersistJob) {
        match &job {
            PersistJob::Save(alert) => {
                self.state.unsaved.insert(alert.id, alert.clone());
            }
            PersistJob::BulkUpdate(alerts) => {
                for alert in alerts {
                    if let Some(mut unsaved) = self.state.unsaved.get_mut(&alert.id) {
                        *unsaved = alert.clone();
                    }
                }
            }
        }

        if let Err(err) = self.sender.try_send(job) {
            let job = match err {
                TrySendError::Full(job) => {
                    error!(job = %job.describe(), "persistence queue full, job abandoned");
                    job
                }
                TrySendError::Closed(job) => {
                    error!(job = %job.describe(), "persistence worker stopped, job dropped");
                    job
                }
            };
            self.state.abandon(&job);
        }
    }

    pub fn stats(&self) -> PersistenceSnapshot {
        self.state.stats.snapshot()
    }

    /// Alerts whose save has not completed yet
    pub fn unsaved_count(&self) -> usize {
        self.state.unsaved.len()
    }
}

async fn retry(job: PersistJob, state: Arc<WorkerState>, _slot: OwnedSemaphorePermit) {
    let mut attempt = 0;
    while let Some(delay) = state.policy.delay_for_attempt(attempt) {
        tokio::time::sleep(delay).await;
        match job.run(state.store.as_ref(), &state.unsaved).await {
            Ok(()) => {
                state.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(job = %job.describe(), attempt = attempt + 1, "persistence retry succeeded");
                return;
            }
            Err(err) => {
                state.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                warn!(job = %job.describe(), attempt = attempt + 1, %err, "persistence retry failed");
            }
        }
        attempt += 1;
    }

    state.abandon(&job);
    error!(job = %job.describe(), "persistence retries exhausted, job abandoned");
}
