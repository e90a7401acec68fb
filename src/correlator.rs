//! Alert deduplication and correlation
//!
//! Alerts sharing (session, metric, type) inside a sliding correlation window
//! form one group with a shared correlation id. Only the highest-severity
//! member of a group is surfaced; the rest are kept as correlated entries.
//! When a more severe alert takes over a group, the previous primary is
//! resolved so a group never holds two active surfaced alerts.
//!
//! Lock order: a `groups` entry may be held while reading `alerts`, never the
//! reverse. The retention queue lock is never held across map access.

use crate::config::CorrelationConfig;
use crate::error::AlertError;
use crate::types::{Alert, AlertStatus, AlertType, Metric};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TrackedAlert {
    alert: Alert,
    surfaced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    session_id: String,
    metric: Metric,
    alert_type: AlertType,
}

impl GroupKey {
    fn of(alert: &Alert) -> Self {
        Self {
            session_id: alert.session_id.clone(),
            metric: alert.metric(),
            alert_type: alert.alert_type,
        }
    }
}

#[derive(Debug, Clone)]
struct Group {
    correlation_id: Uuid,
    primary: Uuid,
    last_seen: DateTime<Utc>,
}

/// Result of correlating a batch
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    /// Alerts to publish, stamped with their correlation id
    pub surfaced: Vec<Alert>,
    /// Former primaries resolved because a more severe alert replaced them
    pub superseded: Vec<Alert>,
}

/// Outcome of correlating one alert
enum Placement {
    Surfaced { correlation_id: Uuid, demoted: Option<Uuid> },
    Suppressed { correlation_id: Uuid },
}

/// Short-term alert cache with deduplication and correlation lookups
#[derive(Debug)]
pub struct Correlator {
    config: CorrelationConfig,
    alerts: DashMap<Uuid, TrackedAlert>,
    groups: DashMap<GroupKey, Group>,
    members: DashMap<Uuid, Vec<Uuid>>,
    order: Mutex<VecDeque<Uuid>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

impl Correlator {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            alerts: DashMap::new(),
            groups: DashMap::new(),
            members: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Track freshly synthesized alerts
    pub fn correlate(&self, alerts: Vec<Alert>) -> Correlation {
        let mut correlation = Correlation::default();

        for mut alert in alerts {
            let placement = self.place(&alert);
            let (correlation_id, is_surfaced) = match placement {
                Placement::Surfaced {
                    correlation_id,
                    demoted,
                } => {
                    if let Some(previous) = demoted.and_then(|id| self.supersede(id)) {
                        correlation.superseded.push(previous);
                    }
                    (correlation_id, true)
                }
                Placement::Suppressed { correlation_id } => {
                    debug!(
                        alert_id = %alert.id,
                        %correlation_id,
                        metric = alert.metric().as_str(),
                        "suppressed duplicate alert"
                    );
                    (correlation_id, false)
                }
            };

            alert.correlation_id = Some(correlation_id);
            self.members.entry(correlation_id).or_default().push(alert.id);
            self.alerts.insert(
                alert.id,
                TrackedAlert {
                    alert: alert.clone(),
                    surfaced: is_surfaced,
                },
            );
            self.retain(alert.id);

            if is_surfaced {
                correlation.surfaced.push(alert);
            }
        }

        correlation
    }

    /// Take a former primary off the surface and resolve it if still open
    fn supersede(&self, alert_id: Uuid) -> Option<Alert> {
        let mut previous = self.alerts.get_mut(&alert_id)?;
        previous.surfaced = false;
        if !previous.alert.status.can_transition_to(AlertStatus::Resolved) {
            return None;
        }
        previous.alert.status = AlertStatus::Resolved;
        debug!(alert_id = %alert_id, "primary superseded by a more severe alert");
        Some(previous.alert.clone())
    }

    fn place(&self, alert: &Alert) -> Placement {
        let window = self.config.window();

        match self.groups.entry(GroupKey::of(alert)) {
            Entry::Vacant(entry) => {
                let correlation_id = Uuid::new_v4();
                entry.insert(Group {
                    correlation_id,
                    primary: alert.id,
                    last_seen: alert.timestamp,
                });
                Placement::Surfaced {
                    correlation_id,
                    demoted: None,
                }
            }
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();

                if alert.timestamp - group.last_seen > window {
                    *group = Group {
                        correlation_id: Uuid::new_v4(),
                        primary: alert.id,
                        last_seen: alert.timestamp,
                    };
                    return Placement::Surfaced {
                        correlation_id: group.correlation_id,
                        demoted: None,
                    };
                }

                group.last_seen = alert.timestamp;
                let primary = self
                    .alerts
                    .get(&group.primary)
                    .filter(|p| p.alert.is_active())
                    .map(|p| p.alert.severity);

                match primary {
                    Some(severity) if alert.severity <= severity => Placement::Suppressed {
                        correlation_id: group.correlation_id,
                    },
                    Some(_) => {
                        let demoted = std::mem::replace(&mut group.primary, alert.id);
                        Placement::Surfaced {
                            correlation_id: group.correlation_id,
                            demoted: Some(demoted),
                        }
                    }
                    // Primary was closed out or evicted
                    None => {
                        group.primary = alert.id;
                        Placement::Surfaced {
                            correlation_id: group.correlation_id,
                            demoted: None,
                        }
                    }
                }
            }
        }
    }

    /// Record an alert in the retention queue and evict beyond the bound
    fn retain(&self, id: Uuid) {
        let evicted: Vec<Uuid> = {
            let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
            order.push_back(id);
            let excess = order.len().saturating_sub(self.config.max_tracked_alerts);
            order.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }

        for id in &evicted {
            let Some((_, tracked)) = self.alerts.remove(id) else {
                continue;
            };
            if let Some(cid) = tracked.alert.correlation_id {
                let empty = self
                    .members
                    .get_mut(&cid)
                    .map(|mut ids| {
                        ids.retain(|m| m != id);
                        ids.is_empty()
                    })
                    .unwrap_or(false);
                if empty {
                    self.members.remove(&cid);
                }
            }
        }
        self.groups.retain(|_, g| self.alerts.contains_key(&g.primary));
        debug!(evicted = evicted.len(), "evicted alerts from correlation cache");
    }

    /// Other alerts sharing this alert's correlation id, oldest first
    pub fn get_correlated_alerts(&self, alert_id: Uuid) -> Vec<Alert> {
        let Some(correlation_id) = self
            .alerts
            .get(&alert_id)
            .and_then(|t| t.alert.correlation_id)
        else {
            return Vec::new();
        };
        let ids = self
            .members
            .get(&correlation_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut correlated: Vec<Alert> = ids
            .iter()
            .filter(|id| **id != alert_id)
            .filter_map(|id| self.alerts.get(id).map(|t| t.alert.clone()))
            .collect();
        correlated.sort_by_key(|a| a.timestamp);
        correlated
    }

    /// Active surfaced alerts above the priority confidence or severity,
    /// most severe first, then most recent first
    pub fn get_priority_alerts(&self) -> Vec<Alert> {
        let mut priority: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|t| t.surfaced && t.alert.is_active())
            .filter(|t| {
                t.alert.confidence_score >= self.config.priority_confidence
                    || t.alert.severity >= self.config.priority_severity
            })
            .map(|t| t.alert.clone())
            .collect();

        priority.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        priority
    }

    pub fn get_alert(&self, alert_id: Uuid) -> Option<Alert> {
        self.alerts.get(&alert_id).map(|t| t.alert.clone())
    }

    /// Whether the alert surfaced (was not suppressed as a duplicate)
    pub fn is_surfaced(&self, alert_id: Uuid) -> bool {
        self.alerts.get(&alert_id).map(|t| t.surfaced).unwrap_or(false)
    }

    /// Apply a status transition to a tracked alert
    pub fn transition(&self, alert_id: Uuid, status: AlertStatus) -> Result<Alert, AlertError> {
        let mut tracked = self
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))?;

        let current = tracked.alert.status;
        if !current.can_transition_to(status) {
            return Err(AlertError::InvalidTransition {
                from: current.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        tracked.alert.status = status;
        Ok(tracked.alert.clone())
    }

    /// Active surfaced alerts, newest first
    pub fn active_surfaced(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|t| t.surfaced && t.alert.is_active())
            .map(|t| t.alert.clone())
            .collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        active
    }

    pub fn tracked_count(&self) -> usize {
        self.alerts.len()
    }
}
