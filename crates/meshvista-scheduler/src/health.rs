//! Consecutive-failure health tracking per collector.
//!
//! Counters live in the shared [`CollectorTable`], next to the running flags
//! the execution guard toggles. Alerts are log events only: one when a
//! collector reaches the failure threshold, then every `alert_every`th
//! failure once the count is past twice the threshold.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use meshvista_collectors::CollectorId;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::state::CollectorTable;

/// Classification derived from the consecutive-failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Failed,
}

impl HealthStatus {
    /// `0` healthy, `1..threshold` degraded, `threshold..2×threshold`
    /// critical, anything above failed.
    pub fn classify(failures: u32, threshold: u32) -> Self {
        if failures == 0 {
            HealthStatus::Healthy
        } else if failures < threshold {
            HealthStatus::Degraded
        } else if failures < threshold.saturating_mul(2) {
            HealthStatus::Critical
        } else {
            HealthStatus::Failed
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Public snapshot of one collector's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorHealth {
    /// `consecutive_failures < threshold`.
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub currently_running: bool,
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Which alert, if any, a failure count triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAlert {
    ThresholdReached,
    Persisting,
}

pub fn alert_for(count: u32, threshold: u32, alert_every: u32) -> Option<HealthAlert> {
    if count == threshold {
        Some(HealthAlert::ThresholdReached)
    } else if count > threshold.saturating_mul(2) && alert_every > 0 && count % alert_every == 0 {
        Some(HealthAlert::Persisting)
    } else {
        None
    }
}

#[derive(Clone)]
pub struct HealthTracker {
    table: CollectorTable,
    threshold: u32,
    alert_every: u32,
}

impl HealthTracker {
    pub fn new(table: CollectorTable, threshold: u32, alert_every: u32) -> Self {
        Self {
            table,
            threshold: threshold.max(1),
            alert_every,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn record_success(&self, id: CollectorId) {
        let previous = {
            let mut table = self.table.lock();
            let state = table.entry(id).or_default();
            let previous = state.consecutive_failures;
            state.consecutive_failures = 0;
            state.last_error = None;
            state.last_success_at = Some(Utc::now());
            previous
        };
        if previous > 0 {
            info!(collector = %id, failures = previous, "collector recovered");
        }
    }

    /// Returns the new consecutive-failure count.
    pub fn record_failure(&self, id: CollectorId, message: &str) -> u32 {
        let count = {
            let mut table = self.table.lock();
            let state = table.entry(id).or_default();
            state.consecutive_failures += 1;
            state.last_error = Some(message.to_string());
            state.consecutive_failures
        };

        warn!(
            collector = %id,
            consecutive_failures = count,
            error = message,
            "collector run failed"
        );
        match alert_for(count, self.threshold, self.alert_every) {
            Some(HealthAlert::ThresholdReached) => error!(
                collector = %id,
                consecutive_failures = count,
                threshold = self.threshold,
                last_error = message,
                "HEALTH ALERT: collector reached failure threshold"
            ),
            Some(HealthAlert::Persisting) => error!(
                collector = %id,
                consecutive_failures = count,
                last_error = message,
                "HEALTH ALERT: collector still failing"
            ),
            None => {}
        }
        count
    }

    pub fn consecutive_failures(&self, id: CollectorId) -> u32 {
        self.table
            .lock()
            .get(&id)
            .map_or(0, |s| s.consecutive_failures)
    }

    /// Snapshot for every known collector, read under the guard's lock.
    pub fn status(&self) -> BTreeMap<CollectorId, CollectorHealth> {
        self.table
            .lock()
            .iter()
            .map(|(id, s)| {
                let health = CollectorHealth {
                    healthy: s.consecutive_failures < self.threshold,
                    consecutive_failures: s.consecutive_failures,
                    currently_running: s.running,
                    status: HealthStatus::classify(s.consecutive_failures, self.threshold),
                    last_error: s.last_error.clone(),
                    last_success_at: s.last_success_at,
                };
                (*id, health)
            })
            .collect()
    }
}
