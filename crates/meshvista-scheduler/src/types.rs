use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meshvista_collectors::CollectorId;
use serde::Serialize;

/// Identity of a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "collector", rename_all = "snake_case")]
pub enum JobId {
    Collector(CollectorId),
    RetentionCleanup,
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Collector(id) => write!(f, "{id}_collector"),
            JobId::RetentionCleanup => write!(f, "database_cleanup"),
        }
    }
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Every N seconds, first fire one interval after registration.
    Interval { every_secs: u64 },
    /// Every day at HH:MM UTC.
    Daily { hour: u8, minute: u8 },
}

impl Trigger {
    pub fn every(interval: Duration) -> Self {
        Trigger::Interval {
            every_secs: interval.as_secs().max(1),
        }
    }
}

/// A trigger registered with the running engine. Lives from `start()` to
/// `stop()`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorJob {
    pub id: JobId,
    pub trigger: Trigger,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}
