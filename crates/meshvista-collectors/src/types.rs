use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed set of collectors the scheduler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorId {
    Device,
    Network,
    Speedtest,
    Routing,
}

impl CollectorId {
    /// Every collector, in the order the startup run visits them.
    pub const ALL: [CollectorId; 4] = [
        CollectorId::Device,
        CollectorId::Network,
        CollectorId::Speedtest,
        CollectorId::Routing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Network => "network",
            Self::Speedtest => "speedtest",
            Self::Routing => "routing",
        }
    }

    /// `config` table key holding the last successful collection time.
    pub fn last_collection_key(self) -> String {
        format!("last_collection_{}", self.as_str())
    }
}

impl fmt::Display for CollectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectorId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(Self::Device),
            "network" => Ok(Self::Network),
            "speedtest" => Ok(Self::Speedtest),
            "routing" => Ok(Self::Routing),
            other => Err(format!("unknown collector: {other}")),
        }
    }
}

/// What a collector reports back after a successful `collect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub items_collected: u64,
    pub errors: u64,
    /// Collector-specific counters, e.g. `reservations_added`.
    pub details: BTreeMap<String, u64>,
}

impl CollectionStats {
    pub fn add_detail(&mut self, key: &str, n: u64) {
        *self.details.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn merge(&mut self, other: CollectionStats) {
        self.items_collected += other.items_collected;
        self.errors += other.errors;
        for (key, n) in other.details {
            *self.details.entry(key).or_insert(0) += n;
        }
    }
}

/// Outcome of one guarded collector invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub items_collected: Option<u64>,
    pub error: Option<String>,
    pub timed_out: bool,
    /// The previous run was still in progress; not a failure.
    pub skipped: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, u64>,
}

impl RunResult {
    pub fn completed(stats: CollectionStats, elapsed: Duration) -> Self {
        Self {
            success: true,
            items_collected: Some(stats.items_collected),
            duration_ms: elapsed.as_millis() as u64,
            details: stats.details,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            error: Some(format!("operation timed out after {}s", timeout.as_secs())),
            timed_out: true,
            duration_ms: timeout.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn skipped() -> Self {
        Self::skipped_because("previous run still in progress")
    }

    /// The run never started. Not a success, and not a failure either.
    pub fn skipped_because(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            skipped: true,
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    /// Success that should trigger the device side effects.
    pub fn is_clean_success(&self) -> bool {
        self.success && !self.timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_id_round_trips_through_display() {
        for id in CollectorId::ALL {
            assert_eq!(id.to_string().parse::<CollectorId>().unwrap(), id);
        }
        assert!("bogus".parse::<CollectorId>().is_err());
    }

    #[test]
    fn last_collection_key_uses_id() {
        assert_eq!(
            CollectorId::Speedtest.last_collection_key(),
            "last_collection_speedtest"
        );
    }

    #[test]
    fn stats_merge_sums_details() {
        let mut a = CollectionStats {
            items_collected: 2,
            ..Default::default()
        };
        a.add_detail("forwards_added", 1);
        let mut b = CollectionStats {
            items_collected: 3,
            errors: 1,
            ..Default::default()
        };
        b.add_detail("forwards_added", 2);
        b.add_detail("reservations_added", 4);

        a.merge(b);
        assert_eq!(a.items_collected, 5);
        assert_eq!(a.errors, 1);
        assert_eq!(a.details["forwards_added"], 3);
        assert_eq!(a.details["reservations_added"], 4);
    }

    #[test]
    fn timeout_message_names_seconds() {
        let r = RunResult::timed_out(Duration::from_secs(60));
        assert!(!r.success);
        assert!(r.timed_out);
        assert_eq!(r.error.as_deref(), Some("operation timed out after 60s"));
        assert!(!r.is_clean_success());
    }

    #[test]
    fn skipped_is_not_success() {
        let r = RunResult::skipped();
        assert!(r.skipped);
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("previous run still in progress"));
    }

    #[test]
    fn serializes_snake_case_ids() {
        let json = serde_json::to_string(&CollectorId::Device).unwrap();
        assert_eq!(json, "\"device\"");
    }
}
