//! Retention cleanup for the high-volume time-series tables.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info};

use crate::db::{format_ts, Database};

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub success: bool,
    pub records_deleted: u64,
    pub connection_records_deleted: u64,
    pub node_metric_records_deleted: u64,
    pub retention_days: u32,
    pub error: Option<String>,
}

/// Deletes time-series rows older than the retention window.
#[async_trait]
pub trait RetentionCleanup: Send + Sync {
    async fn run_cleanup(&self, retention_days: u32) -> CleanupReport;
}

/// SQLite implementation over `device_connections` and `eero_node_metrics`.
pub struct SqliteCleanup {
    db: Database,
}

impl SqliteCleanup {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RetentionCleanup for SqliteCleanup {
    async fn run_cleanup(&self, retention_days: u32) -> CleanupReport {
        info!(retention_days, "starting database cleanup");
        let cutoff = format_ts(Utc::now() - Duration::days(i64::from(retention_days)));

        let result = self.db.with_tx(|tx| -> rusqlite::Result<(u64, u64)> {
            let connections = delete_older_than(tx, "device_connections", &cutoff)?;
            let node_metrics = delete_older_than(tx, "eero_node_metrics", &cutoff)?;
            Ok((connections, node_metrics))
        });

        match result {
            Ok((connections, node_metrics)) => {
                let total = connections + node_metrics;
                info!(
                    total,
                    connections, node_metrics, %cutoff, "database cleanup completed"
                );
                CleanupReport {
                    success: true,
                    records_deleted: total,
                    connection_records_deleted: connections,
                    node_metric_records_deleted: node_metrics,
                    retention_days,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = %e, "database cleanup failed");
                CleanupReport {
                    success: false,
                    retention_days,
                    error: Some(e.to_string()),
                    ..CleanupReport::default()
                }
            }
        }
    }
}

/// `table` is always one of our own constant table names.
fn delete_older_than(conn: &Connection, table: &str, cutoff: &str) -> rusqlite::Result<u64> {
    let n = conn.execute(
        &format!("DELETE FROM {table} WHERE timestamp < ?1"),
        [cutoff],
    )?;
    Ok(n as u64)
}
