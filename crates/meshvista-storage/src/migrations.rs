//! Ordered data migrations tracked in the `config` table.
//!
//! Applied migration names are stored comma-separated under the
//! `schema_version` key. Some steps need live data from the mesh API to compute
//! correct values; when the API is not authenticated yet those steps are
//! skipped (not marked applied) and reported so they can be retried later.

use std::collections::HashMap;

use async_trait::async_trait;
use meshvista_api::MeshApi;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{get_config, set_config, Database};
use crate::error::{Result, StorageError};

const VERSION_KEY: &str = "schema_version";

/// Summary of one pass over the migration list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub already_applied: usize,
    /// Steps that need an authenticated API and could not run.
    pub skipped_needs_auth: Vec<String>,
}

/// Runs the migration sequence. Must be idempotent.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// `retry_mode` marks a second pass made after authentication became
    /// available; already-applied steps are skipped either way.
    async fn run(&self, api: Option<&dyn MeshApi>, retry_mode: bool) -> Result<MigrationReport>;
}

enum Step {
    Schema(fn(&Connection) -> rusqlite::Result<()>),
    /// Rewrites `network_name` using the API's current MAC → network view.
    NetworkAssignments,
}

struct Migration {
    name: &'static str,
    step: Step,
}

impl Migration {
    fn needs_api(&self) -> bool {
        matches!(self.step, Step::NetworkAssignments)
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_performance_indexes",
        step: Step::Schema(create_performance_indexes),
    },
    Migration {
        name: "002_correct_network_assignments",
        step: Step::NetworkAssignments,
    },
];

pub struct SqliteMigrator {
    db: Database,
}

impl SqliteMigrator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Names of every migration that needs API access.
    pub fn auth_dependent() -> Vec<String> {
        MIGRATIONS
            .iter()
            .filter(|m| m.needs_api())
            .map(|m| m.name.to_string())
            .collect()
    }
}

#[async_trait]
impl MigrationRunner for SqliteMigrator {
    async fn run(&self, api: Option<&dyn MeshApi>, retry_mode: bool) -> Result<MigrationReport> {
        let api = api.filter(|a| a.is_authenticated());
        let mut applied = self.db.with_conn(applied_migrations)?;
        let mut report = MigrationReport::default();

        if retry_mode {
            info!("retrying auth-dependent migrations");
        }

        for migration in MIGRATIONS {
            if applied.iter().any(|a| a == migration.name) {
                report.already_applied += 1;
                continue;
            }

            match &migration.step {
                Step::Schema(apply) => {
                    info!(migration = migration.name, "running migration");
                    self.db.with_tx(|tx| -> Result<()> {
                        apply(tx).map_err(|e| failed(migration.name, e))?;
                        mark_applied(tx, &mut applied, migration.name)?;
                        Ok(())
                    })?;
                }
                Step::NetworkAssignments => {
                    let Some(api) = api else {
                        warn!(
                            migration = migration.name,
                            "migration needs an authenticated API, skipping"
                        );
                        report.skipped_needs_auth.push(migration.name.to_string());
                        continue;
                    };
                    info!(migration = migration.name, "running migration");
                    let mac_to_network = build_device_network_map(api).await?;
                    self.db.with_tx(|tx| -> Result<()> {
                        let moved = correct_network_assignments(tx, &mac_to_network)
                            .map_err(|e| failed(migration.name, e))?;
                        info!(devices = moved, "network assignments corrected");
                        mark_applied(tx, &mut applied, migration.name)?;
                        Ok(())
                    })?;
                }
            }
            report.applied.push(migration.name.to_string());
        }

        info!(
            applied = report.applied.len(),
            already_applied = report.already_applied,
            skipped = report.skipped_needs_auth.len(),
            "migrations complete"
        );
        Ok(report)
    }
}

fn failed(name: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Migration {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    Ok(get_config(conn, VERSION_KEY)?
        .map(|v| {
            v.split(',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

fn mark_applied(conn: &Connection, applied: &mut Vec<String>, name: &str) -> Result<()> {
    if !applied.iter().any(|a| a == name) {
        applied.push(name.to_string());
    }
    set_config(conn, VERSION_KEY, &applied.join(","))?;
    Ok(())
}

fn create_performance_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_devices_network_name ON devices(network_name);
         CREATE INDEX IF NOT EXISTS idx_connections_network_ts
             ON device_connections(network_name, timestamp);
         CREATE INDEX IF NOT EXISTS idx_daily_bandwidth_device_date
             ON daily_bandwidth(device_id, date);",
    )
}

async fn build_device_network_map(api: &dyn MeshApi) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for network in api.networks().await? {
        let Some(name) = network.name.clone() else {
            warn!(url = %network.url, "network has no name, skipping");
            continue;
        };
        for device in api.devices(&network).await? {
            if let Some(mac) = device.mac {
                map.insert(mac.to_lowercase(), name.clone());
            }
        }
    }
    info!(devices = map.len(), "built device-to-network map");
    Ok(map)
}

/// Move devices (and their connection history) to the network the API reports
/// them on. A device already present under its correct network is left alone.
fn correct_network_assignments(
    conn: &Connection,
    mac_to_network: &HashMap<String, String>,
) -> rusqlite::Result<usize> {
    let rows: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare("SELECT id, mac_address, network_name FROM devices")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
        rows
    };

    let mut moved = 0;
    for (id, mac, current) in rows {
        let Some(target) = mac_to_network.get(&mac.to_lowercase()) else {
            continue;
        };
        if *target == current {
            continue;
        }
        let n = conn.execute(
            "UPDATE OR IGNORE devices SET network_name = ?1 WHERE id = ?2",
            rusqlite::params![target, id],
        )?;
        if n == 0 {
            continue;
        }
        conn.execute(
            "UPDATE device_connections SET network_name = ?1 WHERE device_id = ?2",
            rusqlite::params![target, id],
        )?;
        moved += 1;
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshvista_api::{Device, Eero, Forward, Network, NetworkDetails, Reservation};

    struct FakeApi {
        authenticated: bool,
    }

    #[async_trait]
    impl MeshApi for FakeApi {
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }
        async fn networks(&self) -> meshvista_api::Result<Vec<Network>> {
            Ok(vec![Network {
                url: "/2.2/networks/2".to_string(),
                name: Some("cabin".to_string()),
            }])
        }
        async fn eeros(&self, _: &Network) -> meshvista_api::Result<Vec<Eero>> {
            Ok(Vec::new())
        }
        async fn devices(&self, _: &Network) -> meshvista_api::Result<Vec<Device>> {
            Ok(vec![Device {
                mac: Some("AA:BB:CC:00:00:01".to_string()),
                ..Device::default()
            }])
        }
        async fn network_details(&self, _: &Network) -> meshvista_api::Result<NetworkDetails> {
            Ok(NetworkDetails::default())
        }
        async fn reservations(&self, _: &Network) -> meshvista_api::Result<Vec<Reservation>> {
            Ok(Vec::new())
        }
        async fn forwards(&self, _: &Network) -> meshvista_api::Result<Vec<Forward>> {
            Ok(Vec::new())
        }
    }

    fn seed_legacy_device(db: &Database) {
        db.with_conn(|conn| -> rusqlite::Result<()> {
            conn.execute(
                "INSERT INTO devices (network_name, mac_address, first_seen)
                 VALUES ('', 'aa:bb:cc:00:00:01', '2026-01-01T00:00:00.000Z')",
                [],
            )?;
            conn.execute(
                "INSERT INTO device_connections (device_id, network_name, timestamp)
                 VALUES (1, '', '2026-01-01T00:00:00.000Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn unauthenticated_run_skips_api_steps() {
        let db = Database::in_memory().unwrap();
        let migrator = SqliteMigrator::new(db.clone());

        let report = migrator.run(None, false).await.unwrap();
        assert_eq!(report.applied, vec!["001_performance_indexes".to_string()]);
        assert_eq!(
            report.skipped_needs_auth,
            vec!["002_correct_network_assignments".to_string()]
        );
        assert_eq!(
            db.get_config(VERSION_KEY).unwrap().as_deref(),
            Some("001_performance_indexes")
        );
    }

    #[tokio::test]
    async fn retry_applies_only_skipped_step() {
        let db = Database::in_memory().unwrap();
        seed_legacy_device(&db);
        let migrator = SqliteMigrator::new(db.clone());
        migrator.run(None, false).await.unwrap();

        let api = FakeApi { authenticated: true };
        let report = migrator.run(Some(&api), true).await.unwrap();
        assert_eq!(report.already_applied, 1);
        assert_eq!(
            report.applied,
            vec!["002_correct_network_assignments".to_string()]
        );
        assert!(report.skipped_needs_auth.is_empty());

        let network: String = db
            .with_conn(|c| {
                c.query_row("SELECT network_name FROM device_connections", [], |r| r.get(0))
            })
            .unwrap();
        assert_eq!(network, "cabin");

        let again = migrator.run(Some(&api), true).await.unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(again.already_applied, 2);
    }

    #[tokio::test]
    async fn unauthenticated_client_counts_as_missing() {
        let db = Database::in_memory().unwrap();
        let api = FakeApi {
            authenticated: false,
        };
        let report = SqliteMigrator::new(db).run(Some(&api), false).await.unwrap();
        assert_eq!(report.skipped_needs_auth.len(), 1);
    }

    #[test]
    fn auth_dependent_lists_api_steps() {
        assert_eq!(
            SqliteMigrator::auth_dependent(),
            vec!["002_correct_network_assignments".to_string()]
        );
    }
}
