use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::info;

use crate::error::Result;

/// Canonical timestamp encoding for every TEXT time column.
///
/// Fixed precision and the `Z` suffix keep lexical order equal to time order,
/// which the retention and "latest row" queries rely on.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Shared SQLite handle.
///
/// One connection behind a mutex: collector runs take the lock only for their
/// synchronous write phase, never across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        info!(path = %path.as_ref().display(), "database opened");
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<T, E>(
        &self,
        f: impl FnOnce(&Connection) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Run `f` inside a transaction: committed on `Ok`, rolled back on `Err`.
    pub fn with_tx<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        // Dropping an uncommitted transaction rolls it back.
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| Ok(get_config(conn, key)?))
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| Ok(set_config(conn, key, value)?))
    }
}

pub fn get_config(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
        row.get::<_, Option<String>>(0)
    })
    .optional()
    .map(Option::flatten)
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, value, format_ts(Utc::now())],
    )?;
    Ok(())
}

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    create_config_table(conn)?;
    create_node_tables(conn)?;
    create_device_tables(conn)?;
    create_network_tables(conn)?;
    create_bandwidth_table(conn)?;
    create_routing_tables(conn)?;
    Ok(())
}

fn create_config_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS config (
            key         TEXT NOT NULL PRIMARY KEY,
            value       TEXT,
            updated_at  TEXT NOT NULL
        );",
    )
}

fn create_node_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS eero_nodes (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name      TEXT NOT NULL DEFAULT '',
            eero_id           TEXT NOT NULL,
            location          TEXT,
            model             TEXT,
            mac_address       TEXT,
            is_gateway        INTEGER NOT NULL DEFAULT 0,
            os_version        TEXT,
            update_available  INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            last_seen         TEXT,
            UNIQUE(network_name, eero_id)
        );

        CREATE TABLE IF NOT EXISTS eero_node_metrics (
            id                        INTEGER PRIMARY KEY AUTOINCREMENT,
            eero_node_id              INTEGER NOT NULL REFERENCES eero_nodes(id),
            timestamp                 TEXT NOT NULL,
            status                    TEXT,
            connected_device_count    INTEGER NOT NULL DEFAULT 0,
            connected_wired_count     INTEGER NOT NULL DEFAULT 0,
            connected_wireless_count  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_node_metrics_timestamp
            ON eero_node_metrics(timestamp);",
    )
}

fn create_device_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS devices (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name  TEXT NOT NULL DEFAULT '',
            mac_address   TEXT NOT NULL,
            hostname      TEXT,
            nickname      TEXT,
            device_type   TEXT,
            aliases       TEXT,               -- JSON array of alias strings
            first_seen    TEXT NOT NULL,
            last_seen     TEXT,
            UNIQUE(network_name, mac_address)
        );

        -- One row per device per device-collector run; pruned by retention.
        CREATE TABLE IF NOT EXISTS device_connections (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id            INTEGER NOT NULL REFERENCES devices(id),
            network_name         TEXT NOT NULL DEFAULT '',
            eero_node_id         INTEGER REFERENCES eero_nodes(id),
            timestamp            TEXT NOT NULL,
            is_connected         INTEGER NOT NULL DEFAULT 0,
            connection_type      TEXT,
            signal_strength      INTEGER,
            ip_address           TEXT,
            bandwidth_down_mbps  REAL,
            bandwidth_up_mbps    REAL
        );
        CREATE INDEX IF NOT EXISTS idx_connections_timestamp
            ON device_connections(timestamp);
        CREATE INDEX IF NOT EXISTS idx_connections_device
            ON device_connections(device_id, timestamp DESC);",
    )
}

fn create_network_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS network_metrics (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name           TEXT NOT NULL,
            timestamp              TEXT NOT NULL,
            total_devices          INTEGER NOT NULL DEFAULT 0,
            total_devices_online   INTEGER NOT NULL DEFAULT 0,
            guest_network_enabled  INTEGER NOT NULL DEFAULT 0,
            wan_status             TEXT,
            connection_mode        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_network_metrics_timestamp
            ON network_metrics(network_name, timestamp);

        CREATE TABLE IF NOT EXISTS speedtests (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name     TEXT NOT NULL,
            timestamp        TEXT NOT NULL,
            download_mbps    REAL,
            upload_mbps      REAL,
            latency_ms       REAL,
            jitter_ms        REAL,
            server_location  TEXT,
            isp              TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_speedtests_timestamp
            ON speedtests(network_name, timestamp);",
    )
}

/// Per-subject, per-UTC-day accumulated volume. `device_id = 0` is the
/// network-wide total, so the unique key never has to match on NULL.
fn create_bandwidth_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_bandwidth (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name          TEXT NOT NULL,
            device_id             INTEGER NOT NULL DEFAULT 0,
            date                  TEXT NOT NULL,   -- YYYY-MM-DD (UTC)
            download_mb           REAL NOT NULL DEFAULT 0,
            upload_mb             REAL NOT NULL DEFAULT 0,
            last_collection_time  TEXT,
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL,
            UNIQUE(network_name, device_id, date)
        );
        CREATE INDEX IF NOT EXISTS idx_daily_bandwidth_date
            ON daily_bandwidth(date);",
    )
}

fn create_routing_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ip_reservations (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name  TEXT NOT NULL,
            mac_address   TEXT NOT NULL,
            ip_address    TEXT NOT NULL,
            description   TEXT,
            eero_url      TEXT,
            created_at    TEXT NOT NULL,
            last_seen     TEXT NOT NULL,
            UNIQUE(network_name, mac_address)
        );

        CREATE TABLE IF NOT EXISTS port_forwards (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            network_name     TEXT NOT NULL,
            ip_address       TEXT NOT NULL,
            gateway_port     INTEGER NOT NULL,
            client_port      INTEGER NOT NULL,
            protocol         TEXT NOT NULL,
            description      TEXT,
            enabled          INTEGER NOT NULL DEFAULT 1,
            reservation_url  TEXT,
            eero_url         TEXT,
            created_at       TEXT NOT NULL,
            last_seen        TEXT NOT NULL,
            UNIQUE(network_name, ip_address, gateway_port, protocol)
        );",
    )
}
