//! `meshvista-storage`: SQLite persistence for collected snapshots.
//!
//! Owns the schema ([`db::init_db`]), the shared [`Database`] handle, and the
//! two maintenance collaborators the scheduler drives: [`RetentionCleanup`]
//! and [`MigrationRunner`].

pub mod cleanup;
pub mod db;
pub mod error;
pub mod migrations;

pub use cleanup::{CleanupReport, RetentionCleanup, SqliteCleanup};
pub use db::{format_ts, parse_ts, Database};
pub use error::{Result, StorageError};
pub use migrations::{MigrationReport, MigrationRunner, SqliteMigrator};
