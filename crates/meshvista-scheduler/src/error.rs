use thiserror::Error;

/// Errors raised by scheduler collaborators (side effects, cleanup).
///
/// Collector failures never surface here; they become failed
/// [`RunResult`](meshvista_collectors::RunResult)s.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(#[from] meshvista_storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
