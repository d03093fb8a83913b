use thiserror::Error;

/// Errors raised inside a collector run. All of them end up as a failed
/// [`RunResult`](crate::RunResult); none escape the scheduler.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("API error: {0}")]
    Api(#[from] meshvista_api::ApiError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] meshvista_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
