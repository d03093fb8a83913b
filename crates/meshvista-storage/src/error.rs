use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    #[error("upstream API error: {0}")]
    Api(#[from] meshvista_api::ApiError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
