use thiserror::Error;

/// Errors returned by the mesh API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No session token is available; the operator has not logged in yet.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Transport-level failure (DNS, TLS, connect, read timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;
