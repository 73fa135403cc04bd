//! Common error types for the feed services

use thiserror::Error;

/// Common result type for feed service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the feed services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message transport error (publish, commit, subscribe)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Resolver service error (network, status or decoding)
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Search index error
    #[error("Index error: {0}")]
    Index(String),

    /// Operation exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Run `fut` under a deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_deadline<T, F>(deadline: std::time::Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline)),
    }
}
