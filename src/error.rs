use thiserror::Error;

/// Outbox read/write/update failure.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Position not found: {0}")]
    NotFound(i64),

    #[error("Position {id} has an out-of-range time: {time}")]
    InvalidTime { id: i64, time: i64 },
}

/// Delivery failure. The controller retries every variant the same way.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Collector responded with status {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,
}

/// Missing or invalid collector destination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Server address is not configured")]
    MissingAddress,

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Invalid server port: {0}")]
    InvalidPort(String),
}
