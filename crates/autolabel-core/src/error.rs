//! Error types for autolabel.

use thiserror::Error;

/// Result type alias using autolabel's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for autolabel operations.
///
/// Key collisions never surface here: the record upsert turns them into
/// updates.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found (dataset folder, record, stored object)
    #[error("Not found: {0}")]
    NotFound(String),

    /// External inference service failed or returned garbage
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Object store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Image decoding or encoding failed
    #[error("Image error: {0}")]
    Image(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the "absent" family of errors, which several callers degrade
    /// to an empty default instead of propagating.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
