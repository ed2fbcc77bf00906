//! Error types surfaced by the stores and the ingestion endpoint.

use thiserror::Error;

/// Storage failure. Callers surface it as an HTTP 500.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing storage unavailable or a write did not reach it
    #[error("storage I/O failure: {0}")]
    IoFailure(String),

    /// A persisted record could not be encoded or decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoFailure(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Bad input shape on the ingestion endpoint. Callers surface it as an HTTP 400.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid count: {0}")]
    InvalidCount(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}
