//! Error types shared by the record store, sync queue and drainer.

use thiserror::Error;

/// Failure of a local store or queue operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The durable engine could not complete the operation (I/O, quota,
    /// corruption, poisoned lock). Callers treat this as non-fatal.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// The operation referenced an entity id the store does not hold.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::StorageFailure(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::StorageFailure(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::StorageFailure(format!("serialization: {}", e))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::StorageFailure(format!("storage task aborted: {}", e))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The remote authority could not complete a revision lookup or apply call.
///
/// Timeouts and rejections are reported the same way as network errors; the
/// drainer answers all of them with a backoff retry.
#[derive(Debug, Clone, Error)]
#[error("remote call failed: {message}")]
pub struct RemoteError {
    pub message: String,
    /// HTTP status when the remote answered, `None` for transport errors.
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}
