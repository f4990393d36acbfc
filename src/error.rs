//! Error taxonomy shared by the core and every backend.

use thiserror::Error;

/// Errors raised by tree population, row population and transfers.
///
/// A stale cache is not an error: it is reported as
/// [`crate::store::checksum::ChecksumStatus::Stale`] and triggers a re-fetch.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflicting object at {0}")]
    Conflict(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    #[error("invalid entry path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("entry {0:?} is already registered in this row")]
    DuplicateEntry(String),

    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creation conflicts that callers treat as "already present".
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
