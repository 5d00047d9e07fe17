//! Error types for the Grantory entity store.

use thiserror::Error;

use crate::types::EntityKind;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("namespace {namespace} is corrupt: {reason}")]
    Corrupt { namespace: String, reason: String },
}

/// Flat classification of a [`StoreError`], for callers that map errors
/// onto their own responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Persistence,
    Cancelled,
    Corrupt,
}

impl StoreError {
    pub(crate) fn not_found(kind: EntityKind, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
