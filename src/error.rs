//! Error types for daily-hue
//!
//! Expected domain outcomes (limit reached, already settled, target not
//! published) are not errors; they are returned as typed outcomes by the
//! services. Everything here is either infrastructure trouble or a bug.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChallengeError {
    /// Busy/locked database, lock timeout, lost connection. Safe to retry.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Stored data breaks a ledger invariant (sequence gap, duplicate number).
    /// Never repaired automatically.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChallengeError {
    /// Classify a SQLite failure, prefixing it with what we were doing.
    pub fn store(context: &str, err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            ChallengeError::TransientStore(format!("{}: {}", context, err))
        } else {
            ChallengeError::Database(format!("{}: {}", context, err))
        }
    }

    /// Whether the caller may retry the same operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ChallengeError::TransientStore(_))
    }
}

impl From<rusqlite::Error> for ChallengeError {
    fn from(err: rusqlite::Error) -> Self {
        ChallengeError::store("SQLite", err)
    }
}

/// SQLite reported BUSY or LOCKED
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// SQLite rejected a write on a UNIQUE/PRIMARY KEY constraint
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
}
