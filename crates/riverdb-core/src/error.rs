//! Core error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Unknown topic encoding: {0}")]
    UnknownTopicEncoding(String),

    #[error("Corrupt encoding: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shortcut for the common mismatch case.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        CoreError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
