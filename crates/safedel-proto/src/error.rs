//! Shared error types.

use thiserror::Error;

/// Errors raised when converting runtime values.
#[derive(Debug, Error)]
pub enum Error {
    /// A value had a different type than the caller required.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A value could not be parsed.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
