//! Facade error types.

use thiserror::Error;

pub use safedel_core::error::{PolicyViolation, UniqueConflict};

/// Errors returned by the soft-delete facade.
///
/// The three domain outcomes a caller is expected to branch on are lifted
/// out of the core error into their own variants.
#[derive(Debug, Error)]
pub enum Error {
    /// A deletion policy or relation behavior refused the operation.
    #[error("policy violation: {0}")]
    PolicyViolation(PolicyViolation),

    /// No row matched under the active visibility.
    #[error("{entity} record {key} not found")]
    RecordNotFound { entity: String, key: String },

    /// A unique value is held by a live or masked row.
    #[error("uniqueness conflict: {0}")]
    UniquenessConflict(UniqueConflict),

    /// A single-row lookup matched several rows.
    #[error("{count} {entity} records matched, expected one")]
    MultipleResults { entity: String, count: usize },

    /// Storage, catalog or query error.
    #[error("storage error: {0}")]
    Storage(safedel_core::Error),

    /// Value conversion error.
    #[error("protocol error: {0}")]
    Protocol(#[from] safedel_proto::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is a `RecordNotFound` outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RecordNotFound { .. })
    }

    pub(crate) fn not_found(entity: &str, id: &[u8; 16]) -> Self {
        Error::RecordNotFound {
            entity: entity.to_string(),
            key: hex::encode(id),
        }
    }
}

impl From<safedel_core::Error> for Error {
    fn from(error: safedel_core::Error) -> Self {
        match error {
            safedel_core::Error::PolicyViolation(v) => Error::PolicyViolation(v),
            safedel_core::Error::UniqueViolation(c) => Error::UniquenessConflict(c),
            safedel_core::Error::NotFound { entity, key } => Error::RecordNotFound { entity, key },
            safedel_core::Error::MultipleResults { entity, count } => {
                Error::MultipleResults { entity, count }
            }
            other => Error::Storage(other),
        }
    }
}

impl From<PolicyViolation> for Error {
    fn from(violation: PolicyViolation) -> Self {
        Error::PolicyViolation(violation)
    }
}

impl From<UniqueConflict> for Error {
    fn from(conflict: UniqueConflict) -> Self {
        Error::UniquenessConflict(conflict)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Config(error.to_string())
    }
}
