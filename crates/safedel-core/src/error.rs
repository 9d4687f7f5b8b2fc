//! Core error types.

use std::fmt;

use thiserror::Error;

/// Core database errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Value conversion error.
    #[error("protocol error: {0}")]
    Protocol(#[from] safedel_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// No record matched under the active visibility.
    #[error("{entity} record {key} not found")]
    NotFound { entity: String, key: String },

    /// A lookup expected one record and found several.
    #[error("{count} {entity} records matched, expected one")]
    MultipleResults { entity: String, count: usize },

    /// Entity type missing from the applied schema.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Relation accessor missing from the applied schema.
    #[error("unknown relation {accessor} on {entity}")]
    UnknownRelation { entity: String, accessor: String },

    /// Schema bundle failed validation.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A deletion policy or relation behavior refused the operation.
    #[error("policy violation: {0}")]
    PolicyViolation(#[from] PolicyViolation),

    /// A unique value is already taken by a live or masked row.
    #[error("unique violation: {0}")]
    UniqueViolation(#[from] UniqueConflict),
}

/// Refusals raised while planning a delete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyViolation {
    /// A restrict relation still has referencing rows.
    #[error(
        "cannot delete {entity}: {count} {referencing_entity} row(s) reference it via {relation}"
    )]
    Restrict {
        entity: String,
        referencing_entity: String,
        relation: String,
        count: usize,
    },

    /// A no-cascade hard delete would have destroyed child rows.
    #[error(
        "cannot hard delete {entity} without cascade: {count} {referencing_entity} row(s) depend on it via {relation}"
    )]
    CascadeBlocked {
        entity: String,
        referencing_entity: String,
        relation: String,
        count: usize,
    },

    /// The traversal went deeper than the configured limit.
    #[error("cascade depth {depth} exceeds the configured maximum")]
    MaxDepthExceeded { depth: usize },
}

/// A unique value collision.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueConflict {
    /// Entity type.
    pub entity: String,
    /// Constraint name.
    pub constraint: String,
    /// Fields covered by the constraint.
    pub fields: Vec<String>,
    /// Rendered value tuple.
    pub value: String,
    /// Identity of the row holding the value.
    pub existing_id: [u8; 16],
    /// Whether the holding row is masked.
    pub masked: bool,
}

impl fmt::Display for UniqueConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}({}) = {} already used by {} row {}",
            self.constraint,
            self.entity,
            self.fields.join(", "),
            self.value,
            if self.masked { "masked" } else { "live" },
            hex::encode(self.existing_id)
        )
    }
}

impl std::error::Error for UniqueConflict {}
