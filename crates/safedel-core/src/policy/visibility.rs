//! Visibility strategies for masked rows.

use rkyv::{Archive, Deserialize, Serialize};

/// Which masked rows default retrieval may still surface.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Visibility {
    /// Masked rows never appear in default retrieval.
    Hidden,
    /// Masked rows appear when the query filters the identity by equality.
    VisibleByPk,
    /// Masked rows appear when the query filters the discriminator by equality.
    VisibleByField,
    /// Masked rows always appear.
    All,
}

/// A visibility strategy bound to its discriminator field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityRule {
    /// Strategy.
    pub strategy: Visibility,
    /// Field whose equality filter lifts the mask.
    pub discriminator: String,
}

impl VisibilityRule {
    /// Create a rule.
    pub fn new(strategy: Visibility, discriminator: impl Into<String>) -> Self {
        Self {
            strategy,
            discriminator: discriminator.into(),
        }
    }
}
