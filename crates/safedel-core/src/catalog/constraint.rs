//! Unique constraint definitions.

use rkyv::{Archive, Deserialize, Serialize};

/// A uniqueness constraint over one or more fields of an entity.
///
/// Constraints hold across live and masked rows alike.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Entity this constraint applies to.
    pub entity: String,
    /// Fields that must be unique together.
    pub fields: Vec<String>,
}

impl UniqueConstraint {
    /// Create a unique constraint on a single field.
    pub fn unique(
        name: impl Into<String>,
        entity: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            fields: vec![field.into()],
        }
    }

    /// Create a composite unique constraint.
    pub fn composite(
        name: impl Into<String>,
        entity: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether the constraint spans more than one field.
    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_field() {
        let c = UniqueConstraint::unique("user_email_unique", "User", "email");
        assert_eq!(c.fields, vec!["email".to_string()]);
        assert!(!c.is_composite());
    }

    #[test]
    fn test_composite() {
        let c = UniqueConstraint::composite("slot_unique", "Booking", ["room", "day"]);
        assert!(c.is_composite());
        assert_eq!(c.entity, "Booking");
    }
}
