//! Entity definitions.

use super::field::FieldDef;
use crate::policy::{DeletionPolicy, Visibility};
use rkyv::{Archive, Deserialize, Serialize};
use safedel_proto::OrderSpec;

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Name of the primary identity field.
    pub identity_field: String,
    /// Field definitions.
    pub fields: Vec<FieldDef>,
    /// Lifecycle rules.
    pub lifecycle: LifecycleRules,
}

/// Deletion and visibility rules for an entity.
///
/// An entity with `soft_delete == false` is plain: its rows are never masked
/// and deleting one always removes it.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct LifecycleRules {
    /// Rows of this entity can be masked.
    pub soft_delete: bool,
    /// Deletion policy applied when no policy is forced.
    pub policy: DeletionPolicy,
    /// Which masked rows default retrieval may still surface.
    pub visibility: Visibility,
    /// Discriminator for field-based visibility. Defaults to the identity.
    pub visibility_field: Option<String>,
    /// Default ordering for queries without explicit order.
    pub default_order: Option<Vec<OrderSpec>>,
}

impl Default for LifecycleRules {
    fn default() -> Self {
        Self {
            soft_delete: false,
            policy: DeletionPolicy::HardDelete,
            visibility: Visibility::All,
            visibility_field: None,
            default_order: None,
        }
    }
}

impl LifecycleRules {
    /// Rules for a soft-deletable entity with the given policy.
    pub fn soft(policy: DeletionPolicy) -> Self {
        Self {
            soft_delete: true,
            policy,
            visibility: Visibility::Hidden,
            visibility_field: None,
            default_order: None,
        }
    }
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: identity_field.into(),
            fields: Vec::new(),
            lifecycle: LifecycleRules::default(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Set lifecycle rules.
    pub fn with_lifecycle(mut self, lifecycle: LifecycleRules) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Enable soft delete with the plain `SoftDelete` policy.
    pub fn with_soft_delete(self) -> Self {
        self.with_policy(DeletionPolicy::SoftDelete)
    }

    /// Enable soft delete with a specific policy.
    pub fn with_policy(mut self, policy: DeletionPolicy) -> Self {
        if !self.lifecycle.soft_delete {
            self.lifecycle.visibility = Visibility::Hidden;
        }
        self.lifecycle.soft_delete = true;
        self.lifecycle.policy = policy;
        self
    }

    /// Set the visibility strategy.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.lifecycle.visibility = visibility;
        self
    }

    /// Set the discriminator field used by field-based visibility.
    pub fn with_visibility_field(mut self, field: impl Into<String>) -> Self {
        self.lifecycle.visibility_field = Some(field.into());
        self
    }

    /// Set the default ordering.
    pub fn with_default_order(mut self, order: Vec<OrderSpec>) -> Self {
        self.lifecycle.default_order = Some(order);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get the identity field definition.
    pub fn get_identity_field(&self) -> Option<&FieldDef> {
        self.get_field(&self.identity_field)
    }

    /// Fields flagged unique on their own.
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Check if this entity has soft delete enabled.
    pub fn has_soft_delete(&self) -> bool {
        self.lifecycle.soft_delete
    }
}
