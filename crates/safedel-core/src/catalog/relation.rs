//! Relation definitions between entities.

use rkyv::{Archive, Deserialize, Serialize};
use safedel_proto::Value;

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum Cardinality {
    /// One-to-one relation (unique foreign key).
    OneToOne,
    /// One-to-many relation (foreign key on many side).
    OneToMany,
    /// Many-to-many relation (requires edge/join entity).
    ManyToMany,
}

/// What a hard delete of the referenced row does to referencing rows.
///
/// Soft deletes consult only `Cascade` and `Restrict`; the rewriting
/// behaviors apply when a parent row is physically removed.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum DeleteBehavior {
    /// Delete related entities.
    Cascade,
    /// Prevent deletion if related entities exist.
    Restrict,
    /// Set foreign key to null.
    SetNull,
    /// Set foreign key to the field's declared default.
    SetDefault,
    /// Set foreign key to a fixed value.
    SetValue(Value),
}

impl DeleteBehavior {
    /// Whether this behavior rewrites the foreign key instead of touching the row.
    pub fn rewrites(&self) -> bool {
        matches!(
            self,
            DeleteBehavior::SetNull | DeleteBehavior::SetDefault | DeleteBehavior::SetValue(_)
        )
    }
}

/// A relation definition between two entities.
///
/// `from_entity` holds the foreign key (`from_field`) pointing at `to_field`
/// on `to_entity`. For many-to-many relations the two fields name the
/// columns of `edge_entity` that reference each side's identity.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name, also the forward accessor on `from_entity`.
    pub name: String,
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Field on the source entity (foreign key).
    pub from_field: String,
    /// Field on the target entity (usually identity).
    pub to_field: String,
    /// Delete behavior.
    pub on_delete: DeleteBehavior,
    /// Reverse accessor on `to_entity`.
    pub related_name: Option<String>,
    /// Edge entity for many-to-many relations.
    pub edge_entity: Option<String>,
}

impl RelationDef {
    fn build(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
        cardinality: Cardinality,
        on_delete: DeleteBehavior,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            cardinality,
            from_field: from_field.into(),
            to_field: to_field.into(),
            on_delete,
            related_name: None,
            edge_entity: None,
        }
    }

    /// Create a one-to-one relation.
    pub fn one_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self::build(
            name,
            from_entity,
            from_field,
            to_entity,
            to_field,
            Cardinality::OneToOne,
            DeleteBehavior::Restrict,
        )
    }

    /// Create a one-to-many relation.
    pub fn one_to_many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self::build(
            name,
            from_entity,
            from_field,
            to_entity,
            to_field,
            Cardinality::OneToMany,
            DeleteBehavior::Restrict,
        )
    }

    /// Create a many-to-many relation through an edge entity.
    pub fn many_to_many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
        edge_entity: impl Into<String>,
    ) -> Self {
        let mut rel = Self::build(
            name,
            from_entity,
            from_field,
            to_entity,
            to_field,
            Cardinality::ManyToMany,
            DeleteBehavior::Cascade,
        );
        rel.edge_entity = Some(edge_entity.into());
        rel
    }

    /// Set delete behavior.
    pub fn with_on_delete(mut self, on_delete: DeleteBehavior) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Set the reverse accessor name.
    pub fn with_related_name(mut self, related_name: impl Into<String>) -> Self {
        self.related_name = Some(related_name.into());
        self
    }

    /// Check if this is a many-to-many relation.
    pub fn is_many_to_many(&self) -> bool {
        self.cardinality == Cardinality::ManyToMany
    }

    /// Accessor on `from_entity` that reaches `to_entity`.
    pub fn forward_accessor(&self) -> &str {
        &self.name
    }

    /// Accessor on `to_entity` that reaches `from_entity`.
    pub fn reverse_accessor(&self) -> String {
        match &self.related_name {
            Some(name) => name.clone(),
            None => format!("{}_set", self.from_entity.to_lowercase()),
        }
    }
}
