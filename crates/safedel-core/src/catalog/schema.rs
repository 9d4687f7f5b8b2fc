//! Schema bundle - versioned snapshot of the entire schema.

use super::{EntityDef, RelationDef, UniqueConstraint};
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A versioned snapshot of the entire schema.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Schema version (monotonically increasing).
    pub version: u64,
    /// Creation timestamp (microseconds since Unix epoch).
    pub created_at: u64,
    /// Entity definitions keyed by name.
    pub entities: HashMap<String, EntityDef>,
    /// Relation definitions keyed by name.
    pub relations: HashMap<String, RelationDef>,
    /// Declared unique constraints (single fields flagged unique are implied).
    pub constraints: Vec<UniqueConstraint>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            created_at: crate::storage::key::current_timestamp(),
            entities: HashMap::new(),
            relations: HashMap::new(),
            constraints: Vec::new(),
        }
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Add a relation to the schema.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    /// Add a unique constraint to the schema.
    pub fn with_constraint(mut self, constraint: UniqueConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Get a relation by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    /// Get all relations for an entity (as source).
    pub fn relations_from(&self, entity: &str) -> Vec<&RelationDef> {
        self.relations
            .values()
            .filter(|r| r.from_entity == entity)
            .collect()
    }

    /// Get all relations to an entity (as target).
    pub fn relations_to(&self, entity: &str) -> Vec<&RelationDef> {
        self.relations
            .values()
            .filter(|r| r.to_entity == entity)
            .collect()
    }

    /// Every unique field set of an entity.
    ///
    /// Fields flagged unique become single-field constraints named
    /// `<entity>_<field>_unique`, followed by the declared constraints.
    pub fn unique_sets(&self, entity: &str) -> Vec<UniqueConstraint> {
        let mut sets: Vec<UniqueConstraint> = self
            .get_entity(entity)
            .map(|def| {
                def.unique_fields()
                    .map(|f| {
                        UniqueConstraint::unique(
                            format!("{}_{}_unique", entity.to_lowercase(), f.name),
                            entity,
                            f.name.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        sets.extend(
            self.constraints
                .iter()
                .filter(|c| c.entity == entity)
                .cloned(),
        );
        sets
    }

    /// Check whether an entity carries any uniqueness rule.
    pub fn has_unique_fields(&self, entity: &str) -> bool {
        self.get_entity(entity)
            .is_some_and(|def| def.unique_fields().next().is_some())
            || self.constraints.iter().any(|c| c.entity == entity)
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }

    /// Check that every name the schema refers to resolves.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, entity) in &self.entities {
            if entity.get_identity_field().is_none() {
                return Err(Error::InvalidSchema(format!(
                    "entity {} has no identity field {}",
                    name, entity.identity_field
                )));
            }
            if let Some(field) = &entity.lifecycle.visibility_field {
                if entity.get_field(field).is_none() {
                    return Err(Error::InvalidSchema(format!(
                        "visibility field {} missing on {}",
                        field, name
                    )));
                }
            }
        }

        let mut accessors: HashSet<(String, String)> = HashSet::new();
        for rel in self.relations.values() {
            let from = self.entity_or_err(&rel.from_entity, &rel.name)?;
            let to = self.entity_or_err(&rel.to_entity, &rel.name)?;

            if rel.is_many_to_many() {
                let edge_name = rel.edge_entity.as_deref().ok_or_else(|| {
                    Error::InvalidSchema(format!("relation {} has no edge entity", rel.name))
                })?;
                let edge = self.entity_or_err(edge_name, &rel.name)?;
                Self::field_or_err(edge, &rel.from_field, &rel.name)?;
                Self::field_or_err(edge, &rel.to_field, &rel.name)?;
            } else {
                Self::field_or_err(from, &rel.from_field, &rel.name)?;
                Self::field_or_err(to, &rel.to_field, &rel.name)?;
            }

            for key in [
                (rel.from_entity.clone(), rel.forward_accessor().to_string()),
                (rel.to_entity.clone(), rel.reverse_accessor()),
            ] {
                if !accessors.insert(key.clone()) {
                    return Err(Error::InvalidSchema(format!(
                        "accessor {} defined twice on {}",
                        key.1, key.0
                    )));
                }
            }
        }

        for constraint in &self.constraints {
            let entity = self.entity_or_err(&constraint.entity, &constraint.name)?;
            if constraint.fields.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "constraint {} has no fields",
                    constraint.name
                )));
            }
            for field in &constraint.fields {
                Self::field_or_err(entity, field, &constraint.name)?;
            }
        }

        Ok(())
    }

    fn entity_or_err(&self, entity: &str, owner: &str) -> Result<&EntityDef, Error> {
        self.get_entity(entity).ok_or_else(|| {
            Error::InvalidSchema(format!("{} references unknown entity {}", owner, entity))
        })
    }

    fn field_or_err(entity: &EntityDef, field: &str, owner: &str) -> Result<(), Error> {
        match entity.get_field(field) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidSchema(format!(
                "{} references unknown field {}.{}",
                owner, entity.name, field
            ))),
        }
    }

    /// Serialize the schema bundle to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a schema bundle from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl Default for SchemaBundle {
    fn default() -> Self {
        Self::new(0)
    }
}
