//! Uniqueness checks that see masked rows.
//!
//! A masked row keeps its unique values, so a new row reusing one of them
//! conflicts until the masked row is removed for good. Callers decide whether
//! to report the conflict or reinstate the masked owner.

use safedel_proto::Value;

use crate::catalog::{SchemaBundle, UniqueConstraint};
use crate::error::{Error, UniqueConflict};
use crate::storage::StorageEngine;

use super::unique_index::{render_values, UniqueIndex};

/// Checks unique fields and composite constraints of an entity type.
pub struct UniquenessValidator<'a> {
    engine: &'a StorageEngine,
    schema: &'a SchemaBundle,
    index: UniqueIndex,
}

impl<'a> UniquenessValidator<'a> {
    /// Create a validator reading the engine's unique index.
    pub fn new(engine: &'a StorageEngine, schema: &'a SchemaBundle) -> Self {
        Self {
            engine,
            schema,
            index: UniqueIndex::new(engine.unique_tree().clone()),
        }
    }

    /// First constraint whose values in `field_values` are taken by another row.
    ///
    /// Constraints not fully covered by `field_values` are skipped, as are
    /// tuples containing a null. The row `exclude_id` may keep its own values.
    pub fn check_unique(
        &self,
        entity: &str,
        field_values: &[(String, Value)],
        exclude_id: Option<[u8; 16]>,
    ) -> Result<Option<UniqueConflict>, Error> {
        for constraint in self.schema.unique_sets(entity) {
            let Some(values) = Self::covered_values(&constraint, field_values) else {
                continue;
            };
            let Some(existing) = self.index.lookup(entity, &constraint.name, &values)? else {
                continue;
            };
            if exclude_id == Some(existing) {
                continue;
            }

            let masked = self.engine.get(&existing)?.is_some_and(|r| r.is_masked());
            return Ok(Some(UniqueConflict {
                entity: entity.to_string(),
                constraint: constraint.name.clone(),
                fields: constraint.fields.clone(),
                value: render_values(&values),
                existing_id: existing,
                masked,
            }));
        }
        Ok(None)
    }

    /// Like [`Self::check_unique`], failing on the first conflict.
    pub fn validate(
        &self,
        entity: &str,
        field_values: &[(String, Value)],
        exclude_id: Option<[u8; 16]>,
    ) -> Result<(), Error> {
        match self.check_unique(entity, field_values, exclude_id)? {
            Some(conflict) => Err(conflict.into()),
            None => Ok(()),
        }
    }

    fn covered_values(
        constraint: &UniqueConstraint,
        field_values: &[(String, Value)],
    ) -> Option<Vec<Value>> {
        constraint
            .fields
            .iter()
            .map(|f| {
                field_values
                    .iter()
                    .find(|(n, _)| n == f)
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }
}
