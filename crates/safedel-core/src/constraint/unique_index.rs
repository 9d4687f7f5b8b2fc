//! Secondary index for enforcing unique constraints.
//!
//! The UniqueIndex maintains a separate sled tree that maps unique field values
//! to entity IDs. Masked rows keep their entries, so a masked row still owns
//! its unique values until it is physically removed.

use std::collections::HashMap;

use safedel_proto::Value;
use sled::Tree;

use crate::catalog::UniqueConstraint;
use crate::error::{Error, UniqueConflict};
use crate::query::value_codec::{encode_value, get_field};
use crate::storage::StorageEngine;

/// Tree name for unique constraint index.
pub const UNIQUE_INDEX_TREE: &str = "index:unique";

/// Secondary index for enforcing unique constraints.
///
/// Key format: `entity\0constraint\0<encoded value>...` -> `entity_id`.
/// Encoded values carry their own tag and length, so no separator is needed
/// between them.
pub struct UniqueIndex {
    tree: Tree,
}

impl UniqueIndex {
    /// Create a new unique index backed by the given tree.
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Open or create the unique index from a sled database.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        Ok(Self::new(db.open_tree(UNIQUE_INDEX_TREE)?))
    }

    /// Build the index key for a value tuple.
    ///
    /// Tuples containing a null never collide and get no key.
    pub fn build_key(
        entity: &str,
        constraint: &str,
        values: &[Value],
    ) -> Result<Option<Vec<u8>>, Error> {
        if values.iter().any(Value::is_null) {
            return Ok(None);
        }
        let mut key = Self::entity_prefix(entity);
        key.extend_from_slice(constraint.as_bytes());
        key.push(0);
        for value in values {
            encode_value(&mut key, value)?;
        }
        Ok(Some(key))
    }

    /// Build the key for a constraint from encoded row data.
    pub(crate) fn key_from_row(
        constraint: &UniqueConstraint,
        data: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<Value>)>, Error> {
        let values = constraint
            .fields
            .iter()
            .map(|f| get_field(data, f).map(|v| v.unwrap_or(Value::Null)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::build_key(&constraint.entity, &constraint.name, &values)?
            .map(|key| (key, values)))
    }

    fn entity_prefix(entity: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(entity.len() + 1);
        prefix.extend_from_slice(entity.as_bytes());
        prefix.push(0);
        prefix
    }

    /// Insert a unique index entry.
    ///
    /// Returns an error if the value already belongs to a different entity.
    pub fn insert(
        &self,
        constraint: &UniqueConstraint,
        values: &[Value],
        entity_id: [u8; 16],
    ) -> Result<(), Error> {
        let Some(key) = Self::build_key(&constraint.entity, &constraint.name, values)? else {
            return Ok(());
        };

        if let Some(existing) = self.tree.get(&key)? {
            if existing[..] != entity_id[..] {
                return Err(Error::UniqueViolation(UniqueConflict {
                    entity: constraint.entity.clone(),
                    constraint: constraint.name.clone(),
                    fields: constraint.fields.clone(),
                    value: render_values(values),
                    existing_id: decode_id(&existing)?,
                    masked: false,
                }));
            }
        }

        self.tree.insert(key, &entity_id)?;
        Ok(())
    }

    /// Remove a unique index entry.
    pub fn remove(&self, entity: &str, constraint: &str, values: &[Value]) -> Result<(), Error> {
        if let Some(key) = Self::build_key(entity, constraint, values)? {
            self.tree.remove(key)?;
        }
        Ok(())
    }

    /// Look up the entity ID for a unique value tuple.
    pub fn lookup(
        &self,
        entity: &str,
        constraint: &str,
        values: &[Value],
    ) -> Result<Option<[u8; 16]>, Error> {
        let Some(key) = Self::build_key(entity, constraint, values)? else {
            return Ok(None);
        };
        match self.tree.get(&key)? {
            Some(bytes) => Ok(Some(decode_id(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check if a unique value is available (absent or owned by `exclude_id`).
    pub fn check_unique(
        &self,
        entity: &str,
        constraint: &str,
        values: &[Value],
        exclude_id: Option<[u8; 16]>,
    ) -> Result<bool, Error> {
        Ok(match self.lookup(entity, constraint, values)? {
            Some(existing) => exclude_id == Some(existing),
            None => true,
        })
    }

    /// Compute the entries an entity's index holds under `constraints`.
    ///
    /// Masked rows are included. Only reads: the index is untouched until
    /// [`Self::apply_rebuilds`]. Fails on the first pair of rows sharing a
    /// value.
    pub fn prepare_rebuild(
        &self,
        engine: &StorageEngine,
        entity: &str,
        constraints: &[UniqueConstraint],
    ) -> Result<IndexRebuild, Error> {
        let mut owners: HashMap<Vec<u8>, [u8; 16]> = HashMap::new();
        let mut entries = Vec::new();

        for result in engine.scan_entity_type(entity) {
            let (id, record) = result?;
            for constraint in constraints {
                let Some((key, values)) = Self::key_from_row(constraint, &record.data)? else {
                    continue;
                };
                match owners.get(&key) {
                    Some(existing) if *existing != id => {
                        let existing = *existing;
                        let masked = engine.get(&existing)?.is_some_and(|r| r.is_masked());
                        return Err(Error::UniqueViolation(UniqueConflict {
                            entity: constraint.entity.clone(),
                            constraint: constraint.name.clone(),
                            fields: constraint.fields.clone(),
                            value: render_values(&values),
                            existing_id: existing,
                            masked,
                        }));
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(key.clone(), id);
                        entries.push((key, id));
                    }
                }
            }
        }

        Ok(IndexRebuild {
            entity: entity.to_string(),
            entries,
        })
    }

    /// Replace the entries of every prepared entity in one atomic batch.
    ///
    /// Returns the number of entries written.
    pub fn apply_rebuilds(&self, rebuilds: &[IndexRebuild]) -> Result<usize, Error> {
        let mut batch = sled::Batch::default();
        let mut written = 0;
        for rebuild in rebuilds {
            for result in self.tree.scan_prefix(Self::entity_prefix(&rebuild.entity)) {
                let (key, _) = result?;
                batch.remove(key);
            }
            for (key, id) in &rebuild.entries {
                batch.insert(key.clone(), id.to_vec());
                written += 1;
            }
        }
        self.tree.apply_batch(batch)?;
        Ok(written)
    }

    /// Flush the index to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Index entries of one entity, computed but not yet written.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRebuild {
    entity: String,
    entries: Vec<(Vec<u8>, [u8; 16])>,
}

impl IndexRebuild {
    /// Entity type rebuilt.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Number of entries to write.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the entity ends up with no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render a value tuple for error messages.
pub(crate) fn render_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn decode_id(bytes: &[u8]) -> Result<[u8; 16], Error> {
    bytes.try_into().map_err(|_| Error::InvalidKey)
}
