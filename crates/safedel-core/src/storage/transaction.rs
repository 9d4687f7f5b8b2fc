//! Transaction support for atomic multi-row operations.

use std::collections::{HashMap, HashSet};

use super::key::type_index_key;
use super::{Record, StorageEngine};
use crate::constraint::unique_index::{decode_id, render_values, UniqueIndex};
use crate::error::{Error, UniqueConflict};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::Transactional;

/// A pending operation in a transaction.
#[derive(Debug, Clone)]
enum TransactionOp {
    /// Write a new row.
    Insert {
        /// Entity ID.
        entity_id: [u8; 16],
        /// Row contents.
        record: Record,
    },
    /// Overwrite an existing row (data or mask state).
    Update {
        /// Entity ID.
        entity_id: [u8; 16],
        /// New row contents.
        record: Record,
    },
    /// Physically remove a row.
    Remove {
        /// Entity type name.
        entity: String,
        /// Entity ID to remove.
        entity_id: [u8; 16],
    },
}

impl TransactionOp {
    fn entity_id(&self) -> [u8; 16] {
        match self {
            TransactionOp::Insert { entity_id, .. }
            | TransactionOp::Update { entity_id, .. }
            | TransactionOp::Remove { entity_id, .. } => *entity_id,
        }
    }
}

/// A serialized write, ready to replay inside the sled transaction.
enum StagedWrite {
    Put {
        id: [u8; 16],
        index_key: Vec<u8>,
        bytes: Vec<u8>,
    },
    Remove {
        id: [u8; 16],
        index_key: Vec<u8>,
    },
}

/// A unique key the commit must claim for a row.
struct ClaimedKey {
    key: Vec<u8>,
    owner: [u8; 16],
    conflict: UniqueConflict,
}

#[derive(Default)]
struct UniqueWork {
    released: Vec<(Vec<u8>, [u8; 16])>,
    claimed: Vec<ClaimedKey>,
}

/// A transaction for atomic multi-row operations.
///
/// Operations are collected and executed atomically on commit. Dropping an
/// uncommitted transaction discards them.
pub struct Transaction<'a> {
    engine: &'a StorageEngine,
    ops: Vec<TransactionOp>,
    /// Final state of every touched row (entity_id -> record, None if removed).
    write_cache: HashMap<[u8; 16], Option<Record>>,
}

impl<'a> Transaction<'a> {
    /// Create a new transaction.
    pub(crate) fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            ops: Vec::new(),
            write_cache: HashMap::new(),
        }
    }

    /// Queue an insert operation.
    pub fn insert(&mut self, entity_id: [u8; 16], record: Record) -> &mut Self {
        self.write_cache.insert(entity_id, Some(record.clone()));
        self.ops.push(TransactionOp::Insert { entity_id, record });
        self
    }

    /// Queue an update operation.
    pub fn update(&mut self, entity_id: [u8; 16], record: Record) -> &mut Self {
        self.write_cache.insert(entity_id, Some(record.clone()));
        self.ops.push(TransactionOp::Update { entity_id, record });
        self
    }

    /// Queue a physical removal.
    pub fn remove(&mut self, entity: impl Into<String>, entity_id: [u8; 16]) -> &mut Self {
        self.write_cache.insert(entity_id, None);
        self.ops.push(TransactionOp::Remove {
            entity: entity.into(),
            entity_id,
        });
        self
    }

    /// Commit the transaction atomically.
    ///
    /// Row writes, type index entries and unique keys change together or not
    /// at all. A unique key already owned by another row aborts the commit.
    pub fn commit(self) -> Result<(), Error> {
        if self.ops.is_empty() {
            return Ok(());
        }

        let writes = self.stage_writes()?;
        let unique = self.collect_unique_work()?;

        let data_tree = self.engine.data_tree();
        let type_index_tree = self.engine.type_index_tree();
        let unique_tree = self.engine.unique_tree();

        let result: Result<(), TransactionError<Error>> = (
            data_tree,
            type_index_tree,
            unique_tree,
        )
            .transaction(|(data_tx, type_tx, unique_tx)| {
                for write in &writes {
                    match write {
                        StagedWrite::Put {
                            id,
                            index_key,
                            bytes,
                        } => {
                            data_tx.insert(&id[..], bytes.as_slice())?;
                            type_tx.insert(index_key.as_slice(), &b""[..])?;
                        }
                        StagedWrite::Remove { id, index_key } => {
                            data_tx.remove(&id[..])?;
                            type_tx.remove(index_key.as_slice())?;
                        }
                    }
                }
                Self::apply_unique_work(data_tx, unique_tx, &unique)?;
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    fn stage_writes(&self) -> Result<Vec<StagedWrite>, Error> {
        self.ops
            .iter()
            .map(|op| -> Result<StagedWrite, Error> {
                Ok(match op {
                    TransactionOp::Insert { entity_id, record }
                    | TransactionOp::Update { entity_id, record } => StagedWrite::Put {
                        id: *entity_id,
                        index_key: type_index_key(&record.entity, entity_id),
                        bytes: record.to_bytes()?,
                    },
                    TransactionOp::Remove { entity, entity_id } => StagedWrite::Remove {
                        id: *entity_id,
                        index_key: type_index_key(entity, entity_id),
                    },
                })
            })
            .collect()
    }

    /// Diff the unique keys of every touched row between its committed state
    /// and its final state in this transaction.
    fn collect_unique_work(&self) -> Result<UniqueWork, Error> {
        let mut work = UniqueWork::default();
        let mut seen = HashSet::new();

        for op in &self.ops {
            let id = op.entity_id();
            if !seen.insert(id) {
                continue;
            }

            let before = self.engine.get(&id)?;
            let after = self.write_cache.get(&id).cloned().flatten();

            let entity = match (&after, &before, op) {
                (Some(r), _, _) | (None, Some(r), _) => r.entity.clone(),
                (None, None, TransactionOp::Remove { entity, .. }) => entity.clone(),
                (None, None, _) => continue,
            };
            let constraints = self.engine.unique_constraints_for(&entity);
            if constraints.is_empty() {
                continue;
            }

            let mut after_keys = HashSet::new();
            if let Some(record) = &after {
                for constraint in &constraints {
                    if let Some((key, values)) = UniqueIndex::key_from_row(constraint, &record.data)? {
                        after_keys.insert(key.clone());
                        work.claimed.push(ClaimedKey {
                            key,
                            owner: id,
                            conflict: UniqueConflict {
                                entity: entity.clone(),
                                constraint: constraint.name.clone(),
                                fields: constraint.fields.clone(),
                                value: render_values(&values),
                                existing_id: [0u8; 16],
                                masked: false,
                            },
                        });
                    }
                }
            }

            if let Some(record) = &before {
                for constraint in &constraints {
                    if let Some((key, _)) = UniqueIndex::key_from_row(constraint, &record.data)? {
                        if !after_keys.contains(&key) {
                            work.released.push((key, id));
                        }
                    }
                }
            }
        }

        Ok(work)
    }

    fn apply_unique_work(
        data_tx: &TransactionalTree,
        unique_tx: &TransactionalTree,
        work: &UniqueWork,
    ) -> Result<(), ConflictableTransactionError<Error>> {
        for (key, owner) in &work.released {
            if let Some(current) = unique_tx.get(key.as_slice())? {
                if current[..] == owner[..] {
                    unique_tx.remove(key.as_slice())?;
                }
            }
        }

        for claim in &work.claimed {
            if let Some(current) = unique_tx.get(claim.key.as_slice())? {
                if current[..] != claim.owner[..] {
                    let existing_id =
                        decode_id(&current).map_err(ConflictableTransactionError::Abort)?;
                    let masked = match data_tx.get(&existing_id[..])? {
                        Some(bytes) => Record::from_bytes(&bytes)
                            .map_err(ConflictableTransactionError::Abort)?
                            .is_masked(),
                        None => false,
                    };
                    let mut conflict = claim.conflict.clone();
                    conflict.existing_id = existing_id;
                    conflict.masked = masked;
                    return Err(ConflictableTransactionError::Abort(
                        Error::UniqueViolation(conflict),
                    ));
                }
            }
            unique_tx.insert(claim.key.as_slice(), &claim.owner[..])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UniqueConstraint;
    use crate::query::encode_entity;
    use crate::storage::StorageConfig;
    use safedel_proto::Value;

    fn test_engine() -> StorageEngine {
        let engine = StorageEngine::open(StorageConfig::temporary()).unwrap();
        engine.set_unique_constraints(HashMap::from([(
            "User".to_string(),
            vec![UniqueConstraint::unique("user_email_unique", "User", "email")],
        )]));
        engine
    }

    fn user(email: &str) -> Record {
        let data = encode_entity(&[("email".to_string(), Value::String(email.into()))]).unwrap();
        Record::new("User", data)
    }

    #[test]
    fn test_transaction_commit() {
        let engine = test_engine();
        let id1 = StorageEngine::generate_id();
        let id2 = StorageEngine::generate_id();

        let mut tx = engine.transaction();
        tx.insert(id1, user("a@example.com"));
        tx.insert(id2, user("b@example.com"));
        tx.commit().unwrap();

        assert!(engine.get(&id1).unwrap().is_some());
        assert!(engine.get(&id2).unwrap().is_some());
    }

    #[test]
    fn test_dropped_transaction_writes_nothing() {
        let engine = test_engine();
        let id = StorageEngine::generate_id();

        {
            let mut tx = engine.transaction();
            tx.insert(id, user("a@example.com"));
        }

        assert!(engine.get(&id).unwrap().is_none());
        assert!(engine.transaction().commit().is_ok());
    }

    #[test]
    fn test_last_write_wins_within_commit() {
        let engine = test_engine();
        let id = StorageEngine::generate_id();

        let mut tx = engine.transaction();
        tx.insert(id, user("a@example.com"));
        tx.remove("User", id);
        tx.commit().unwrap();
        assert!(engine.get(&id).unwrap().is_none());

        // The removed row never claimed its key.
        let mut tx = engine.transaction();
        tx.insert(StorageEngine::generate_id(), user("a@example.com"));
        assert!(tx.commit().is_ok());
    }

    #[test]
    fn test_unique_conflict_aborts_whole_commit() {
        let engine = test_engine();
        let id1 = StorageEngine::generate_id();
        let id2 = StorageEngine::generate_id();
        let id3 = StorageEngine::generate_id();

        let mut tx = engine.transaction();
        tx.insert(id1, user("dup@example.com"));
        tx.commit().unwrap();

        let mut tx = engine.transaction();
        tx.insert(id3, user("fresh@example.com"));
        tx.insert(id2, user("dup@example.com"));
        let result = tx.commit();

        if let Err(Error::UniqueViolation(conflict)) = result {
            assert_eq!(conflict.existing_id, id1);
            assert!(!conflict.masked);
            assert_eq!(conflict.value, "dup@example.com");
        } else {
            panic!("Expected UniqueViolation error");
        }
        assert!(engine.get(&id3).unwrap().is_none());
    }

    #[test]
    fn test_masked_row_keeps_unique_key() {
        let engine = test_engine();
        let id1 = StorageEngine::generate_id();
        let id2 = StorageEngine::generate_id();

        let mut masked = user("gone@example.com");
        masked.mask(5, 1);
        let mut tx = engine.transaction();
        tx.insert(id1, masked);
        tx.commit().unwrap();

        let mut tx = engine.transaction();
        tx.insert(id2, user("gone@example.com"));
        if let Err(Error::UniqueViolation(conflict)) = tx.commit() {
            assert!(conflict.masked);
        } else {
            panic!("Expected UniqueViolation error");
        }
    }

    #[test]
    fn test_remove_releases_unique_key() {
        let engine = test_engine();
        let id1 = StorageEngine::generate_id();
        let id2 = StorageEngine::generate_id();

        let mut tx = engine.transaction();
        tx.insert(id1, user("x@example.com"));
        tx.commit().unwrap();

        let mut tx = engine.transaction();
        tx.remove("User", id1);
        tx.insert(id2, user("x@example.com"));
        tx.commit().unwrap();

        assert!(engine.get(&id1).unwrap().is_none());
        assert!(engine.scan_entity_type("User").count() == 1);
    }

    #[test]
    fn test_update_moves_unique_key() {
        let engine = test_engine();
        let id1 = StorageEngine::generate_id();
        let id2 = StorageEngine::generate_id();

        let mut tx = engine.transaction();
        tx.insert(id1, user("old@example.com"));
        tx.commit().unwrap();

        let mut tx = engine.transaction();
        tx.update(id1, user("new@example.com"));
        tx.commit().unwrap();

        // The old value is free again.
        let mut tx = engine.transaction();
        tx.insert(id2, user("old@example.com"));
        tx.commit().unwrap();
    }
}
