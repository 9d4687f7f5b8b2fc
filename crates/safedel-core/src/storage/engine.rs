//! Storage engine implementation.

use super::key::{decode_type_index_key, type_index_prefix};
use super::{Record, StorageConfig, Transaction};
use crate::catalog::UniqueConstraint;
use crate::constraint::UNIQUE_INDEX_TREE;
use crate::error::Error;
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Tree name for entity data.
const DATA_TREE: &str = "data";

/// Tree name for entity type index.
const TYPE_INDEX_TREE: &str = "index:entity_type";

/// The main storage engine wrapping sled.
///
/// Every row lives in the data tree under its 16-byte identity, masked or not.
/// The type index lists the identities of each entity type, and the unique
/// tree maps unique value tuples to the identity that owns them.
pub struct StorageEngine {
    db: Db,
    data_tree: Tree,
    type_index_tree: Tree,
    unique_tree: Tree,
    /// Unique constraints enforced at commit, keyed by entity.
    unique_sets: RwLock<HashMap<String, Vec<UniqueConstraint>>>,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let data_tree = db.open_tree(DATA_TREE)?;
        let type_index_tree = db.open_tree(TYPE_INDEX_TREE)?;
        let unique_tree = db.open_tree(UNIQUE_INDEX_TREE)?;

        info!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            "storage opened"
        );

        Ok(Self {
            db,
            data_tree,
            type_index_tree,
            unique_tree,
            unique_sets: RwLock::new(HashMap::new()),
        })
    }

    /// Check if the database was recovered from a previous run.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Get a row by identity, masked or not.
    pub fn get(&self, entity_id: &[u8; 16]) -> Result<Option<Record>, Error> {
        match self.data_tree.get(entity_id)? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether a row is physically present.
    pub fn contains(&self, entity_id: &[u8; 16]) -> Result<bool, Error> {
        Ok(self.data_tree.contains_key(entity_id)?)
    }

    /// Scan every row of an entity type, masked rows included.
    ///
    /// Rows come back in identity order.
    pub fn scan_entity_type(
        &self,
        entity_type: &str,
    ) -> impl Iterator<Item = Result<([u8; 16], Record), Error>> + '_ {
        self.type_index_tree
            .scan_prefix(type_index_prefix(entity_type))
            .filter_map(move |result| {
                let id = match result {
                    Ok((key, _)) => match decode_type_index_key(&key) {
                        Some(id) => id,
                        None => return Some(Err(Error::InvalidKey)),
                    },
                    Err(e) => return Some(Err(e.into())),
                };
                match self.get(&id) {
                    Ok(Some(record)) => Some(Ok((id, record))),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            })
    }

    /// Begin a new transaction.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Allocate a fresh identifier for a masking operation.
    pub fn next_batch_id(&self) -> Result<u64, Error> {
        Ok(self.db.generate_id()?)
    }

    /// Replace the unique constraints enforced at commit.
    pub fn set_unique_constraints(&self, sets: HashMap<String, Vec<UniqueConstraint>>) {
        *self.unique_sets.write() = sets;
    }

    /// Unique constraints enforced for an entity.
    pub fn unique_constraints_for(&self, entity: &str) -> Vec<UniqueConstraint> {
        self.unique_sets
            .read()
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Generate a new entity ID.
    ///
    /// The first 8 bytes hold the wall clock in nanoseconds and the last 8 a
    /// process-wide counter, both big-endian, so identity order follows
    /// creation order.
    pub fn generate_id() -> [u8; 16] {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

        let mut id = [0u8; 16];
        id[..8].copy_from_slice(&now.to_be_bytes());
        id[8..].copy_from_slice(&counter.to_be_bytes());
        id
    }

    pub(crate) fn data_tree(&self) -> &Tree {
        &self.data_tree
    }

    pub(crate) fn type_index_tree(&self) -> &Tree {
        &self.type_index_tree
    }

    pub(crate) fn unique_tree(&self) -> &Tree {
        &self.unique_tree
    }

    /// Get the underlying sled database (for opening new trees).
    pub fn db(&self) -> &Db {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestDb {
        engine: StorageEngine,
        _dir: tempfile::TempDir,
    }

    impl std::ops::Deref for TestDb {
        type Target = StorageEngine;
        fn deref(&self) -> &Self::Target {
            &self.engine
        }
    }

    fn test_engine() -> TestDb {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(StorageConfig::new(dir.path())).unwrap();
        TestDb { engine, _dir: dir }
    }

    #[test]
    fn test_insert_and_get() {
        let engine = test_engine();
        let id = StorageEngine::generate_id();

        let mut tx = engine.transaction();
        tx.insert(id, Record::new("User", vec![1, 2, 3]));
        tx.commit().unwrap();

        let record = engine.get(&id).unwrap().unwrap();
        assert_eq!(record.entity, "User");
        assert_eq!(record.data, vec![1, 2, 3]);
        assert!(engine.contains(&id).unwrap());
    }

    #[test]
    fn test_scan_includes_masked_rows() {
        let engine = test_engine();
        let live = StorageEngine::generate_id();
        let masked = StorageEngine::generate_id();
        let other = StorageEngine::generate_id();

        let mut hidden = Record::new("User", vec![2]);
        hidden.mask(10, 1);

        let mut tx = engine.transaction();
        tx.insert(live, Record::new("User", vec![1]));
        tx.insert(masked, hidden);
        tx.insert(other, Record::new("Post", vec![3]));
        tx.commit().unwrap();

        let rows: Vec<_> = engine
            .scan_entity_type("User")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, live);
        assert!(rows[1].1.is_masked());
    }

    #[test]
    fn test_generate_id_is_ordered() {
        let a = StorageEngine::generate_id();
        let b = StorageEngine::generate_id();
        assert!(a < b);
    }

    #[test]
    fn test_batch_ids_are_distinct() {
        let engine = test_engine();
        let a = engine.next_batch_id().unwrap();
        let b = engine.next_batch_id().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let id = StorageEngine::generate_id();

        {
            let engine = StorageEngine::open(StorageConfig::new(dir.path())).unwrap();
            let mut tx = engine.transaction();
            tx.insert(id, Record::new("User", vec![9]));
            tx.commit().unwrap();
            engine.flush().unwrap();
        }

        let engine = StorageEngine::open(StorageConfig::new(dir.path())).unwrap();
        assert_eq!(engine.get(&id).unwrap().unwrap().data, vec![9]);
    }
}
