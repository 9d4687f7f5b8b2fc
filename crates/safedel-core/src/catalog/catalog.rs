//! Catalog manager for storing and retrieving schema metadata.

use super::SchemaBundle;
use crate::error::Error;
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Tree name for schema bundles.
const SCHEMA_TREE: &str = "catalog:schemas";

/// Tree name for catalog metadata.
const META_TREE: &str = "catalog:meta";

/// Key for current schema version in meta tree.
const CURRENT_VERSION_KEY: &[u8] = b"current_version";

/// The catalog manager for schema metadata.
pub struct Catalog {
    schema_tree: Tree,
    meta_tree: Tree,
    current_version: AtomicU64,
    current_schema: RwLock<Option<Arc<SchemaBundle>>>,
}

impl Catalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let schema_tree = db.open_tree(SCHEMA_TREE)?;
        let meta_tree = db.open_tree(META_TREE)?;

        let current_version = match meta_tree.get(CURRENT_VERSION_KEY)? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes.as_ref().try_into().map_err(|_| Error::InvalidKey)?;
                u64::from_be_bytes(buf)
            }
            None => 0,
        };

        let catalog = Self {
            schema_tree,
            meta_tree,
            current_version: AtomicU64::new(current_version),
            current_schema: RwLock::new(None),
        };

        if current_version > 0 {
            if let Some(schema) = catalog.schema_at_version(current_version)? {
                *catalog.current_schema.write() = Some(Arc::new(schema));
            }
        }

        Ok(catalog)
    }

    /// Get the current schema version.
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    /// Get the current schema bundle.
    pub fn current_schema(&self) -> Option<Arc<SchemaBundle>> {
        self.current_schema.read().clone()
    }

    /// Get a schema bundle at a specific version.
    pub fn schema_at_version(&self, version: u64) -> Result<Option<SchemaBundle>, Error> {
        match self.schema_tree.get(version.to_be_bytes())? {
            Some(bytes) => Ok(Some(SchemaBundle::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist a schema bundle as the next version and make it current.
    ///
    /// The bundle must already have passed [`SchemaBundle::validate`].
    /// Returns the new version number.
    pub fn apply_schema(&self, mut bundle: SchemaBundle) -> Result<u64, Error> {
        let new_version = self.current_version() + 1;
        bundle.version = new_version;

        self.schema_tree
            .insert(new_version.to_be_bytes(), bundle.to_bytes()?)?;
        self.meta_tree
            .insert(CURRENT_VERSION_KEY, &new_version.to_be_bytes())?;

        info!(
            version = new_version,
            entities = bundle.entities.len(),
            relations = bundle.relations.len(),
            "schema applied"
        );

        self.current_version.store(new_version, Ordering::SeqCst);
        *self.current_schema.write() = Some(Arc::new(bundle));

        Ok(new_version)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.schema_tree.flush()?;
        self.meta_tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, FieldType, RelationDef, ScalarType};

    fn sample_schema() -> SchemaBundle {
        let user = EntityDef::new("User", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
            .with_soft_delete();

        let post = EntityDef::new("Post", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
            .with_field(FieldDef::new(
                "author_id",
                FieldType::scalar(ScalarType::Uuid),
            ));

        SchemaBundle::new(0)
            .with_entity(user)
            .with_entity(post)
            .with_relation(RelationDef::one_to_many(
                "author", "Post", "author_id", "User", "id",
            ))
    }

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn test_catalog_open_empty() {
        let db = test_db();
        let catalog = Catalog::open(&db).unwrap();

        assert_eq!(catalog.current_version(), 0);
        assert!(catalog.current_schema().is_none());
    }

    #[test]
    fn test_apply_schema() {
        let db = test_db();
        let catalog = Catalog::open(&db).unwrap();

        let version = catalog.apply_schema(sample_schema()).unwrap();

        assert_eq!(version, 1);
        assert_eq!(catalog.current_version(), 1);
        let current = catalog.current_schema().unwrap();
        assert_eq!(current.version, 1);
        assert!(current.get_entity("User").is_some());
        assert!(current.get_entity("NonExistent").is_none());
    }

    #[test]
    fn test_schema_versioning() {
        let db = test_db();
        let catalog = Catalog::open(&db).unwrap();

        catalog.apply_schema(sample_schema()).unwrap();
        let schema2 = sample_schema().with_entity(
            EntityDef::new("Comment", "id")
                .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))),
        );
        assert_eq!(catalog.apply_schema(schema2).unwrap(), 2);

        let v1 = catalog.schema_at_version(1).unwrap().unwrap();
        assert_eq!(v1.entities.len(), 2);
        assert_eq!(catalog.current_schema().unwrap().entities.len(), 3);
        assert!(catalog.schema_at_version(3).unwrap().is_none());
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled::Config::new().path(dir.path());

        {
            let db = config.clone().open().unwrap();
            let catalog = Catalog::open(&db).unwrap();
            catalog.apply_schema(sample_schema()).unwrap();
            catalog.flush().unwrap();
        }

        {
            let db = config.open().unwrap();
            let catalog = Catalog::open(&db).unwrap();

            assert_eq!(catalog.current_version(), 1);
            let schema = catalog.current_schema().unwrap();
            assert!(schema.get_entity("User").unwrap().has_soft_delete());
        }
    }
}
