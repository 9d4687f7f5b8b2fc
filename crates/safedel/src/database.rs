//! Database handle combining storage, catalog and the soft-delete machinery.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use safedel_core::catalog::{Catalog, RelationGraph, SchemaBundle};
use safedel_core::constraint::{UniqueIndex, UniquenessValidator};
use safedel_core::policy::{DeletionPolicy, PolicyRegistry};
use safedel_core::query::{EntityRow, Query, QueryExecutor, VisibilityFilter};
use safedel_core::storage::StorageEngine;
use safedel_core::{UniqueConflict, VisibilityOverride};
use safedel_proto::Value;
use tracing::info;

use crate::cascade::{CascadeEngine, CascadePlan, CascadeReport};
use crate::config::DatabaseConfig;
use crate::error::Error;
use crate::mutation::{MutationExecutor, UpsertResult};
use crate::queryset::QuerySet;
use crate::signals::Signals;

#[derive(Debug, Clone, Copy)]
enum CascadeOp {
    Delete,
    Undelete,
}

/// Everything derived from one applied schema.
pub(crate) struct SchemaState {
    pub(crate) schema: Arc<SchemaBundle>,
    pub(crate) graph: RelationGraph,
    pub(crate) registry: PolicyRegistry,
}

impl SchemaState {
    fn build(schema: Arc<SchemaBundle>) -> Self {
        Self {
            graph: RelationGraph::build(&schema),
            registry: PolicyRegistry::from_schema(&schema),
            schema,
        }
    }

    pub(crate) fn executor<'a>(&'a self, engine: &'a StorageEngine) -> QueryExecutor<'a> {
        QueryExecutor::new(engine, &self.schema, &self.graph, &self.registry)
    }
}

/// An embedded database with reversible deletion.
///
/// Reads take a snapshot of the applied schema and run without locking.
/// Every mutation holds the write lock from planning to commit.
pub struct Database {
    storage: StorageEngine,
    catalog: Catalog,
    state: RwLock<Arc<SchemaState>>,
    signals: Signals,
    config: DatabaseConfig,
    write_lock: Mutex<()>,
}

impl Database {
    /// Open a database, restoring the last applied schema if there is one.
    pub fn open(config: DatabaseConfig) -> Result<Self, Error> {
        let storage = StorageEngine::open(config.storage.clone())?;
        let catalog = Catalog::open(storage.db())?;

        let schema = catalog
            .current_schema()
            .unwrap_or_else(|| Arc::new(SchemaBundle::new(0)));
        let state = SchemaState::build(schema);
        storage.set_unique_constraints(Self::unique_sets(&state.schema));

        info!(
            schema_version = catalog.current_version(),
            entities = state.schema.entities.len(),
            max_cascade_depth = config.max_cascade_depth,
            "database opened"
        );

        Ok(Self {
            storage,
            catalog,
            state: RwLock::new(Arc::new(state)),
            signals: Signals::new(),
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Open a throwaway in-memory database.
    pub fn open_temporary() -> Result<Self, Error> {
        Self::open(DatabaseConfig::temporary())
    }

    /// Validate and apply a schema, returning its version.
    ///
    /// Unique indexes are rebuilt from the stored rows, masked rows included.
    /// Every new index is computed before anything is written, so a schema the
    /// stored rows violate leaves the active schema and its indexes intact.
    pub fn apply_schema(&self, bundle: SchemaBundle) -> Result<u64, Error> {
        let _guard = self.write_lock.lock();

        bundle.validate()?;
        let sets = Self::unique_sets(&bundle);
        let previous = Self::unique_sets(&self.snapshot().schema);

        let index = UniqueIndex::open(self.storage.db())?;
        let mut rebuilds = Vec::with_capacity(sets.len());
        for (entity, constraints) in &sets {
            rebuilds.push(index.prepare_rebuild(&self.storage, entity, constraints)?);
        }
        for entity in previous.keys().filter(|e| !sets.contains_key(*e)) {
            rebuilds.push(index.prepare_rebuild(&self.storage, entity, &[])?);
        }

        let version = self.catalog.apply_schema(bundle)?;
        let schema = self
            .catalog
            .current_schema()
            .ok_or_else(|| Error::Config("applied schema is not readable".into()))?;
        let keys = index.apply_rebuilds(&rebuilds)?;
        let state = SchemaState::build(schema);
        self.storage.set_unique_constraints(sets);

        info!(version, relations = state.graph.len(), unique_keys = keys, "schema active");
        *self.state.write() = Arc::new(state);
        Ok(version)
    }

    /// Query set over the live rows of `entity`, per its visibility strategy.
    pub fn objects(&self, entity: impl Into<String>) -> QuerySet<'_> {
        QuerySet::new(self, entity)
    }

    /// Query set over every row of `entity`, masked or not.
    pub fn all_objects(&self, entity: impl Into<String>) -> QuerySet<'_> {
        QuerySet::new(self, entity).with_visibility(VisibilityOverride::ShowAll)
    }

    /// Query set over the masked rows of `entity`.
    pub fn deleted_objects(&self, entity: impl Into<String>) -> QuerySet<'_> {
        QuerySet::new(self, entity).with_visibility(VisibilityOverride::MaskedOnly)
    }

    /// Rows related to `row` through `accessor`, filtered by the target's visibility.
    pub fn related(&self, row: &EntityRow, accessor: &str) -> Result<QuerySet<'_>, Error> {
        let state = self.snapshot();
        let query = state.executor(&self.storage).related_query(row, accessor)?;
        Ok(QuerySet::from_query(self, query))
    }

    /// Reload a row, masked or not.
    pub fn refresh(&self, row: &EntityRow) -> Result<EntityRow, Error> {
        let state = self.snapshot();
        state
            .executor(&self.storage)
            .load(&row.id)?
            .filter(|r| r.entity == row.entity)
            .ok_or_else(|| Error::not_found(&row.entity, &row.id))
    }

    /// Insert a new row.
    pub fn create<K: Into<String>>(
        &self,
        entity: &str,
        fields: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<EntityRow, Error> {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let _guard = self.write_lock.lock();
        let state = self.snapshot();
        self.mutator(&state).create(entity, fields)
    }

    /// Write a row back, reinstating it if it is masked.
    pub fn save(&self, row: &EntityRow) -> Result<EntityRow, Error> {
        let _guard = self.write_lock.lock();
        let state = self.snapshot();
        self.mutator(&state).save(row)
    }

    /// Update the row matching `lookup`, reinstate a masked match, or create one.
    pub fn upsert<K: Into<String>, V: Into<String>>(
        &self,
        entity: &str,
        lookup: impl IntoIterator<Item = (K, Value)>,
        values: impl IntoIterator<Item = (V, Value)>,
    ) -> Result<UpsertResult, Error> {
        let lookup = lookup.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let _guard = self.write_lock.lock();
        let state = self.snapshot();
        self.mutator(&state).upsert(entity, lookup, values)
    }

    /// Delete a row under its entity's policy, or under `forced`.
    pub fn delete(
        &self,
        row: &EntityRow,
        forced: Option<DeletionPolicy>,
    ) -> Result<CascadeReport, Error> {
        let _guard = self.write_lock.lock();
        self.run_cascade(CascadeOp::Delete, &[(row.entity.clone(), row.id)], forced)
    }

    /// Undelete a row under its entity's policy, or under `forced`.
    pub fn undelete(
        &self,
        row: &EntityRow,
        forced: Option<DeletionPolicy>,
    ) -> Result<CascadeReport, Error> {
        let _guard = self.write_lock.lock();
        self.run_cascade(CascadeOp::Undelete, &[(row.entity.clone(), row.id)], forced)
    }

    /// Unique value held by another row, masked rows included.
    pub fn validate_unique<K: Into<String>>(
        &self,
        entity: &str,
        fields: impl IntoIterator<Item = (K, Value)>,
        exclude: Option<[u8; 16]>,
    ) -> Result<Option<UniqueConflict>, Error> {
        let fields: Vec<(String, Value)> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let state = self.snapshot();
        Ok(UniquenessValidator::new(&self.storage, &state.schema)
            .check_unique(entity, &fields, exclude)?)
    }

    /// Lifecycle listener registry.
    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Active configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The applied schema.
    pub fn schema(&self) -> Arc<SchemaBundle> {
        Arc::clone(&self.snapshot().schema)
    }

    /// Version of the applied schema, 0 before the first one.
    pub fn schema_version(&self) -> u64 {
        self.catalog.current_version()
    }

    /// Deletion policy `entity` resolves to.
    pub fn policy_for(&self, entity: &str) -> DeletionPolicy {
        self.snapshot().registry.policy_for(entity, None)
    }

    /// Get a reference to the storage engine.
    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.catalog.flush()?;
        self.storage.flush()?;
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Arc<SchemaState> {
        Arc::clone(&self.state.read())
    }

    /// Delete every row `query` matches, resolved under the write lock.
    pub(crate) fn delete_matching(
        &self,
        query: Query,
        visibility: Option<VisibilityOverride>,
        forced: Option<DeletionPolicy>,
    ) -> Result<CascadeReport, Error> {
        let _guard = self.write_lock.lock();
        let targets = self.matching(query, visibility)?;
        self.run_cascade(CascadeOp::Delete, &targets, forced)
    }

    /// Undelete every row `query` matches, resolved under the write lock.
    pub(crate) fn undelete_matching(
        &self,
        query: Query,
        visibility: Option<VisibilityOverride>,
        forced: Option<DeletionPolicy>,
    ) -> Result<CascadeReport, Error> {
        let _guard = self.write_lock.lock();
        let targets = self.matching(query, visibility)?;
        self.run_cascade(CascadeOp::Undelete, &targets, forced)
    }

    fn matching(
        &self,
        mut query: Query,
        visibility: Option<VisibilityOverride>,
    ) -> Result<Vec<(String, [u8; 16])>, Error> {
        let state = self.snapshot();
        query.select_related.clear();
        query.prefetch.clear();
        let rule = state.registry.visibility_for(&query.entity);
        let query = VisibilityFilter::apply(query, &rule, visibility);
        Ok(state
            .executor(&self.storage)
            .execute(&query)?
            .into_iter()
            .map(|row| (row.entity, row.id))
            .collect())
    }

    /// Plan every target into one cascade and commit it. The caller holds the write lock.
    fn run_cascade(
        &self,
        op: CascadeOp,
        targets: &[(String, [u8; 16])],
        forced: Option<DeletionPolicy>,
    ) -> Result<CascadeReport, Error> {
        let state = self.snapshot();
        let cascade = self.cascade(&state)?;
        let mut plan = CascadePlan::new();
        for (entity, id) in targets {
            match op {
                CascadeOp::Delete => cascade.plan_delete(&mut plan, entity, *id, forced)?,
                CascadeOp::Undelete => cascade.plan_undelete(&mut plan, entity, *id, forced)?,
            }
        }
        plan.execute(&self.storage, &self.signals)
    }

    fn cascade<'a>(&'a self, state: &'a SchemaState) -> Result<CascadeEngine<'a>, Error> {
        CascadeEngine::new(
            &self.storage,
            &state.schema,
            &state.graph,
            &state.registry,
            self.config.max_cascade_depth,
        )
    }

    fn mutator<'a>(&'a self, state: &'a SchemaState) -> MutationExecutor<'a> {
        MutationExecutor::new(
            &self.storage,
            state,
            &self.signals,
            self.config.interpret_undeleted_objects_as_created,
        )
    }

    fn unique_sets(schema: &SchemaBundle) -> HashMap<String, Vec<safedel_core::UniqueConstraint>> {
        schema
            .entity_names()
            .into_iter()
            .map(|entity| (entity.to_string(), schema.unique_sets(entity)))
            .filter(|(_, sets)| !sets.is_empty())
            .collect()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema_version", &self.schema_version())
            .field("config", &self.config)
            .finish()
    }
}
