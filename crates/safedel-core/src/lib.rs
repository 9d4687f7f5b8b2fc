//! Safedel Core - storage engine, catalog, deletion policies and retrieval.
//!
//! This crate provides everything below the soft-delete facade: a sled-backed
//! record store with atomic multi-tree transactions, the schema catalog and
//! relation graph, the per-entity policy registry, uniqueness checks that see
//! masked rows, and the visibility-aware query executor.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod constraint;
pub mod error;
pub mod policy;
pub mod query;
pub mod storage;

pub use catalog::{
    Cardinality, Catalog, DefaultValue, DeleteBehavior, EntityDef, FieldDef, FieldType,
    LifecycleRules, RelationDef, RelationGraph, RelationPath, ScalarType, SchemaBundle,
    UniqueConstraint,
};
pub use constraint::{UniqueIndex, UniquenessValidator};
pub use error::{Error, PolicyViolation, UniqueConflict};
pub use policy::{DeletionPolicy, PolicyBehavior, PolicyRegistry, Visibility, VisibilityRule};
pub use query::{
    EntityRow, MaskPredicate, Query, QueryExecutor, VisibilityFilter, VisibilityOverride,
};
pub use storage::{
    ReferentialActions, RemovalGuard, RemovalPlan, Record, StorageConfig, StorageEngine,
    Transaction,
};

/// Re-export shared value and query types.
pub use safedel_proto as proto;
