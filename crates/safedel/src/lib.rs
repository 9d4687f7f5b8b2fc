//! Safedel - reversible deletion for an embedded relational store.
//!
//! Rows are masked instead of removed, stay recoverable, and are hidden from
//! default retrieval while remaining reachable for auditing and restoration.
//! Each entity type carries a [`DeletionPolicy`] deciding what a delete does
//! and a [`Visibility`] strategy deciding which masked rows default retrieval
//! still surfaces.
//!
//! ```no_run
//! use safedel::{Database, DatabaseConfig};
//! use safedel::catalog::{EntityDef, FieldDef, FieldType, ScalarType, SchemaBundle};
//! use safedel::{DeletionPolicy, Value};
//!
//! # fn main() -> Result<(), safedel::Error> {
//! let db = Database::open(DatabaseConfig::new("./data"))?;
//! db.apply_schema(SchemaBundle::new(1).with_entity(
//!     EntityDef::new("Article", "id")
//!         .with_fields([
//!             FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)),
//!             FieldDef::new("title", FieldType::scalar(ScalarType::String)),
//!         ])
//!         .with_policy(DeletionPolicy::SoftDelete),
//! ))?;
//!
//! let article = db.create("Article", [("title", Value::from("draft"))])?;
//! db.delete(&article, None)?;
//! assert_eq!(db.objects("Article").count()?, 0);
//! assert_eq!(db.deleted_objects("Article").count()?, 1);
//! db.undelete(&article, None)?;
//! # Ok(())
//! # }
//! ```

pub mod cascade;
pub mod config;
pub mod database;
pub mod error;
pub mod mutation;
pub mod queryset;
pub mod signals;

pub use cascade::CascadeReport;
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{Error, PolicyViolation, UniqueConflict};
pub use mutation::UpsertResult;
pub use queryset::QuerySet;
pub use signals::{EventKind, LifecycleEvent, ListenerId, Signals};

pub use safedel_core::catalog;
pub use safedel_core::query::{EntityRow, VisibilityOverride};
pub use safedel_core::{DeletionPolicy, StorageConfig, Visibility};
pub use safedel_proto::{Aggregation, FilterExpr, OrderSpec, Value};
