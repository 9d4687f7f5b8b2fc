//! Semantic catalog.
//!
//! The catalog stores entity, relation and constraint metadata, together with
//! each entity's lifecycle rules, and versions every applied schema.

mod catalog;
mod constraint;
mod entity;
mod field;
mod graph;
mod relation;
mod schema;
mod types;

pub use catalog::Catalog;
pub use constraint::UniqueConstraint;
pub use entity::{EntityDef, LifecycleRules};
pub use field::{DefaultValue, FieldDef};
pub use graph::{RelationGraph, RelationPath};
pub use relation::{Cardinality, DeleteBehavior, RelationDef};
pub use schema::SchemaBundle;
pub use types::{FieldType, ScalarType};
