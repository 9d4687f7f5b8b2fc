//! Safedel shared types.
//!
//! This crate defines the runtime values and the retrieval vocabulary
//! (filters, ordering, slicing, aggregation) used by the storage layer and the
//! soft-delete facade.
//!
//! # Modules
//!
//! - [`value`] - Runtime field values
//! - [`query`] - Filter, ordering, pagination and aggregation types
//! - [`error`] - Conversion error types
//!
//! All types derive `rkyv` archive traits so they can be persisted inside the
//! catalog, and `serde` traits so they can be read from configuration.

pub mod error;
pub mod query;
pub mod value;

pub use error::Error;
pub use query::{
    AggregateFunction, Aggregation, FilterExpr, OrderDirection, OrderSpec, Pagination,
    SimpleFilter,
};
pub use value::Value;
