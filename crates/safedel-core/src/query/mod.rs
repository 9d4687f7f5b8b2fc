//! Retrieval for safedel.
//!
//! Queries are plain descriptions ([`Query`]) run by the [`QueryExecutor`]
//! against the storage engine. Masked rows are excluded only when the query
//! carries a mask predicate saying so, which is what [`VisibilityFilter`]
//! sets for default retrieval.

mod executor;
mod filter;
mod request;
mod row;
pub mod value_codec;
mod visibility;

pub use executor::QueryExecutor;
pub use filter::FilterEvaluator;
pub use request::Query;
pub use row::EntityRow;
pub use value_codec::{decode_entity, encode_entity, get_field};
pub use visibility::{MaskPredicate, VisibilityFilter, VisibilityOverride};
