//! Storage layer for safedel.
//!
//! A sled-backed record store. Rows are never versioned: a row is live, masked
//! (its record carries `deleted_at`) or physically absent.

mod config;
mod engine;
mod record;
mod referential;
mod transaction;

pub mod key;

pub use config::StorageConfig;
pub use engine::StorageEngine;
pub use record::Record;
pub use referential::{ReferentialActions, RemovalGuard, RemovalPlan, DEFAULT_MAX_DEPTH};
pub use transaction::Transaction;
