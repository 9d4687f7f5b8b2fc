//! Unique constraint enforcement.
//!
//! The [`UniqueIndex`] maps unique value tuples to the row that owns them and
//! is maintained by every transaction commit. The [`UniquenessValidator`]
//! answers conflict questions ahead of a write, reporting whether the owner is
//! masked.

pub(crate) mod unique_index;
mod validator;

pub use unique_index::{IndexRebuild, UniqueIndex, UNIQUE_INDEX_TREE};
pub use validator::UniquenessValidator;
