//! Deletion policies and visibility strategies.
//!
//! Every entity type carries exactly one deletion policy and one visibility
//! strategy. The [`PolicyRegistry`] resolves both from the applied schema;
//! unknown entity types fall back to soft delete with masked rows hidden.

mod deletion;
mod registry;
mod visibility;

pub use deletion::{DeletionPolicy, PolicyBehavior};
pub use registry::PolicyRegistry;
pub use visibility::{Visibility, VisibilityRule};
