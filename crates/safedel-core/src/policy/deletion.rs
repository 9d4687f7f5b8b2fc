//! Deletion policies and their behaviour table.

use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// How a delete request is carried out for an entity type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum DeletionPolicy {
    /// Deletes are ignored.
    NoDelete,
    /// Mask the row only.
    SoftDelete,
    /// Mask the row and every cascading soft-deletable dependent.
    SoftDeleteCascade,
    /// Remove the row; dependents follow their relation behaviour.
    HardDelete,
    /// Remove the row, refusing if any cascading dependent exists.
    HardDeleteNoCascade,
}

/// The fixed effects of a deletion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyBehavior {
    /// Delete sets the mask on the target.
    pub masks: bool,
    /// Delete physically removes the target.
    pub removes: bool,
    /// Masking follows cascading relations to dependents.
    pub propagates: bool,
    /// Cascading dependents refuse the delete instead of following it.
    pub guards_children: bool,
    /// Undelete clears a mask on the target.
    pub restores: bool,
}

impl DeletionPolicy {
    /// Resolve the behaviour table for this policy.
    pub const fn behavior(self) -> PolicyBehavior {
        match self {
            DeletionPolicy::NoDelete => PolicyBehavior {
                masks: false,
                removes: false,
                propagates: false,
                guards_children: false,
                restores: false,
            },
            DeletionPolicy::SoftDelete => PolicyBehavior {
                masks: true,
                removes: false,
                propagates: false,
                guards_children: false,
                restores: true,
            },
            DeletionPolicy::SoftDeleteCascade => PolicyBehavior {
                masks: true,
                removes: false,
                propagates: true,
                guards_children: false,
                restores: true,
            },
            DeletionPolicy::HardDelete => PolicyBehavior {
                masks: false,
                removes: true,
                propagates: false,
                guards_children: false,
                restores: true,
            },
            DeletionPolicy::HardDeleteNoCascade => PolicyBehavior {
                masks: false,
                removes: true,
                propagates: false,
                guards_children: true,
                restores: true,
            },
        }
    }

    /// Short name used in logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionPolicy::NoDelete => "no_delete",
            DeletionPolicy::SoftDelete => "soft_delete",
            DeletionPolicy::SoftDeleteCascade => "soft_delete_cascade",
            DeletionPolicy::HardDelete => "hard_delete",
            DeletionPolicy::HardDeleteNoCascade => "hard_delete_nocascade",
        }
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
