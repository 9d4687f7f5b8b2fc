//! Per-entity policy lookup.

use super::{DeletionPolicy, Visibility, VisibilityRule};
use crate::catalog::SchemaBundle;
use std::collections::HashMap;
use tracing::debug;

/// Discriminator used for entity types the schema does not describe.
const FALLBACK_DISCRIMINATOR: &str = "id";

#[derive(Debug, Clone)]
struct EntityPolicy {
    soft_delete: bool,
    policy: DeletionPolicy,
    visibility: VisibilityRule,
}

/// Resolves the deletion policy and visibility strategy of each entity type.
///
/// Built once per applied schema.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    entries: HashMap<String, EntityPolicy>,
}

impl PolicyRegistry {
    /// Build the registry from a schema snapshot.
    pub fn from_schema(schema: &SchemaBundle) -> Self {
        let entries = schema
            .entities
            .values()
            .map(|def| {
                let rules = &def.lifecycle;
                let entry = if rules.soft_delete {
                    let discriminator = match rules.visibility {
                        Visibility::VisibleByField => rules
                            .visibility_field
                            .clone()
                            .unwrap_or_else(|| def.identity_field.clone()),
                        _ => def.identity_field.clone(),
                    };
                    EntityPolicy {
                        soft_delete: true,
                        policy: rules.policy,
                        visibility: VisibilityRule::new(rules.visibility, discriminator),
                    }
                } else {
                    EntityPolicy {
                        soft_delete: false,
                        policy: DeletionPolicy::HardDelete,
                        visibility: VisibilityRule::new(
                            Visibility::All,
                            def.identity_field.clone(),
                        ),
                    }
                };
                (def.name.clone(), entry)
            })
            .collect();

        Self { entries }
    }

    /// The policy a delete of `entity` runs under.
    ///
    /// A forced policy always wins.
    pub fn policy_for(&self, entity: &str, forced: Option<DeletionPolicy>) -> DeletionPolicy {
        if let Some(policy) = forced {
            return policy;
        }
        match self.entries.get(entity) {
            Some(entry) => entry.policy,
            None => {
                debug!(entity, "no deletion policy configured, using soft delete");
                DeletionPolicy::SoftDelete
            }
        }
    }

    /// The visibility rule for default retrieval of `entity`.
    pub fn visibility_for(&self, entity: &str) -> VisibilityRule {
        match self.entries.get(entity) {
            Some(entry) => entry.visibility.clone(),
            None => {
                debug!(entity, "no visibility configured, hiding masked rows");
                VisibilityRule::new(Visibility::Hidden, FALLBACK_DISCRIMINATOR)
            }
        }
    }

    /// Whether rows of `entity` can carry a mask.
    pub fn is_soft_deletable(&self, entity: &str) -> bool {
        self.entries.get(entity).map_or(true, |e| e.soft_delete)
    }
}
