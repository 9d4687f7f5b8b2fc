//! Cascade engine for delete and undelete.
//!
//! Every operation runs in two phases. Planning walks the relation graph and
//! only reads; any refusal surfaces there, before a single row changes. The
//! finished plan is then staged into one storage transaction and committed
//! atomically, with lifecycle events around the commit.
//!
//! Dispatch goes through [`DeletionPolicy::behavior`]:
//!
//! - masking policies mask the target, and with `propagates` set they follow
//!   incoming cascade relations into soft-deletable dependents
//! - removing policies hand the target to the native on-delete enforcement
//! - `NoDelete` does nothing
//!
//! Rows masked by one operation share a batch id and a timestamp. Cascading
//! undelete restores only dependents carrying the target's batch id.

use std::collections::HashSet;

use safedel_core::catalog::{DeleteBehavior, RelationGraph, SchemaBundle};
use safedel_core::policy::{DeletionPolicy, PolicyRegistry};
use safedel_core::storage::key::current_timestamp;
use safedel_core::storage::{
    Record, ReferentialActions, RemovalGuard, RemovalPlan, StorageEngine,
};
use safedel_core::PolicyViolation;
use tracing::debug;

use crate::error::Error;
use crate::signals::{EventKind, LifecycleEvent, Signals};

/// Rows touched by a delete or undelete.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CascadeReport {
    /// Rows masked, target first.
    pub masked: Vec<(String, [u8; 16])>,
    /// Rows restored, target first.
    pub restored: Vec<(String, [u8; 16])>,
    /// Rows physically removed.
    pub removed: Vec<(String, [u8; 16])>,
    /// Foreign keys rewritten by removal.
    pub rewritten: usize,
    /// Many-to-many edge rows removed.
    pub detached_edges: usize,
}

impl CascadeReport {
    /// Total number of rows changed.
    pub fn affected_count(&self) -> usize {
        self.masked.len()
            + self.restored.len()
            + self.removed.len()
            + self.rewritten
            + self.detached_edges
    }

    /// Whether the operation changed nothing.
    pub fn is_empty(&self) -> bool {
        self.affected_count() == 0
    }
}

/// A planned mask or restore of one row.
#[derive(Debug)]
struct Step {
    kind: EventKind,
    entity: String,
    id: [u8; 16],
    policy: DeletionPolicy,
    batch: Option<u64>,
    record: Record,
}

/// Everything one delete or undelete will change.
#[derive(Debug, Default)]
pub(crate) struct CascadePlan {
    steps: Vec<Step>,
    removal: RemovalPlan,
    /// Policy of the root behind each entry of `removal.removed`.
    removal_policies: Vec<DeletionPolicy>,
    visited: HashSet<(String, [u8; 16])>,
}

impl CascadePlan {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn is_planned(&self, entity: &str, id: [u8; 16]) -> bool {
        self.visited.contains(&(entity.to_string(), id)) || self.removal.removes(&id)
    }

    /// "Before" events in traversal order.
    fn events(&self) -> Vec<LifecycleEvent> {
        let mut events: Vec<_> = self
            .steps
            .iter()
            .map(|step| LifecycleEvent {
                kind: step.kind,
                entity: step.entity.clone(),
                id: step.id,
                policy: step.policy,
                batch: step.batch,
            })
            .collect();
        events.extend(
            self.removal
                .removed
                .iter()
                .zip(&self.removal_policies)
                .map(|((entity, id), policy)| LifecycleEvent {
                    kind: EventKind::BeforeRemove,
                    entity: entity.clone(),
                    id: *id,
                    policy: *policy,
                    batch: None,
                }),
        );
        events
    }

    /// Stage, commit and notify.
    ///
    /// Nothing is written and no "after" event fires when the commit fails.
    pub(crate) fn execute(
        self,
        engine: &StorageEngine,
        signals: &Signals,
    ) -> Result<CascadeReport, Error> {
        let events = self.events();
        if events.is_empty() && self.removal.is_empty() {
            return Ok(CascadeReport::default());
        }

        for event in &events {
            signals.emit(event);
        }

        let mut tx = engine.transaction();
        for step in &self.steps {
            tx.update(step.id, step.record.clone());
        }
        self.removal.stage(&mut tx);
        tx.commit()?;

        for event in &events {
            signals.emit(&event.completed());
        }

        let report = self.into_report();
        debug!(
            masked = report.masked.len(),
            restored = report.restored.len(),
            removed = report.removed.len(),
            rewritten = report.rewritten,
            "cascade committed"
        );
        Ok(report)
    }

    fn into_report(self) -> CascadeReport {
        let mut report = CascadeReport {
            removed: self.removal.removed,
            rewritten: self.removal.rewritten.len(),
            detached_edges: self.removal.detached_edges.len(),
            ..Default::default()
        };
        for step in self.steps {
            let slot = match step.kind {
                EventKind::BeforeMask => &mut report.masked,
                _ => &mut report.restored,
            };
            slot.push((step.entity, step.id));
        }
        report
    }
}

/// Plans deletes and undeletes against one schema snapshot.
pub(crate) struct CascadeEngine<'a> {
    engine: &'a StorageEngine,
    graph: &'a RelationGraph,
    registry: &'a PolicyRegistry,
    referential: ReferentialActions<'a>,
    max_depth: usize,
    batch: u64,
    at: u64,
}

impl<'a> CascadeEngine<'a> {
    /// Create an engine for one operation, allocating its mask batch.
    pub(crate) fn new(
        engine: &'a StorageEngine,
        schema: &'a SchemaBundle,
        graph: &'a RelationGraph,
        registry: &'a PolicyRegistry,
        max_depth: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            engine,
            graph,
            registry,
            referential: ReferentialActions::new(engine, schema, graph).with_max_depth(max_depth),
            max_depth,
            batch: engine.next_batch_id()?,
            at: current_timestamp(),
        })
    }

    /// Plan the delete of one row.
    pub(crate) fn plan_delete(
        &self,
        plan: &mut CascadePlan,
        entity: &str,
        id: [u8; 16],
        forced: Option<DeletionPolicy>,
    ) -> Result<(), Error> {
        let Some(record) = self.engine.get(&id)? else {
            return Err(Error::not_found(entity, &id));
        };

        let mut policy = self.registry.policy_for(entity, forced);
        if policy.behavior().masks && !self.registry.is_soft_deletable(entity) {
            // Plain rows cannot carry a mask.
            policy = DeletionPolicy::HardDelete;
        }
        let behavior = policy.behavior();

        if behavior.removes {
            if plan.is_planned(entity, id) {
                return Ok(());
            }
            let guard = if behavior.guards_children {
                RemovalGuard::NoCascade
            } else {
                RemovalGuard::Native
            };
            self.referential
                .plan_into(&mut plan.removal, entity, id, guard)?;
            let removed = plan.removal.removed.len();
            plan.removal_policies.resize(removed, policy);
            return Ok(());
        }

        if behavior.masks {
            return self.mask(plan, entity, id, record, policy, 0);
        }

        debug!(entity, id = %hex::encode(id), %policy, "delete ignored");
        Ok(())
    }

    /// Plan the undelete of one row.
    pub(crate) fn plan_undelete(
        &self,
        plan: &mut CascadePlan,
        entity: &str,
        id: [u8; 16],
        forced: Option<DeletionPolicy>,
    ) -> Result<(), Error> {
        let Some(record) = self.engine.get(&id)? else {
            return Err(Error::not_found(entity, &id));
        };

        let policy = self.registry.policy_for(entity, forced);
        let behavior = policy.behavior();
        if !behavior.restores || !record.is_masked() {
            debug!(entity, id = %hex::encode(id), %policy, "undelete ignored");
            return Ok(());
        }
        self.restore(plan, entity, id, record, policy, 0)
    }

    fn mask(
        &self,
        plan: &mut CascadePlan,
        entity: &str,
        id: [u8; 16],
        record: Record,
        policy: DeletionPolicy,
        depth: usize,
    ) -> Result<(), Error> {
        if depth > self.max_depth {
            return Err(PolicyViolation::MaxDepthExceeded { depth }.into());
        }
        if record.is_masked() || plan.removal.removes(&id) {
            return Ok(());
        }
        if !plan.visited.insert((entity.to_string(), id)) {
            return Ok(());
        }

        let mut children = Vec::new();
        if policy.behavior().propagates {
            for relation in self.graph.incoming(entity) {
                match relation.on_delete {
                    DeleteBehavior::Restrict => {
                        let count = self
                            .referential
                            .find_referencing(relation, id, &record)?
                            .into_iter()
                            .filter(|(child, r)| {
                                !r.is_masked() && !plan.is_planned(&relation.from_entity, *child)
                            })
                            .count();
                        if count > 0 {
                            return Err(PolicyViolation::Restrict {
                                entity: entity.to_string(),
                                referencing_entity: relation.from_entity.clone(),
                                relation: relation.name.clone(),
                                count,
                            }
                            .into());
                        }
                    }
                    DeleteBehavior::Cascade
                        if self.registry.is_soft_deletable(&relation.from_entity) =>
                    {
                        for (child, child_record) in
                            self.referential.find_referencing(relation, id, &record)?
                        {
                            if !child_record.is_masked() {
                                children.push((relation.from_entity.clone(), child, child_record));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut masked = record;
        masked.mask(self.at, self.batch);
        plan.steps.push(Step {
            kind: EventKind::BeforeMask,
            entity: entity.to_string(),
            id,
            policy,
            batch: Some(self.batch),
            record: masked,
        });
        debug!(entity, id = %hex::encode(id), depth, batch = self.batch, "planned mask");

        for (child_entity, child, child_record) in children {
            self.mask(
                plan,
                &child_entity,
                child,
                child_record,
                DeletionPolicy::SoftDeleteCascade,
                depth + 1,
            )?;
        }
        Ok(())
    }

    fn restore(
        &self,
        plan: &mut CascadePlan,
        entity: &str,
        id: [u8; 16],
        record: Record,
        policy: DeletionPolicy,
        depth: usize,
    ) -> Result<(), Error> {
        if depth > self.max_depth {
            return Err(PolicyViolation::MaxDepthExceeded { depth }.into());
        }
        if !plan.visited.insert((entity.to_string(), id)) {
            return Ok(());
        }

        let batch = record.mask_batch;
        let mut children = Vec::new();
        if policy.behavior().propagates {
            if let Some(batch) = batch {
                for relation in self.graph.incoming(entity) {
                    if relation.on_delete != DeleteBehavior::Cascade {
                        continue;
                    }
                    for (child, child_record) in
                        self.referential.find_referencing(relation, id, &record)?
                    {
                        if child_record.mask_batch == Some(batch) {
                            children.push((relation.from_entity.clone(), child, child_record));
                        }
                    }
                }
            }
        }

        let mut restored = record;
        restored.restore();
        plan.steps.push(Step {
            kind: EventKind::BeforeRestore,
            entity: entity.to_string(),
            id,
            policy,
            batch,
            record: restored,
        });
        debug!(entity, id = %hex::encode(id), depth, batch = ?batch, "planned restore");

        for (child_entity, child, child_record) in children {
            self.restore(
                plan,
                &child_entity,
                child,
                child_record,
                DeletionPolicy::SoftDeleteCascade,
                depth + 1,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use safedel_core::catalog::{EntityDef, FieldDef, FieldType, RelationDef, ScalarType};
    use safedel_core::query::encode_entity;
    use safedel_core::StorageConfig;
    use safedel_proto::Value;

    struct Fixture {
        engine: StorageEngine,
        schema: SchemaBundle,
        graph: RelationGraph,
        registry: PolicyRegistry,
    }

    impl Fixture {
        fn new(schema: SchemaBundle) -> Self {
            let graph = RelationGraph::build(&schema);
            let registry = PolicyRegistry::from_schema(&schema);
            Self {
                engine: StorageEngine::open(StorageConfig::temporary()).unwrap(),
                schema,
                graph,
                registry,
            }
        }

        fn cascade(&self, max_depth: usize) -> CascadeEngine<'_> {
            CascadeEngine::new(
                &self.engine,
                &self.schema,
                &self.graph,
                &self.registry,
                max_depth,
            )
            .unwrap()
        }

        fn insert(&self, entity: &str, parent: Option<[u8; 16]>) -> [u8; 16] {
            let id = StorageEngine::generate_id();
            let mut fields = vec![("id".to_string(), Value::Uuid(id))];
            if let Some(parent) = parent {
                fields.push(("parent_id".to_string(), Value::Uuid(parent)));
            }
            let mut tx = self.engine.transaction();
            tx.insert(id, Record::new(entity, encode_entity(&fields).unwrap()));
            tx.commit().unwrap();
            id
        }

        fn masked(&self, id: &[u8; 16]) -> bool {
            self.engine.get(id).unwrap().unwrap().is_masked()
        }
    }

    fn node(name: &str, policy: DeletionPolicy) -> EntityDef {
        EntityDef::new(name, "id")
            .with_fields([
                FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)),
                FieldDef::optional("parent_id", ScalarType::Uuid),
            ])
            .with_policy(policy)
    }

    fn tree_schema(child_behavior: DeleteBehavior) -> SchemaBundle {
        SchemaBundle::new(1)
            .with_entity(node("Folder", DeletionPolicy::SoftDeleteCascade))
            .with_entity(node("File", DeletionPolicy::SoftDelete))
            .with_relation(
                RelationDef::one_to_many("parent", "File", "parent_id", "Folder", "id")
                    .with_on_delete(child_behavior),
            )
    }

    #[test]
    fn test_plan_is_read_only_until_execute() {
        let fx = Fixture::new(tree_schema(DeleteBehavior::Cascade));
        let folder = fx.insert("Folder", None);
        let file = fx.insert("File", Some(folder));

        let cascade = fx.cascade(10);
        let mut plan = CascadePlan::new();
        cascade.plan_delete(&mut plan, "Folder", folder, None).unwrap();
        assert!(!fx.masked(&folder));

        let report = plan.execute(&fx.engine, &Signals::new()).unwrap();
        assert_eq!(report.masked.len(), 2);
        assert!(fx.masked(&folder) && fx.masked(&file));

        let a = fx.engine.get(&folder).unwrap().unwrap();
        let b = fx.engine.get(&file).unwrap().unwrap();
        assert_eq!(a.mask_batch, b.mask_batch);
        assert_eq!(a.deleted_at, b.deleted_at);
    }

    #[test]
    fn test_restrict_fails_before_masking() {
        let fx = Fixture::new(tree_schema(DeleteBehavior::Restrict));
        let folder = fx.insert("Folder", None);
        fx.insert("File", Some(folder));

        let mut plan = CascadePlan::new();
        let result = fx.cascade(10).plan_delete(&mut plan, "Folder", folder, None);
        if let Err(Error::PolicyViolation(PolicyViolation::Restrict { count, .. })) = result {
            assert_eq!(count, 1);
        } else {
            panic!("Expected Restrict violation");
        }
        assert!(!fx.masked(&folder));
    }

    #[test]
    fn test_depth_limit() {
        let schema = SchemaBundle::new(1)
            .with_entity(node("Folder", DeletionPolicy::SoftDeleteCascade))
            .with_relation(
                RelationDef::one_to_many("parent", "Folder", "parent_id", "Folder", "id")
                    .with_on_delete(DeleteBehavior::Cascade),
            );
        let fx = Fixture::new(schema);
        let root = fx.insert("Folder", None);
        let mut last = root;
        for _ in 0..3 {
            last = fx.insert("Folder", Some(last));
        }

        let mut plan = CascadePlan::new();
        let result = fx.cascade(2).plan_delete(&mut plan, "Folder", root, None);
        assert!(matches!(
            result,
            Err(Error::PolicyViolation(PolicyViolation::MaxDepthExceeded { depth: 3 }))
        ));

        let mut plan = CascadePlan::new();
        fx.cascade(3).plan_delete(&mut plan, "Folder", root, None).unwrap();
        assert_eq!(plan.steps.len(), 4);
    }

    #[test]
    fn test_missing_row_is_not_found() {
        let fx = Fixture::new(tree_schema(DeleteBehavior::Cascade));
        let mut plan = CascadePlan::new();
        let result = fx.cascade(10).plan_undelete(&mut plan, "Folder", [1; 16], None);
        assert!(matches!(result, Err(Error::RecordNotFound { .. })));
    }

    #[test]
    fn test_removal_events_carry_their_root_policy() {
        let fx = Fixture::new(tree_schema(DeleteBehavior::Cascade));
        let first = fx.insert("Folder", None);
        let child = fx.insert("File", Some(first));
        let second = fx.insert("Folder", None);

        let cascade = fx.cascade(10);
        let mut plan = CascadePlan::new();
        cascade
            .plan_delete(&mut plan, "Folder", first, Some(DeletionPolicy::HardDelete))
            .unwrap();
        cascade
            .plan_delete(
                &mut plan,
                "Folder",
                second,
                Some(DeletionPolicy::HardDeleteNoCascade),
            )
            .unwrap();

        let policies: HashMap<[u8; 16], DeletionPolicy> = plan
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::BeforeRemove)
            .map(|e| (e.id, e.policy))
            .collect();
        assert_eq!(policies.len(), 3);
        assert_eq!(policies[&first], DeletionPolicy::HardDelete);
        assert_eq!(policies[&child], DeletionPolicy::HardDelete);
        assert_eq!(policies[&second], DeletionPolicy::HardDeleteNoCascade);
    }
}
