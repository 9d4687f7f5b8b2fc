//! Native on-delete enforcement for physical removal.
//!
//! When a row is removed, every row referencing it through a relation follows
//! the relation's [`DeleteBehavior`]: cascade removes it too, restrict refuses,
//! and the rewriting behaviors replace its foreign key. Edge rows of
//! many-to-many relations are always removed. Planning only reads; the plan is
//! staged into a [`Transaction`] afterwards.

use std::collections::{HashMap, HashSet};

use safedel_proto::Value;
use tracing::debug;

use super::{Record, StorageEngine, Transaction};
use crate::catalog::{DeleteBehavior, RelationDef, RelationGraph, SchemaBundle};
use crate::error::{Error, PolicyViolation};
use crate::query::{decode_entity, encode_entity, get_field, FilterEvaluator};

/// Default traversal depth limit.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// How strictly a removal treats dependent rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalGuard {
    /// Follow every relation's behavior.
    Native,
    /// Refuse if any row depends on the target through a cascade relation.
    NoCascade,
}

/// Everything a removal touches, in discovery order.
#[derive(Debug, Default)]
pub struct RemovalPlan {
    /// Rows removed, targets and cascaded dependents alike.
    pub removed: Vec<(String, [u8; 16])>,
    /// Foreign keys rewritten: entity, row, field and new value.
    pub rewritten: Vec<(String, [u8; 16], String, Value)>,
    /// Many-to-many edge rows removed.
    pub detached_edges: Vec<(String, [u8; 16])>,
    visited: HashSet<[u8; 16]>,
    pending: HashMap<[u8; 16], (String, Record)>,
}

impl RemovalPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a row is removed by this plan.
    pub fn removes(&self, id: &[u8; 16]) -> bool {
        self.visited.contains(id)
    }

    /// Whether the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.rewritten.is_empty() && self.detached_edges.is_empty()
    }

    /// Stage every removal and rewrite into a transaction.
    ///
    /// Rewrites of rows that are removed later in the plan are dropped.
    pub fn stage(&self, tx: &mut Transaction<'_>) {
        for (entity, id) in self.removed.iter().chain(&self.detached_edges) {
            tx.remove(entity.clone(), *id);
        }
        for (id, (_, record)) in &self.pending {
            if !self.visited.contains(id) {
                tx.update(*id, record.clone());
            }
        }
    }
}

/// Plans physical removals under the relation behaviors of a schema.
pub struct ReferentialActions<'a> {
    engine: &'a StorageEngine,
    schema: &'a SchemaBundle,
    graph: &'a RelationGraph,
    max_depth: usize,
}

impl<'a> ReferentialActions<'a> {
    /// Create a planner.
    pub fn new(engine: &'a StorageEngine, schema: &'a SchemaBundle, graph: &'a RelationGraph) -> Self {
        Self {
            engine,
            schema,
            graph,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Set the traversal depth limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Add the removal of one row to an existing plan.
    ///
    /// Rows already in the plan are skipped, so bulk removals share one plan.
    pub fn plan_into(
        &self,
        plan: &mut RemovalPlan,
        entity: &str,
        id: [u8; 16],
        guard: RemovalGuard,
    ) -> Result<(), Error> {
        if guard == RemovalGuard::NoCascade {
            self.check_no_cascade(entity, id)?;
        }
        self.visit(plan, entity, id, 0)
    }

    /// Rows of `relation.from_entity` whose foreign key points at the given parent.
    ///
    /// Masked rows are included: they still reference the parent.
    pub fn find_referencing(
        &self,
        relation: &RelationDef,
        parent_id: [u8; 16],
        parent: &Record,
    ) -> Result<Vec<([u8; 16], Record)>, Error> {
        let key = get_field(&parent.data, &relation.to_field)?.unwrap_or(Value::Uuid(parent_id));
        if key.is_null() {
            return Ok(Vec::new());
        }

        let mut referencing = Vec::new();
        for result in self.engine.scan_entity_type(&relation.from_entity) {
            let (id, record) = result?;
            if let Some(value) = get_field(&record.data, &relation.from_field)? {
                if FilterEvaluator::values_equal(&value, &key) {
                    referencing.push((id, record));
                }
            }
        }
        Ok(referencing)
    }

    fn check_no_cascade(&self, entity: &str, id: [u8; 16]) -> Result<(), Error> {
        let Some(record) = self.engine.get(&id)? else {
            return Ok(());
        };
        for relation in self.graph.incoming(entity) {
            if relation.on_delete != DeleteBehavior::Cascade {
                continue;
            }
            let count = self.find_referencing(relation, id, &record)?.len();
            if count > 0 {
                return Err(PolicyViolation::CascadeBlocked {
                    entity: entity.to_string(),
                    referencing_entity: relation.from_entity.clone(),
                    relation: relation.name.clone(),
                    count,
                }
                .into());
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        plan: &mut RemovalPlan,
        entity: &str,
        id: [u8; 16],
        depth: usize,
    ) -> Result<(), Error> {
        if depth > self.max_depth {
            return Err(PolicyViolation::MaxDepthExceeded { depth }.into());
        }
        if !plan.visited.insert(id) {
            return Ok(());
        }
        let Some(record) = self.engine.get(&id)? else {
            return Ok(());
        };
        plan.removed.push((entity.to_string(), id));

        for relation in self.graph.incoming(entity) {
            let dependents: Vec<_> = self
                .find_referencing(relation, id, &record)?
                .into_iter()
                .filter(|(child, _)| !plan.visited.contains(child))
                .collect();
            if dependents.is_empty() {
                continue;
            }

            match &relation.on_delete {
                DeleteBehavior::Restrict => {
                    return Err(PolicyViolation::Restrict {
                        entity: entity.to_string(),
                        referencing_entity: relation.from_entity.clone(),
                        relation: relation.name.clone(),
                        count: dependents.len(),
                    }
                    .into());
                }
                DeleteBehavior::Cascade => {
                    for (child, _) in dependents {
                        self.visit(plan, &relation.from_entity, child, depth + 1)?;
                    }
                }
                behavior => {
                    let value = match behavior {
                        DeleteBehavior::SetValue(v) => v.clone(),
                        DeleteBehavior::SetDefault => self
                            .schema
                            .get_entity(&relation.from_entity)
                            .and_then(|e| e.get_field(&relation.from_field))
                            .map_or(Value::Null, |f| f.default_value()),
                        _ => Value::Null,
                    };
                    for (child, child_record) in dependents {
                        self.rewrite(plan, relation, child, child_record, value.clone())?;
                    }
                }
            }
        }

        for relation in self.graph.many_to_many_for(entity) {
            self.detach_edges(plan, relation, entity, id, &record)?;
        }

        debug!(entity, id = %hex::encode(id), depth, "planned removal");
        Ok(())
    }

    fn rewrite(
        &self,
        plan: &mut RemovalPlan,
        relation: &RelationDef,
        id: [u8; 16],
        record: Record,
        value: Value,
    ) -> Result<(), Error> {
        let (_, pending) = plan
            .pending
            .entry(id)
            .or_insert_with(|| (relation.from_entity.clone(), record));
        let mut fields = decode_entity(&pending.data)?;
        match fields.iter_mut().find(|(n, _)| *n == relation.from_field) {
            Some(slot) => slot.1 = value.clone(),
            None => fields.push((relation.from_field.clone(), value.clone())),
        }
        pending.data = encode_entity(&fields)?;
        plan.rewritten.push((
            relation.from_entity.clone(),
            id,
            relation.from_field.clone(),
            value,
        ));
        Ok(())
    }

    fn detach_edges(
        &self,
        plan: &mut RemovalPlan,
        relation: &RelationDef,
        entity: &str,
        id: [u8; 16],
        record: &Record,
    ) -> Result<(), Error> {
        let Some(edge) = relation.edge_entity.as_deref() else {
            return Ok(());
        };
        let identity = self
            .schema
            .get_entity(entity)
            .map_or("id", |e| e.identity_field.as_str());
        let key = get_field(&record.data, identity)?.unwrap_or(Value::Uuid(id));

        let mut columns = Vec::with_capacity(2);
        if relation.from_entity == entity {
            columns.push(relation.from_field.as_str());
        }
        if relation.to_entity == entity {
            columns.push(relation.to_field.as_str());
        }

        for result in self.engine.scan_entity_type(edge) {
            let (edge_id, edge_record) = result?;
            if plan.visited.contains(&edge_id) {
                continue;
            }
            for column in &columns {
                let hit = get_field(&edge_record.data, column)?
                    .is_some_and(|v| FilterEvaluator::values_equal(&v, &key));
                if hit {
                    plan.visited.insert(edge_id);
                    plan.detached_edges.push((edge.to_string(), edge_id));
                    break;
                }
            }
        }
        Ok(())
    }
}
