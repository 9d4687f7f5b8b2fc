//! Relation graph resolution.
//!
//! The graph indexes every relation of a schema by the entity that holds the
//! foreign key and by the entity it points at, and resolves accessor names in
//! both directions. Deletion cascades walk `incoming` edges; retrieval walks
//! accessors.

use super::{RelationDef, SchemaBundle};
use std::collections::HashMap;

/// How an accessor reaches its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelationPath<'a> {
    /// From the foreign key holder to the referenced row.
    Forward(&'a RelationDef),
    /// From the referenced row to every row holding a foreign key to it.
    Reverse(&'a RelationDef),
    /// Through the edge entity of a many-to-many relation.
    ///
    /// `reversed` is set when walking from `to_entity` back to `from_entity`.
    Through {
        relation: &'a RelationDef,
        reversed: bool,
    },
}

impl<'a> RelationPath<'a> {
    /// The relation behind this path.
    pub fn relation(&self) -> &'a RelationDef {
        match self {
            RelationPath::Forward(r) | RelationPath::Reverse(r) => r,
            RelationPath::Through { relation, .. } => relation,
        }
    }

    /// The entity the path lands on.
    pub fn target_entity(&self) -> &'a str {
        match self {
            RelationPath::Forward(r) => &r.to_entity,
            RelationPath::Reverse(r) => &r.from_entity,
            RelationPath::Through { relation, reversed } => {
                if *reversed {
                    &relation.from_entity
                } else {
                    &relation.to_entity
                }
            }
        }
    }

    /// Whether the path can yield more than one row per source row.
    pub fn is_many(&self) -> bool {
        match self {
            RelationPath::Forward(_) => false,
            RelationPath::Reverse(r) => r.cardinality != super::Cardinality::OneToOne,
            RelationPath::Through { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Reverse,
}

/// Relation index for a schema snapshot.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    relations: Vec<RelationDef>,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    many_to_many: HashMap<String, Vec<usize>>,
    accessors: HashMap<(String, String), (usize, Direction)>,
}

impl RelationGraph {
    /// Index every relation of a schema.
    pub fn build(schema: &SchemaBundle) -> Self {
        let mut relations: Vec<RelationDef> = schema.relations.values().cloned().collect();
        relations.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = Self::default();
        for (idx, rel) in relations.iter().enumerate() {
            if rel.is_many_to_many() {
                for entity in [&rel.from_entity, &rel.to_entity] {
                    let slot = graph.many_to_many.entry(entity.clone()).or_default();
                    if !slot.contains(&idx) {
                        slot.push(idx);
                    }
                }
            } else {
                graph
                    .incoming
                    .entry(rel.to_entity.clone())
                    .or_default()
                    .push(idx);
                graph
                    .outgoing
                    .entry(rel.from_entity.clone())
                    .or_default()
                    .push(idx);
            }

            graph.accessors.insert(
                (rel.from_entity.clone(), rel.forward_accessor().to_string()),
                (idx, Direction::Forward),
            );
            graph.accessors.insert(
                (rel.to_entity.clone(), rel.reverse_accessor()),
                (idx, Direction::Reverse),
            );
        }
        graph.relations = relations;
        graph
    }

    fn pick(&self, idx: &[usize]) -> Vec<&RelationDef> {
        idx.iter().map(|i| &self.relations[*i]).collect()
    }

    /// Relations whose foreign key points at `entity` (its dependents).
    pub fn incoming(&self, entity: &str) -> Vec<&RelationDef> {
        self.incoming
            .get(entity)
            .map(|idx| self.pick(idx))
            .unwrap_or_default()
    }

    /// Relations whose foreign key lives on `entity`.
    pub fn outgoing(&self, entity: &str) -> Vec<&RelationDef> {
        self.outgoing
            .get(entity)
            .map(|idx| self.pick(idx))
            .unwrap_or_default()
    }

    /// Many-to-many relations with `entity` on either side.
    pub fn many_to_many_for(&self, entity: &str) -> Vec<&RelationDef> {
        self.many_to_many
            .get(entity)
            .map(|idx| self.pick(idx))
            .unwrap_or_default()
    }

    /// Resolve an accessor name on `entity`.
    pub fn resolve(&self, entity: &str, accessor: &str) -> Option<RelationPath<'_>> {
        let (idx, direction) = self
            .accessors
            .get(&(entity.to_string(), accessor.to_string()))?;
        let rel = &self.relations[*idx];
        Some(match (rel.is_many_to_many(), direction) {
            (true, Direction::Forward) => RelationPath::Through {
                relation: rel,
                reversed: false,
            },
            (true, Direction::Reverse) => RelationPath::Through {
                relation: rel,
                reversed: true,
            },
            (false, Direction::Forward) => RelationPath::Forward(rel),
            (false, Direction::Reverse) => RelationPath::Reverse(rel),
        })
    }

    /// Every accessor defined on `entity`, sorted by name.
    pub fn accessors(&self, entity: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .accessors
            .keys()
            .filter(|(e, _)| e == entity)
            .map(|(_, a)| a.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Number of indexed relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Check whether the schema has no relations.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
