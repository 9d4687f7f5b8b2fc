//! Query executor.
//!
//! The executor scans an entity type, keeps the rows admitted by the query's
//! mask predicate and filters, orders and slices them, then loads any
//! requested relations. It never consults visibility strategies for the root
//! rows: callers pass queries that already went through
//! [`super::VisibilityFilter`], or deliberately did not.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use safedel_proto::{AggregateFunction, Aggregation, FilterExpr, OrderDirection, OrderSpec, Value};
use tracing::trace;

use crate::catalog::{RelationGraph, RelationPath, SchemaBundle};
use crate::error::Error;
use crate::policy::PolicyRegistry;
use crate::storage::StorageEngine;

use super::filter::FilterEvaluator;
use super::value_codec::encode_value;
use super::{EntityRow, Query, VisibilityFilter};

/// Identity field assumed for entity types the schema does not describe.
const FALLBACK_IDENTITY: &str = "id";

/// How rows loaded through an accessor are filtered by mask state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinVisibility {
    /// Every row, masked or not.
    Unfiltered,
    /// The target type's default visibility. Applies to reverse and
    /// many-to-many collections only.
    Default,
}

/// Links between source rows and target key values for one accessor.
struct JoinKeys {
    /// Field on the target rows holding the key.
    target_field: String,
    /// Target key values reachable from each source row.
    per_source: Vec<Vec<Value>>,
}

/// Runs queries against storage.
pub struct QueryExecutor<'a> {
    storage: &'a StorageEngine,
    schema: &'a SchemaBundle,
    graph: &'a RelationGraph,
    registry: &'a PolicyRegistry,
}

impl<'a> QueryExecutor<'a> {
    /// Create an executor over a schema snapshot.
    pub fn new(
        storage: &'a StorageEngine,
        schema: &'a SchemaBundle,
        graph: &'a RelationGraph,
        registry: &'a PolicyRegistry,
    ) -> Self {
        Self {
            storage,
            schema,
            graph,
            registry,
        }
    }

    /// Execute a query and return its rows.
    pub fn execute(&self, query: &Query) -> Result<Vec<EntityRow>, Error> {
        let mut rows = self.fetch_rows(query)?;
        self.sort_rows(&query.entity, &mut rows, &query.order_by);
        if let Some(pagination) = &query.pagination {
            rows = pagination.apply(rows);
        }

        for accessor in &query.select_related {
            self.load_related(&query.entity, &mut rows, accessor, JoinVisibility::Unfiltered)?;
        }
        for accessor in &query.prefetch {
            self.load_related(&query.entity, &mut rows, accessor, JoinVisibility::Default)?;
        }

        trace!(entity = %query.entity, rows = rows.len(), mask = ?query.mask, "query executed");
        Ok(rows)
    }

    /// Count the rows a query returns.
    pub fn count(&self, query: &Query) -> Result<usize, Error> {
        let total = self.fetch_rows(query)?.len();
        Ok(match &query.pagination {
            Some(p) => {
                let remaining = total.saturating_sub(p.offset as usize);
                p.limit.map_or(remaining, |l| remaining.min(l as usize))
            }
            None => total,
        })
    }

    /// Compute an aggregate over the rows a query returns.
    ///
    /// Empty inputs yield `Null` for everything except counts.
    pub fn aggregate(&self, query: &Query, aggregation: &Aggregation) -> Result<Value, Error> {
        let mut plain = query.clone();
        plain.select_related.clear();
        plain.prefetch.clear();
        let rows = self.execute(&plain)?;

        let field = match (&aggregation.function, &aggregation.field) {
            (AggregateFunction::Count, None) => return Ok(Value::Int64(rows.len() as i64)),
            (_, Some(field)) => field.as_str(),
            (function, None) => {
                return Err(Error::InvalidData(format!("{:?} requires a field", function)))
            }
        };
        let values = rows
            .iter()
            .filter_map(|row| row.get(field))
            .filter(|v| !v.is_null());

        Ok(match aggregation.function {
            AggregateFunction::Count => Value::Int64(values.count() as i64),
            AggregateFunction::Sum | AggregateFunction::Avg => {
                let numbers = values
                    .map(|v| {
                        v.as_f64().ok_or_else(|| {
                            Error::InvalidData(format!(
                                "cannot aggregate {} value in {}",
                                v.type_name(),
                                field
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if numbers.is_empty() {
                    Value::Null
                } else if aggregation.function == AggregateFunction::Sum {
                    Value::Float64(numbers.iter().sum())
                } else {
                    Value::Float64(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            AggregateFunction::Min => values
                .min_by(|a, b| FilterEvaluator::sort_order(Some(*a), Some(*b)))
                .cloned()
                .unwrap_or(Value::Null),
            AggregateFunction::Max => values
                .max_by(|a, b| FilterEvaluator::sort_order(Some(*a), Some(*b)))
                .cloned()
                .unwrap_or(Value::Null),
        })
    }

    /// Load one row by identity, masked or not.
    pub fn load(&self, id: &[u8; 16]) -> Result<Option<EntityRow>, Error> {
        match self.storage.get(id)? {
            Some(record) => Ok(Some(EntityRow::from_record(*id, &record)?)),
            None => Ok(None),
        }
    }

    /// Unfiltered query over the rows reachable from `row` through `accessor`.
    pub fn related_query(&self, row: &EntityRow, accessor: &str) -> Result<Query, Error> {
        let path = self.resolve(&row.entity, accessor)?;
        let keys = self.join_keys(&path, std::slice::from_ref(row))?;
        let values = keys.per_source.into_iter().flatten().collect();
        Ok(Query::new(path.target_entity())
            .with_filter(FilterExpr::in_values(keys.target_field, values)))
    }

    /// Identity field of an entity type.
    pub fn identity_field(&self, entity: &str) -> &str {
        self.schema
            .get_entity(entity)
            .map_or(FALLBACK_IDENTITY, |e| e.identity_field.as_str())
    }

    fn resolve(&self, entity: &str, accessor: &str) -> Result<RelationPath<'a>, Error> {
        self.graph
            .resolve(entity, accessor)
            .ok_or_else(|| Error::UnknownRelation {
                entity: entity.to_string(),
                accessor: accessor.to_string(),
            })
    }

    fn fetch_rows(&self, query: &Query) -> Result<Vec<EntityRow>, Error> {
        let mut rows = Vec::new();
        for result in self.storage.scan_entity_type(&query.entity) {
            let (id, record) = result?;
            if !query.mask.admits(record.is_masked()) {
                continue;
            }
            let row = EntityRow::from_record(id, &record)?;
            if FilterEvaluator::evaluate_all(&query.filters, &row.fields) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Stable sort by explicit order, else the entity's default order.
    ///
    /// Rows arrive in identity order, so identity breaks ties.
    fn sort_rows(&self, entity: &str, rows: &mut [EntityRow], order_by: &[OrderSpec]) {
        let order_by = if order_by.is_empty() {
            match self
                .schema
                .get_entity(entity)
                .and_then(|e| e.lifecycle.default_order.as_deref())
            {
                Some(order) => order,
                None => return,
            }
        } else {
            order_by
        };

        rows.sort_by(|a, b| {
            for spec in order_by {
                let cmp = FilterEvaluator::sort_order(a.get(&spec.field), b.get(&spec.field));
                let cmp = match spec.direction {
                    OrderDirection::Asc => cmp,
                    OrderDirection::Desc => cmp.reverse(),
                };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });
    }

    fn load_related(
        &self,
        entity: &str,
        rows: &mut [EntityRow],
        accessor: &str,
        visibility: JoinVisibility,
    ) -> Result<(), Error> {
        let path = self.resolve(entity, accessor)?;
        let keys = self.join_keys(&path, rows)?;
        let target = path.target_entity();
        // A row always reaches its own parent.
        let visibility = match &path {
            RelationPath::Forward(_) => JoinVisibility::Unfiltered,
            _ => visibility,
        };

        let wanted: Vec<Value> = keys.per_source.iter().flatten().cloned().collect();
        let mut query = Query::new(target).with_filter(FilterExpr::in_values(
            keys.target_field.clone(),
            wanted,
        ));
        if visibility == JoinVisibility::Default {
            query = VisibilityFilter::apply(query, &self.registry.visibility_for(target), None);
        }
        let targets = self.execute(&query)?;

        let mut by_key: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
        for (idx, target_row) in targets.iter().enumerate() {
            if let Some(value) = target_row.get(&keys.target_field) {
                by_key.entry(key_bytes(value)?).or_default().push(idx);
            }
        }

        for (row, wanted) in rows.iter_mut().zip(&keys.per_source) {
            let mut hits = Vec::new();
            for value in wanted {
                if let Some(idx) = by_key.get(&key_bytes(value)?) {
                    hits.extend_from_slice(idx);
                }
            }
            hits.sort_unstable();
            hits.dedup();
            row.related.insert(
                accessor.to_string(),
                hits.into_iter().map(|i| targets[i].clone()).collect(),
            );
        }
        Ok(())
    }

    /// Key values each source row reaches through a path.
    fn join_keys(&self, path: &RelationPath<'_>, sources: &[EntityRow]) -> Result<JoinKeys, Error> {
        let present = |row: &EntityRow, field: &str| -> Vec<Value> {
            row.get(field)
                .filter(|v| !v.is_null())
                .cloned()
                .into_iter()
                .collect()
        };

        match path {
            RelationPath::Forward(rel) => Ok(JoinKeys {
                target_field: rel.to_field.clone(),
                per_source: sources.iter().map(|r| present(r, &rel.from_field)).collect(),
            }),
            RelationPath::Reverse(rel) => Ok(JoinKeys {
                target_field: rel.from_field.clone(),
                per_source: sources.iter().map(|r| present(r, &rel.to_field)).collect(),
            }),
            RelationPath::Through { relation, reversed } => {
                let edge = relation.edge_entity.as_deref().ok_or_else(|| {
                    Error::InvalidSchema(format!("relation {} has no edge entity", relation.name))
                })?;
                let (near, far) = if *reversed {
                    (&relation.to_field, &relation.from_field)
                } else {
                    (&relation.from_field, &relation.to_field)
                };
                let source_entity = if *reversed {
                    &relation.to_entity
                } else {
                    &relation.from_entity
                };
                let source_identity = self.identity_field(source_entity).to_string();
                let target_identity = self.identity_field(path.target_entity()).to_string();

                let source_keys: HashSet<Vec<u8>> = sources
                    .iter()
                    .filter_map(|r| r.get(&source_identity))
                    .map(key_bytes)
                    .collect::<Result<_, _>>()?;
                let mut reached: HashMap<Vec<u8>, Vec<Value>> = HashMap::new();
                for edge_row in self.execute(&Query::new(edge))? {
                    let (Some(from), Some(to)) = (edge_row.get(near), edge_row.get(far)) else {
                        continue;
                    };
                    let from_key = key_bytes(from)?;
                    if source_keys.contains(&from_key) && !to.is_null() {
                        reached.entry(from_key).or_default().push(to.clone());
                    }
                }

                let per_source: Vec<Vec<Value>> = sources
                    .iter()
                    .map(|r| match r.get(&source_identity) {
                        Some(v) => Ok(reached.get(&key_bytes(v)?).cloned().unwrap_or_default()),
                        None => Ok(Vec::new()),
                    })
                    .collect::<Result<_, Error>>()?;
                Ok(JoinKeys {
                    target_field: target_identity,
                    per_source,
                })
            }
        }
    }
}

/// Hashable encoding of a join key.
fn key_bytes(value: &Value) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    encode_value(&mut buf, value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MaskPredicate;
    use crate::catalog::{EntityDef, FieldDef, FieldType, RelationDef, ScalarType};
    use crate::policy::{DeletionPolicy, Visibility};
    use crate::query::encode_entity;
    use crate::storage::{Record, StorageConfig};
    use safedel_proto::Pagination;

    struct Fixture {
        engine: StorageEngine,
        schema: SchemaBundle,
        graph: RelationGraph,
        registry: PolicyRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let uuid = |n: &str| FieldDef::new(n, FieldType::scalar(ScalarType::Uuid));
            let text = |n: &str| FieldDef::new(n, FieldType::scalar(ScalarType::String));
            let schema = SchemaBundle::new(1)
                .with_entity(
                    EntityDef::new("Author", "id")
                        .with_fields([uuid("id"), text("name")])
                        .with_policy(DeletionPolicy::SoftDeleteCascade),
                )
                .with_entity(
                    EntityDef::new("Book", "id")
                        .with_fields([uuid("id"), text("title"), uuid("author_id")])
                        .with_policy(DeletionPolicy::SoftDelete)
                        .with_visibility(Visibility::VisibleByPk),
                )
                .with_entity(
                    EntityDef::new("Tag", "id").with_fields([uuid("id"), text("label")]),
                )
                .with_entity(
                    EntityDef::new("BookTag", "id")
                        .with_fields([uuid("id"), uuid("book_id"), uuid("tag_id")]),
                )
                .with_relation(
                    RelationDef::one_to_many("author", "Book", "author_id", "Author", "id")
                        .with_related_name("books"),
                )
                .with_relation(
                    RelationDef::many_to_many("tags", "Book", "book_id", "Tag", "tag_id", "BookTag")
                        .with_related_name("books"),
                );
            let engine = StorageEngine::open(StorageConfig::temporary()).unwrap();
            let graph = RelationGraph::build(&schema);
            let registry = PolicyRegistry::from_schema(&schema);
            Self {
                engine,
                schema,
                graph,
                registry,
            }
        }

        fn executor(&self) -> QueryExecutor<'_> {
            QueryExecutor::new(&self.engine, &self.schema, &self.graph, &self.registry)
        }

        fn put(&self, entity: &str, fields: Vec<(&str, Value)>, masked: bool) -> [u8; 16] {
            let id = StorageEngine::generate_id();
            let mut all = vec![("id".to_string(), Value::Uuid(id))];
            all.extend(fields.into_iter().map(|(k, v)| (k.to_string(), v)));
            let mut record = Record::new(entity, encode_entity(&all).unwrap());
            if masked {
                record.mask(1, 1);
            }
            let mut tx = self.engine.transaction();
            tx.insert(id, record);
            tx.commit().unwrap();
            id
        }
    }

    #[test]
    fn test_mask_predicates() {
        let fx = Fixture::new();
        fx.put("Author", vec![("name", "a".into())], false);
        fx.put("Author", vec![("name", "b".into())], true);
        let exec = fx.executor();

        let all = Query::new("Author");
        assert_eq!(exec.count(&all).unwrap(), 2);
        let live = Query::new("Author").with_mask(MaskPredicate::LiveOnly);
        assert_eq!(exec.count(&live).unwrap(), 1);
        let masked = Query::new("Author").with_mask(MaskPredicate::MaskedOnly);
        let rows = exec.execute(&masked).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::String("b".into())));
    }

    #[test]
    fn test_order_and_pagination() {
        let fx = Fixture::new();
        for name in ["c", "a", "b"] {
            fx.put("Author", vec![("name", name.into())], false);
        }
        let exec = fx.executor();

        let q = Query::new("Author")
            .with_order(OrderSpec::desc("name"))
            .with_pagination(Pagination::new(1, 5));
        let names: Vec<_> = exec
            .execute(&q)
            .unwrap()
            .iter()
            .map(|r| r.get("name").cloned().unwrap())
            .collect();
        assert_eq!(names, vec![Value::from("b"), Value::from("a")]);
        assert_eq!(exec.count(&q).unwrap(), 2);

        // Identity order when no ordering is given.
        let first = exec.execute(&Query::new("Author")).unwrap();
        assert_eq!(first[0].get("name"), Some(&Value::from("c")));
    }

    #[test]
    fn test_aggregate() {
        let fx = Fixture::new();
        let author = fx.put("Author", vec![("name", "a".into())], false);
        for (title, masked) in [("x", false), ("y", false), ("z", true)] {
            fx.put(
                "Book",
                vec![("title", title.into()), ("author_id", Value::Uuid(author))],
                masked,
            );
        }
        let exec = fx.executor();
        let q = Query::new("Book").with_mask(MaskPredicate::LiveOnly);

        assert_eq!(exec.aggregate(&q, &Aggregation::count()).unwrap(), Value::Int64(2));
        assert_eq!(
            exec.aggregate(&q, &Aggregation::max("title")).unwrap(),
            Value::from("y")
        );
        assert!(exec.aggregate(&q, &Aggregation::sum("title")).is_err());
        assert_eq!(
            exec.aggregate(&Query::new("Tag"), &Aggregation::avg("weight")).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_eager_loading_sees_masked_parent() {
        let fx = Fixture::new();
        let author = fx.put("Author", vec![("name", "gone".into())], true);
        fx.put(
            "Book",
            vec![("title", "t".into()), ("author_id", Value::Uuid(author))],
            false,
        );
        let exec = fx.executor();

        let rows = exec
            .execute(&Query::new("Book").with_select_related("author"))
            .unwrap();
        assert_eq!(rows[0].related("author").len(), 1);
        assert!(rows[0].related("author")[0].is_masked());

        let prefetched = exec.execute(&Query::new("Book").with_prefetch("author")).unwrap();
        assert_eq!(prefetched[0].related("author"), rows[0].related("author"));
    }

    #[test]
    fn test_prefetch_applies_child_visibility() {
        let fx = Fixture::new();
        let author = fx.put("Author", vec![("name", "a".into())], false);
        fx.put("Book", vec![("title", "live".into()), ("author_id", Value::Uuid(author))], false);
        fx.put("Book", vec![("title", "gone".into()), ("author_id", Value::Uuid(author))], true);
        let exec = fx.executor();

        let rows = exec.execute(&Query::new("Author").with_prefetch("books")).unwrap();
        let books = rows[0].related("books");
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].get("title"), Some(&Value::from("live")));

        let direct = exec.related_query(&rows[0], "books").unwrap();
        let direct = VisibilityFilter::apply(direct, &fx.registry.visibility_for("Book"), None);
        assert_eq!(exec.execute(&direct).unwrap(), books.to_vec());
    }

    #[test]
    fn test_many_to_many_through_edges() {
        let fx = Fixture::new();
        let book = fx.put("Book", vec![("title", "t".into())], false);
        let rust = fx.put("Tag", vec![("label", "rust".into())], false);
        let db = fx.put("Tag", vec![("label", "db".into())], false);
        fx.put("Tag", vec![("label", "other".into())], false);
        for tag in [rust, db] {
            fx.put(
                "BookTag",
                vec![("book_id", Value::Uuid(book)), ("tag_id", Value::Uuid(tag))],
                false,
            );
        }
        let exec = fx.executor();

        let books = exec.execute(&Query::new("Book").with_prefetch("tags")).unwrap();
        assert_eq!(books[0].related("tags").len(), 2);

        let tag = exec.load(&rust).unwrap().unwrap();
        let back = exec.execute(&exec.related_query(&tag, "books").unwrap()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, book);
    }

    #[test]
    fn test_unknown_accessor() {
        let fx = Fixture::new();
        let exec = fx.executor();
        let result = exec.execute(&Query::new("Author").with_prefetch("nope"));
        if let Err(Error::UnknownRelation { entity, accessor }) = result {
            assert_eq!(entity, "Author");
            assert_eq!(accessor, "nope");
        } else {
            panic!("Expected UnknownRelation error");
        }
    }
}
