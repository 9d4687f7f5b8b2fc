//! Lazy, composable retrieval over one entity type.

use safedel_core::policy::DeletionPolicy;
use safedel_core::query::{EntityRow, Query, VisibilityFilter, VisibilityOverride};
use safedel_proto::{Aggregation, FilterExpr, OrderSpec, Pagination, Value};

use crate::cascade::CascadeReport;
use crate::database::Database;
use crate::error::Error;

/// A query over one entity type, run only by its terminal methods.
///
/// The visibility override is part of the set: `None` applies the entity's
/// visibility strategy, `ShowAll` and `MaskedOnly` replace it. Domain helpers
/// belong in extension traits implemented for `QuerySet`.
#[derive(Debug, Clone)]
pub struct QuerySet<'db> {
    db: &'db Database,
    query: Query,
    visibility: Option<VisibilityOverride>,
}

impl<'db> QuerySet<'db> {
    pub(crate) fn new(db: &'db Database, entity: impl Into<String>) -> Self {
        Self::from_query(db, Query::new(entity))
    }

    pub(crate) fn from_query(db: &'db Database, query: Query) -> Self {
        Self {
            db,
            query,
            visibility: None,
        }
    }

    /// Entity type queried.
    pub fn entity(&self) -> &str {
        &self.query.entity
    }

    /// Active visibility override.
    pub fn visibility(&self) -> Option<VisibilityOverride> {
        self.visibility
    }

    /// The database this set reads from.
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Add a filter. Filters combine with AND.
    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.query = self.query.with_filter(filter);
        self
    }

    /// Add an ordering key.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.query = self.query.with_order(order);
        self
    }

    /// Skip `offset` rows and keep at most `limit`.
    pub fn slice(mut self, offset: u32, limit: Option<u32>) -> Self {
        let pagination = match limit {
            Some(limit) => Pagination::new(offset, limit),
            None => Pagination::offset(offset),
        };
        self.query = self.query.with_pagination(pagination);
        self
    }

    /// Replace the visibility override.
    pub fn with_visibility(mut self, visibility: VisibilityOverride) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Load the rows behind a forward accessor, masked or not.
    pub fn select_related(mut self, accessor: impl Into<String>) -> Self {
        self.query = self.query.with_select_related(accessor);
        self
    }

    /// Load the rows behind an accessor.
    ///
    /// Reverse and many-to-many collections follow the target's visibility
    /// and equal [`Database::related`]. A forward accessor loads its parent
    /// masked or not, as [`Self::select_related`] does.
    pub fn prefetch(mut self, accessor: impl Into<String>) -> Self {
        self.query = self.query.with_prefetch(accessor);
        self
    }

    /// The query as it will run, visibility applied.
    pub fn query(&self) -> Query {
        let rule = self.db.snapshot().registry.visibility_for(&self.query.entity);
        VisibilityFilter::apply(self.query.clone(), &rule, self.visibility)
    }

    /// Every matching row.
    pub fn all(&self) -> Result<Vec<EntityRow>, Error> {
        let state = self.db.snapshot();
        let query = VisibilityFilter::apply(
            self.query.clone(),
            &state.registry.visibility_for(&self.query.entity),
            self.visibility,
        );
        Ok(state.executor(self.db.storage()).execute(&query)?)
    }

    /// Iterate over every matching row.
    pub fn iter(&self) -> Result<std::vec::IntoIter<EntityRow>, Error> {
        Ok(self.all()?.into_iter())
    }

    /// Number of matching rows.
    pub fn count(&self) -> Result<usize, Error> {
        let state = self.db.snapshot();
        Ok(state.executor(self.db.storage()).count(&self.query())?)
    }

    /// Whether any row matches.
    pub fn exists(&self) -> Result<bool, Error> {
        Ok(self.count()? > 0)
    }

    /// First row in query order, else default order, else creation order.
    pub fn first(&self) -> Result<Option<EntityRow>, Error> {
        Ok(self.all()?.into_iter().next())
    }

    /// Last row in the order [`Self::first`] uses.
    pub fn last(&self) -> Result<Option<EntityRow>, Error> {
        Ok(self.all()?.pop())
    }

    /// The single row matching `filter`.
    pub fn get(&self, filter: FilterExpr) -> Result<EntityRow, Error> {
        let key = format!("{:?}", filter);
        self.single(self.clone().filter(filter).all()?, key)
    }

    /// The row with identity `id`.
    pub fn get_by_id(&self, id: [u8; 16]) -> Result<EntityRow, Error> {
        let state = self.db.snapshot();
        let identity = state
            .executor(self.db.storage())
            .identity_field(&self.query.entity)
            .to_string();
        let rows = self
            .clone()
            .filter(FilterExpr::eq(identity, Value::Uuid(id)))
            .all()?;
        self.single(rows, hex::encode(id))
    }

    /// Row with the smallest non-null `field`.
    pub fn earliest(&self, field: &str) -> Result<Option<EntityRow>, Error> {
        self.reordered(field, OrderSpec::asc(field)).first()
    }

    /// Row with the largest non-null `field`.
    pub fn latest(&self, field: &str) -> Result<Option<EntityRow>, Error> {
        self.reordered(field, OrderSpec::desc(field)).first()
    }

    /// Aggregate over the matching rows.
    pub fn aggregate(&self, aggregation: &Aggregation) -> Result<Value, Error> {
        let state = self.db.snapshot();
        Ok(state
            .executor(self.db.storage())
            .aggregate(&self.query(), aggregation)?)
    }

    /// One field of every matching row, null where absent.
    pub fn values_list(&self, field: &str) -> Result<Vec<Value>, Error> {
        Ok(self
            .all()?
            .into_iter()
            .map(|row| row.get(field).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Delete every matching row in one transaction.
    ///
    /// Rows are matched under the write lock, so a row removed or changed by
    /// a concurrent writer is judged by its committed state.
    pub fn delete(&self, forced: Option<DeletionPolicy>) -> Result<CascadeReport, Error> {
        self.db
            .delete_matching(self.query.clone(), self.visibility, forced)
    }

    /// Undelete every matching row in one transaction.
    pub fn undelete(&self, forced: Option<DeletionPolicy>) -> Result<CascadeReport, Error> {
        self.db
            .undelete_matching(self.query.clone(), self.visibility, forced)
    }

    fn reordered(&self, field: &str, order: OrderSpec) -> Self {
        let mut set = self.clone().filter(FilterExpr::is_not_null(field));
        set.query.order_by = vec![order];
        set
    }

    fn single(&self, mut rows: Vec<EntityRow>, key: String) -> Result<EntityRow, Error> {
        match rows.len() {
            0 => Err(Error::RecordNotFound {
                entity: self.query.entity.clone(),
                key,
            }),
            1 => Ok(rows.remove(0)),
            count => Err(Error::MultipleResults {
                entity: self.query.entity.clone(),
                count,
            }),
        }
    }
}
