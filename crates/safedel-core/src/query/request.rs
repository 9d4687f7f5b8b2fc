//! Query description.

use safedel_proto::{FilterExpr, OrderSpec, Pagination};

use super::MaskPredicate;

/// A retrieval over one entity type.
///
/// Filters are combined with AND. Relation accessors listed in
/// `select_related` and `prefetch` are loaded into [`super::EntityRow::related`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Root entity type.
    pub entity: String,
    /// Filters, all of which must hold.
    pub filters: Vec<FilterExpr>,
    /// Explicit ordering. Empty falls back to the entity's default order.
    pub order_by: Vec<OrderSpec>,
    /// Slice applied after ordering.
    pub pagination: Option<Pagination>,
    /// Mask states admitted.
    pub mask: MaskPredicate,
    /// Single-valued accessors joined without visibility filtering.
    pub select_related: Vec<String>,
    /// Accessors loaded under the target's default visibility.
    pub prefetch: Vec<String>,
}

impl Query {
    /// Unfiltered query over every row of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
            mask: MaskPredicate::Any,
            select_related: Vec::new(),
            prefetch: Vec::new(),
        }
    }

    /// Add a filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an ordering key.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Set the mask predicate.
    pub fn with_mask(mut self, mask: MaskPredicate) -> Self {
        self.mask = mask;
        self
    }

    /// Join a single-valued relation.
    pub fn with_select_related(mut self, accessor: impl Into<String>) -> Self {
        self.select_related.push(accessor.into());
        self
    }

    /// Load a relation collection.
    pub fn with_prefetch(mut self, accessor: impl Into<String>) -> Self {
        self.prefetch.push(accessor.into());
        self
    }
}
