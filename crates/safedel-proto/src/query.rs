//! Retrieval vocabulary: filters, ordering, slicing and aggregation.

use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Aggregate function types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum AggregateFunction {
    /// Count of rows/values.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

/// A single aggregation operation.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Aggregation {
    /// The aggregation function to apply.
    pub function: AggregateFunction,
    /// Field to aggregate (None for COUNT(*)).
    pub field: Option<String>,
}

impl Aggregation {
    /// Create a COUNT(*) aggregation.
    pub fn count() -> Self {
        Self {
            function: AggregateFunction::Count,
            field: None,
        }
    }

    /// Create a COUNT(field) aggregation.
    pub fn count_field(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Count, field)
    }

    /// Create a SUM aggregation.
    pub fn sum(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Sum, field)
    }

    /// Create an AVG aggregation.
    pub fn avg(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Avg, field)
    }

    /// Create a MIN aggregation.
    pub fn min(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Min, field)
    }

    /// Create a MAX aggregation.
    pub fn max(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Max, field)
    }

    fn of(function: AggregateFunction, field: impl Into<String>) -> Self {
        Self {
            function,
            field: Some(field.into()),
        }
    }
}

/// Filter expression for selecting rows.
///
/// Note: This uses a flat design without recursive Box types to work with rkyv.
/// And/Or hold a single level of [`SimpleFilter`]s.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum FilterExpr {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// Field does not match a LIKE pattern.
    NotLike { field: String, pattern: String },
    /// All conditions must be true.
    And(Vec<SimpleFilter>),
    /// At least one condition must be true.
    Or(Vec<SimpleFilter>),
}

/// A simple (non-compound) filter for use in And/Or expressions.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum SimpleFilter {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// Field does not match a LIKE pattern.
    NotLike { field: String, pattern: String },
}

impl SimpleFilter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        SimpleFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        SimpleFilter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        SimpleFilter::IsNull {
            field: field.into(),
        }
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        SimpleFilter::IsNotNull {
            field: field.into(),
        }
    }
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNull {
            field: field.into(),
        }
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNotNull {
            field: field.into(),
        }
    }

    /// Create a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        FilterExpr::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Create an AND filter combining multiple simple expressions.
    pub fn and(exprs: Vec<SimpleFilter>) -> Self {
        FilterExpr::And(exprs)
    }

    /// Create an OR filter combining multiple simple expressions.
    pub fn or(exprs: Vec<SimpleFilter>) -> Self {
        FilterExpr::Or(exprs)
    }

    /// Value this expression requires `field` to equal, if it pins one.
    ///
    /// Only a top-level `Eq` or an `Eq` inside an `And` pins a value; `Or`
    /// never does.
    pub fn equality_on(&self, field: &str) -> Option<&Value> {
        match self {
            FilterExpr::Eq { field: f, value } if f == field => Some(value),
            FilterExpr::And(filters) => filters.iter().find_map(|sf| match sf {
                SimpleFilter::Eq { field: f, value } if f == field => Some(value),
                _ => None,
            }),
            _ => None,
        }
    }
}

/// Order specification for sorting results.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct OrderSpec {
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// The same field in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            field: self.field.clone(),
            direction: match self.direction {
                OrderDirection::Asc => OrderDirection::Desc,
                OrderDirection::Desc => OrderDirection::Asc,
            },
        }
    }
}

/// Sort direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Slice of a result set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Pagination {
    /// Number of results to skip.
    pub offset: u32,
    /// Maximum number of results to return. None means unbounded.
    pub limit: Option<u32>,
}

impl Pagination {
    /// Create pagination with offset and limit.
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: u32) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }

    /// Skip `offset` rows and return the rest.
    pub fn offset(offset: u32) -> Self {
        Self {
            offset,
            limit: None,
        }
    }

    /// Apply the slice to a vector of rows.
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let take = self.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        rows.into_iter().skip(self.offset as usize).take(take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complex_filter() {
        let filter = FilterExpr::and(vec![
            SimpleFilter::eq("status", "active"),
            SimpleFilter::is_not_null("email"),
        ]);

        if let FilterExpr::And(exprs) = &filter {
            assert_eq!(exprs.len(), 2);
        } else {
            panic!("Expected And filter");
        }
    }

    #[test]
    fn test_equality_on() {
        let id = Value::Uuid([7u8; 16]);
        assert_eq!(FilterExpr::eq("id", id.clone()).equality_on("id"), Some(&id));
        assert_eq!(FilterExpr::eq("name", "x").equality_on("id"), None);

        let and = FilterExpr::and(vec![
            SimpleFilter::eq("name", "x"),
            SimpleFilter::eq("id", id.clone()),
        ]);
        assert_eq!(and.equality_on("id"), Some(&id));

        let or = FilterExpr::or(vec![SimpleFilter::eq("id", id)]);
        assert_eq!(or.equality_on("id"), None);
    }

    #[test]
    fn test_pagination_apply() {
        let rows: Vec<u32> = (0..10).collect();
        assert_eq!(Pagination::new(2, 3).apply(rows.clone()), vec![2, 3, 4]);
        assert_eq!(Pagination::offset(8).apply(rows.clone()), vec![8, 9]);
        assert_eq!(Pagination::limit(20).apply(rows).len(), 10);
    }

    #[test]
    fn test_reversed_order() {
        let order = OrderSpec::asc("name").reversed();
        assert_eq!(order.direction, OrderDirection::Desc);
        assert_eq!(order.field, "name");
    }
}
