//! Filter evaluation against decoded rows.

use std::cmp::Ordering;

use safedel_proto::{FilterExpr, SimpleFilter, Value};

/// A single leaf predicate, shared by top-level and nested filters.
enum Predicate<'a> {
    Compare(&'a str, &'a Value, fn(Ordering) -> bool),
    Eq(&'a str, &'a Value),
    Ne(&'a str, &'a Value),
    In(&'a str, &'a [Value]),
    NotIn(&'a str, &'a [Value]),
    IsNull(&'a str),
    IsNotNull(&'a str),
    Like(&'a str, &'a str),
    NotLike(&'a str, &'a str),
}

impl<'a> From<&'a SimpleFilter> for Predicate<'a> {
    fn from(filter: &'a SimpleFilter) -> Self {
        match filter {
            SimpleFilter::Eq { field, value } => Predicate::Eq(field, value),
            SimpleFilter::Ne { field, value } => Predicate::Ne(field, value),
            SimpleFilter::Lt { field, value } => Predicate::Compare(field, value, Ordering::is_lt),
            SimpleFilter::Le { field, value } => Predicate::Compare(field, value, Ordering::is_le),
            SimpleFilter::Gt { field, value } => Predicate::Compare(field, value, Ordering::is_gt),
            SimpleFilter::Ge { field, value } => Predicate::Compare(field, value, Ordering::is_ge),
            SimpleFilter::In { field, values } => Predicate::In(field, values),
            SimpleFilter::NotIn { field, values } => Predicate::NotIn(field, values),
            SimpleFilter::IsNull { field } => Predicate::IsNull(field),
            SimpleFilter::IsNotNull { field } => Predicate::IsNotNull(field),
            SimpleFilter::Like { field, pattern } => Predicate::Like(field, pattern),
            SimpleFilter::NotLike { field, pattern } => Predicate::NotLike(field, pattern),
        }
    }
}

impl Predicate<'_> {
    fn matches(&self, row: &[(String, Value)]) -> bool {
        let get = |field: &str| row.iter().find(|(n, _)| n == field).map(|(_, v)| v);
        match self {
            Predicate::Eq(field, value) => {
                get(field).is_some_and(|v| FilterEvaluator::values_equal(v, value))
            }
            Predicate::Ne(field, value) => {
                get(field).is_some_and(|v| !FilterEvaluator::values_equal(v, value))
            }
            Predicate::Compare(field, value, accept) => get(field)
                .and_then(|v| FilterEvaluator::compare_values(v, value))
                .is_some_and(accept),
            Predicate::In(field, values) => get(field)
                .is_some_and(|v| values.iter().any(|c| FilterEvaluator::values_equal(v, c))),
            Predicate::NotIn(field, values) => get(field)
                .map_or(true, |v| !values.iter().any(|c| FilterEvaluator::values_equal(v, c))),
            Predicate::IsNull(field) => matches!(get(field), None | Some(Value::Null)),
            Predicate::IsNotNull(field) => !matches!(get(field), None | Some(Value::Null)),
            Predicate::Like(field, pattern) => match get(field) {
                Some(Value::String(s)) => FilterEvaluator::like_match(s, pattern),
                _ => false,
            },
            Predicate::NotLike(field, pattern) => match get(field) {
                Some(Value::String(s)) => !FilterEvaluator::like_match(s, pattern),
                _ => true,
            },
        }
    }
}

/// Evaluates filter expressions against entity data.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter expression against a row of field values.
    pub fn evaluate(filter: &FilterExpr, row: &[(String, Value)]) -> bool {
        let leaf = |p: Predicate<'_>| p.matches(row);
        match filter {
            FilterExpr::Eq { field, value } => leaf(Predicate::Eq(field, value)),
            FilterExpr::Ne { field, value } => leaf(Predicate::Ne(field, value)),
            FilterExpr::Lt { field, value } => leaf(Predicate::Compare(field, value, Ordering::is_lt)),
            FilterExpr::Le { field, value } => leaf(Predicate::Compare(field, value, Ordering::is_le)),
            FilterExpr::Gt { field, value } => leaf(Predicate::Compare(field, value, Ordering::is_gt)),
            FilterExpr::Ge { field, value } => leaf(Predicate::Compare(field, value, Ordering::is_ge)),
            FilterExpr::In { field, values } => leaf(Predicate::In(field, values)),
            FilterExpr::NotIn { field, values } => leaf(Predicate::NotIn(field, values)),
            FilterExpr::IsNull { field } => leaf(Predicate::IsNull(field)),
            FilterExpr::IsNotNull { field } => leaf(Predicate::IsNotNull(field)),
            FilterExpr::Like { field, pattern } => leaf(Predicate::Like(field, pattern)),
            FilterExpr::NotLike { field, pattern } => leaf(Predicate::NotLike(field, pattern)),
            FilterExpr::And(filters) => filters.iter().all(|f| Predicate::from(f).matches(row)),
            FilterExpr::Or(filters) => filters.iter().any(|f| Predicate::from(f).matches(row)),
        }
    }

    /// Check a row against every filter of a query.
    pub fn evaluate_all(filters: &[FilterExpr], row: &[(String, Value)]) -> bool {
        filters.iter().all(|f| Self::evaluate(f, row))
    }

    /// Check if two values are equal, widening integers.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Int32(a), Value::Int64(b)) => i64::from(*a) == *b,
            (Value::Int64(a), Value::Int32(b)) => *a == i64::from(*b),
            _ => a == b,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int64(b)) => Some(i64::from(*a).cmp(b)),
            (Value::Int64(a), Value::Int32(b)) => Some(a.cmp(&i64::from(*b))),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then by value.
    pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let a = a.filter(|v| !v.is_null());
        let b = b.filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => Self::compare_values(a, b).unwrap_or(Ordering::Equal),
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// `%` matches any run of characters, `_` exactly one; a backslash makes
    /// the next pattern character literal.
    pub fn like_match(value: &str, pattern: &str) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Token {
            Any,
            One,
            Lit(char),
        }

        let mut tokens = Vec::new();
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            tokens.push(match c {
                '%' => Token::Any,
                '_' => Token::One,
                '\\' => Token::Lit(chars.next().unwrap_or('\\')),
                c => Token::Lit(c),
            });
        }
        let text: Vec<char> = value.chars().collect();

        // Greedy match with a single backtrack point at the last `%`.
        let (mut t, mut p) = (0, 0);
        let mut star: Option<(usize, usize)> = None;
        while t < text.len() {
            match tokens.get(p) {
                Some(Token::Any) => {
                    star = Some((p, t));
                    p += 1;
                }
                Some(Token::One) => {
                    t += 1;
                    p += 1;
                }
                Some(Token::Lit(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match star {
                    Some((sp, st)) => {
                        p = sp + 1;
                        t = st + 1;
                        star = Some((sp, st + 1));
                    }
                    None => return false,
                },
            }
        }
        tokens[p..].iter().all(|tok| *tok == Token::Any)
    }
}
