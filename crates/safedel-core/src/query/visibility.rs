//! Visibility filtering of masked rows.
//!
//! A [`Query`] built with [`Query::new`] is the unfiltered path: it carries
//! [`MaskPredicate::Any`] and sees every stored row. Default retrieval runs the
//! query through [`VisibilityFilter::apply`], which narrows the predicate
//! according to the entity's strategy and an optional caller override.

use super::Query;
use crate::policy::{Visibility, VisibilityRule};

/// Explicit visibility requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VisibilityOverride {
    /// Live and masked rows.
    ShowAll,
    /// Masked rows only.
    MaskedOnly,
}

/// Which rows a query admits by mask state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskPredicate {
    /// Every row.
    #[default]
    Any,
    /// Rows without a mask.
    LiveOnly,
    /// Masked rows.
    MaskedOnly,
}

impl MaskPredicate {
    /// Whether a row with the given mask state passes.
    pub fn admits(self, masked: bool) -> bool {
        match self {
            MaskPredicate::Any => true,
            MaskPredicate::LiveOnly => !masked,
            MaskPredicate::MaskedOnly => masked,
        }
    }
}

impl From<VisibilityOverride> for MaskPredicate {
    fn from(value: VisibilityOverride) -> Self {
        match value {
            VisibilityOverride::ShowAll => MaskPredicate::Any,
            VisibilityOverride::MaskedOnly => MaskPredicate::MaskedOnly,
        }
    }
}

/// Rewrites queries so default retrieval hides masked rows.
pub struct VisibilityFilter;

impl VisibilityFilter {
    /// Mask predicate for a query under a rule and optional override.
    ///
    /// An override always wins. Without one, `VisibleByPk` and
    /// `VisibleByField` admit masked rows only when some filter pins the
    /// discriminator by equality.
    pub fn predicate(
        query: &Query,
        rule: &VisibilityRule,
        visibility: Option<VisibilityOverride>,
    ) -> MaskPredicate {
        if let Some(visibility) = visibility {
            return visibility.into();
        }
        match rule.strategy {
            Visibility::All => MaskPredicate::Any,
            Visibility::Hidden => MaskPredicate::LiveOnly,
            Visibility::VisibleByPk | Visibility::VisibleByField => {
                let pinned = query
                    .filters
                    .iter()
                    .any(|f| f.equality_on(&rule.discriminator).is_some());
                if pinned {
                    MaskPredicate::Any
                } else {
                    MaskPredicate::LiveOnly
                }
            }
        }
    }

    /// Apply the rule to a query.
    pub fn apply(
        mut query: Query,
        rule: &VisibilityRule,
        visibility: Option<VisibilityOverride>,
    ) -> Query {
        query.mask = Self::predicate(&query, rule, visibility);
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safedel_proto::{FilterExpr, SimpleFilter, Value};

    fn rule(strategy: Visibility) -> VisibilityRule {
        VisibilityRule::new(strategy, "id")
    }

    fn by_id() -> Query {
        Query::new("User").with_filter(FilterExpr::eq("id", Value::Uuid([1; 16])))
    }

    fn by_name() -> Query {
        Query::new("User").with_filter(FilterExpr::eq("name", "ann"))
    }

    #[test]
    fn test_hidden_never_bypasses() {
        let q = VisibilityFilter::apply(by_id(), &rule(Visibility::Hidden), None);
        assert_eq!(q.mask, MaskPredicate::LiveOnly);
    }

    #[test]
    fn test_visible_by_pk() {
        let r = rule(Visibility::VisibleByPk);
        assert_eq!(VisibilityFilter::apply(by_id(), &r, None).mask, MaskPredicate::Any);
        assert_eq!(
            VisibilityFilter::apply(by_name(), &r, None).mask,
            MaskPredicate::LiveOnly
        );
    }

    #[test]
    fn test_visible_by_field_uses_discriminator() {
        let r = VisibilityRule::new(Visibility::VisibleByField, "name");
        assert_eq!(VisibilityFilter::apply(by_name(), &r, None).mask, MaskPredicate::Any);
        assert_eq!(
            VisibilityFilter::apply(by_id(), &r, None).mask,
            MaskPredicate::LiveOnly
        );

        let anded = Query::new("User").with_filter(FilterExpr::and(vec![
            SimpleFilter::eq("name", "ann"),
            SimpleFilter::is_not_null("email"),
        ]));
        assert_eq!(VisibilityFilter::apply(anded, &r, None).mask, MaskPredicate::Any);
    }

    #[test]
    fn test_all_and_overrides() {
        let q = VisibilityFilter::apply(by_name(), &rule(Visibility::All), None);
        assert_eq!(q.mask, MaskPredicate::Any);

        let hidden = rule(Visibility::Hidden);
        let q = VisibilityFilter::apply(by_name(), &hidden, Some(VisibilityOverride::ShowAll));
        assert_eq!(q.mask, MaskPredicate::Any);

        let all = rule(Visibility::All);
        let q = VisibilityFilter::apply(by_name(), &all, Some(VisibilityOverride::MaskedOnly));
        assert_eq!(q.mask, MaskPredicate::MaskedOnly);
    }

    #[test]
    fn test_admits() {
        assert!(MaskPredicate::Any.admits(true));
        assert!(!MaskPredicate::LiveOnly.admits(true));
        assert!(MaskPredicate::MaskedOnly.admits(true));
        assert!(!MaskPredicate::MaskedOnly.admits(false));
    }
}
