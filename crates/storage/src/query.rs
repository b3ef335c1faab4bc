//! Ad-hoc queries over a single collection.
//!
//! A [`Query`] is a conjunction of [`Predicate`]s evaluated against the
//! top-level fields of each document body. A missing field compares as
//! `null`. String values that parse as RFC 3339 timestamps are compared as
//! instants, so `chrono` dates serialized with different sub-second
//! precision still order correctly.
//!
//! # Example
//!
//! ```
//! use identity_docstore::Query;
//! use serde_json::json;
//!
//! let query = Query::collection("Tokens")
//!     .where_eq("application_id", "applications/1-A")
//!     .where_ne("status", "revoked")
//!     .take(10);
//!
//! assert!(query.matches(&json!({ "application_id": "applications/1-A", "status": "valid" })));
//! assert!(!query.matches(&json!({ "application_id": "applications/1-A", "status": "revoked" })));
//! ```

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single condition on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value.
    Eq(String, Value),
    /// Field does not equal the value. Missing fields match.
    Ne(String, Value),
    /// Field orders strictly before the value.
    Lt(String, Value),
    /// Field orders strictly after the value.
    Gt(String, Value),
    /// Array field contains the value.
    Contains(String, Value),
    /// Array field contains every one of the values.
    ContainsAll(String, Vec<Value>),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// At least one nested predicate holds.
    Or(Vec<Predicate>),
    /// Every nested predicate holds. Lets an [`Or`](Self::Or) branch be a
    /// conjunction.
    And(Vec<Predicate>),
}

impl Predicate {
    /// Evaluates the predicate against a document body.
    #[must_use]
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Self::Eq(field, value) => values_equal(field_of(body, field), value),
            Self::Ne(field, value) => !values_equal(field_of(body, field), value),
            Self::Lt(field, value) => {
                compare_values(field_of(body, field), value) == Some(Ordering::Less)
            },
            Self::Gt(field, value) => {
                compare_values(field_of(body, field), value) == Some(Ordering::Greater)
            },
            Self::Contains(field, value) => array_contains(field_of(body, field), value),
            Self::ContainsAll(field, values) => {
                let items = field_of(body, field);
                values.iter().all(|value| array_contains(items, value))
            },
            Self::In(field, values) => {
                let actual = field_of(body, field);
                values.iter().any(|value| values_equal(actual, value))
            },
            Self::Or(predicates) => predicates.iter().any(|p| p.matches(body)),
            Self::And(predicates) => predicates.iter().all(|p| p.matches(body)),
        }
    }
}

/// A filtered, paged query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    predicates: Vec<Predicate>,
    skip: usize,
    take: Option<usize>,
}

impl Query {
    /// Starts a query over every document in `collection`.
    #[must_use]
    pub fn collection(collection: impl Into<String>) -> Self {
        Self { collection: collection.into(), predicates: Vec::new(), skip: 0, take: None }
    }

    /// Adds an arbitrary predicate.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds `field == value`.
    #[must_use]
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::Eq(field.into(), value.into()))
    }

    /// Adds `field != value`.
    #[must_use]
    pub fn where_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::Ne(field.into(), value.into()))
    }

    /// Adds `field < value`.
    #[must_use]
    pub fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::Lt(field.into(), value.into()))
    }

    /// Adds "array `field` contains `value`".
    #[must_use]
    pub fn where_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::Contains(field.into(), value.into()))
    }

    /// Adds "array `field` contains all of `values`".
    #[must_use]
    pub fn where_contains_all<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Predicate::ContainsAll(field.into(), values.into_iter().map(Into::into).collect()))
    }

    /// Adds "`field` is one of `values`".
    #[must_use]
    pub fn where_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Predicate::In(field.into(), values.into_iter().map(Into::into).collect()))
    }

    /// Skips the first `count` matches.
    #[must_use]
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    /// Returns at most `count` matches.
    #[must_use]
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Removes paging, keeping the filters.
    #[must_use]
    pub fn unpaged(mut self) -> Self {
        self.skip = 0;
        self.take = None;
        self
    }

    /// Target collection.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Filters, all of which must hold.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Number of matches skipped.
    #[must_use]
    pub fn skip_count(&self) -> usize {
        self.skip
    }

    /// Page size, if bounded.
    #[must_use]
    pub fn take_count(&self) -> Option<usize> {
        self.take
    }

    /// Evaluates the filters (not the paging) against a body.
    #[must_use]
    pub fn matches(&self, body: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(body))
    }
}

fn field_of<'a>(body: &'a Value, field: &str) -> &'a Value {
    body.get(field).unwrap_or(&Value::Null)
}

fn array_contains(items: &Value, value: &Value) -> bool {
    items.as_array().is_some_and(|items| items.iter().any(|item| values_equal(item, value)))
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (parse_instant(left), parse_instant(right)) {
        (Some(l), Some(r)) => l == r,
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => left == right,
        },
    }
}

/// Orders two scalar values. Returns `None` for `null` or mismatched types.
#[must_use]
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (parse_instant(left), parse_instant(right)) {
        return Some(l.cmp(&r));
    }
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_field_matches_not_equal() {
        let query = Query::collection("Authorizations").where_ne("status", "valid");
        assert!(query.matches(&json!({})));
        assert!(!query.matches(&json!({ "status": "valid" })));
    }

    #[test]
    fn null_never_orders() {
        let query = Query::collection("Tokens").where_lt("expiration_date", "2030-01-01T00:00:00Z");
        assert!(!query.matches(&json!({ "expiration_date": null })));
        assert!(!query.matches(&json!({})));
    }

    #[test]
    fn timestamps_compare_as_instants() {
        // Lexically "…00.5Z" sorts before "…00Z", but the instant is later.
        let query = Query::collection("Tokens").where_lt("creation_date", "2024-01-01T00:00:00Z");
        assert!(!query.matches(&json!({ "creation_date": "2024-01-01T00:00:00.500Z" })));
        assert!(query.matches(&json!({ "creation_date": "2023-12-31T23:59:59.999999Z" })));
    }

    #[test]
    fn contains_all_requires_every_value() {
        let query =
            Query::collection("Authorizations").where_contains_all("scopes", ["openid", "email"]);
        assert!(query.matches(&json!({ "scopes": ["email", "openid", "profile"] })));
        assert!(!query.matches(&json!({ "scopes": ["openid"] })));
        assert!(!query.matches(&json!({ "scopes": null })));
    }

    #[test]
    fn or_matches_any_branch() {
        let query = Query::collection("AuthorizationPruneEntries").filter(Predicate::Or(vec![
            Predicate::Ne("status".into(), json!("valid")),
            Predicate::Eq("type".into(), json!("ad-hoc")),
        ]));
        assert!(query.matches(&json!({ "status": "valid", "type": "ad-hoc" })));
        assert!(query.matches(&json!({ "status": "revoked", "type": "permanent" })));
        assert!(!query.matches(&json!({ "status": "valid", "type": "permanent" })));
    }

    #[test]
    fn and_nests_inside_or() {
        let query = Query::collection("TokenPruneEntries").filter(Predicate::Or(vec![
            Predicate::Eq("authorization_status".into(), json!("revoked")),
            Predicate::And(vec![
                Predicate::Ne("status".into(), json!("inactive")),
                Predicate::Ne("status".into(), json!("valid")),
            ]),
        ]));
        assert!(query.matches(&json!({ "status": "redeemed" })));
        assert!(query.matches(&json!({ "status": "valid", "authorization_status": "revoked" })));
        assert!(!query.matches(&json!({ "status": "inactive", "authorization_status": "valid" })));
    }

    #[test]
    fn where_in_matches_any_listed_value() {
        let query = Query::collection("Scopes").where_in("name", ["read", "write"]);
        assert!(query.matches(&json!({ "name": "write" })));
        assert!(!query.matches(&json!({ "name": "admin" })));
    }

    proptest! {
        #[test]
        fn eq_and_ne_are_complementary(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
            let body = json!({ "field": a });
            let eq = Query::collection("C").where_eq("field", b.clone()).matches(&body);
            let ne = Query::collection("C").where_ne("field", b).matches(&body);
            prop_assert_ne!(eq, ne);
        }

        #[test]
        fn integer_ordering_matches_native(a in any::<i32>(), b in any::<i32>()) {
            prop_assert_eq!(compare_values(&json!(a), &json!(b)), Some(a.cmp(&b)));
        }
    }
}
