//! Bulk revoke and prune.
//!
//! Both run as server-side [`BulkOperation`]s outside any session:
//!
//! - **Revoke** patches `status = revoked` onto every entity matching an [`EntityFilter`].
//! - **Prune** deletes entities through the prune projections (see [`crate::indexes`]), so the
//!   rules can use joined facts.
//!
//! The store runs the operation asynchronously. [`BulkMaintenance`] waits
//! for it up to the configured budget; past the budget it logs a warning
//! and reports [`TIMED_OUT_COUNT`], since the operation may still be running. Callers that
//! need a definite answer start the operation themselves and keep the
//! [`Operation`] handle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use identity_docstore::{
    BulkOperation, Document, DocumentStore, Operation, Patch, Predicate, Query, StorageError,
};
use serde_json::{Value, json};

use crate::{
    error::Result,
    indexes::{AUTHORIZATION_PRUNE_ENTRIES, TOKEN_PRUNE_ENTRIES},
    models::{authorization_types, statuses},
};

/// Count reported when a bulk operation outlives the wait budget; the
/// operation may still be running.
pub const TIMED_OUT_COUNT: u64 = 1;

/// Optional equality filters for finds and revokes. Blank values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct EntityFilter {
    /// Match on `subject`.
    #[builder(into)]
    pub subject: Option<String>,
    /// Match on `application_id`.
    #[builder(into)]
    pub application_id: Option<String>,
    /// Match on `authorization_id` (tokens only).
    #[builder(into)]
    pub authorization_id: Option<String>,
    /// Match on `status`.
    #[builder(into)]
    pub status: Option<String>,
    /// Match on `type`.
    #[builder(into)]
    pub kind: Option<String>,
}

impl EntityFilter {
    /// The query selecting every match in `collection`.
    #[must_use]
    pub fn to_query(&self, collection: &str) -> Query {
        let filters = [
            ("subject", &self.subject),
            ("application_id", &self.application_id),
            ("authorization_id", &self.authorization_id),
            ("status", &self.status),
            ("type", &self.kind),
        ];
        filters
            .into_iter()
            .filter_map(|(field, value)| {
                value.as_deref().filter(|v| !v.is_empty()).map(|v| (field, v))
            })
            .fold(Query::collection(collection), |query, (field, value)| query.where_eq(field, value))
    }
}

/// The entity kind a prune targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneTarget {
    /// Authorizations with no tokens that are invalid or ad-hoc.
    Authorizations,
    /// Tokens that are expired, orphaned from a valid authorization, or spent.
    Tokens,
}

impl PruneTarget {
    fn projection(self) -> &'static str {
        match self {
            Self::Authorizations => AUTHORIZATION_PRUNE_ENTRIES,
            Self::Tokens => TOKEN_PRUNE_ENTRIES,
        }
    }

    fn reference_field(self) -> &'static str {
        match self {
            Self::Authorizations => "authorization_id",
            Self::Tokens => "token_id",
        }
    }

    /// The projection query selecting prunable entries.
    ///
    /// Authorizations: `creation_date < threshold AND has_tokens = false AND
    /// (status != valid OR type = ad-hoc)`.
    ///
    /// Tokens: `creation_date < threshold AND (expiration_date < now OR
    /// authorization_status != valid OR (status != inactive AND status != valid))`.
    #[must_use]
    pub fn query(self, threshold: DateTime<Utc>, now: DateTime<Utc>) -> Query {
        let base = Query::collection(self.projection()).where_lt("creation_date", threshold.to_rfc3339());
        match self {
            Self::Authorizations => base.where_eq("has_tokens", false).filter(Predicate::Or(vec![
                Predicate::Ne("status".into(), json!(statuses::VALID)),
                Predicate::Eq("type".into(), json!(authorization_types::AD_HOC)),
            ])),
            Self::Tokens => base.filter(Predicate::Or(vec![
                Predicate::Lt("expiration_date".into(), Value::String(now.to_rfc3339())),
                Predicate::Ne("authorization_status".into(), json!(statuses::VALID)),
                Predicate::And(vec![
                    Predicate::Ne("status".into(), json!(statuses::INACTIVE)),
                    Predicate::Ne("status".into(), json!(statuses::VALID)),
                ]),
            ])),
        }
    }
}

/// Issues and awaits bulk maintenance operations.
#[derive(Debug, Clone)]
pub struct BulkMaintenance<S: DocumentStore> {
    store: S,
    timeout: Duration,
}

impl<S: DocumentStore> BulkMaintenance<S> {
    /// Creates a maintenance handle that waits up to `timeout` per operation.
    #[must_use]
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Wait budget per operation.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts revoking every match of `filter` in `collection`.
    #[tracing::instrument(skip(self, filter))]
    pub async fn start_revoke(&self, collection: &str, filter: &EntityFilter) -> Result<Operation> {
        let operation = self
            .store
            .send(BulkOperation::PatchByQuery {
                query: filter.to_query(collection),
                patch: Patch::set("status", statuses::REVOKED),
            })
            .await?;
        Ok(operation)
    }

    /// Starts pruning `target` entities created before `threshold`.
    #[tracing::instrument(skip(self))]
    pub async fn start_prune(&self, target: PruneTarget, threshold: DateTime<Utc>) -> Result<Operation> {
        let operation = self
            .store
            .send(BulkOperation::DeleteReferenced {
                query: target.query(threshold, Utc::now()),
                reference_field: target.reference_field().to_owned(),
            })
            .await?;
        Ok(operation)
    }

    /// Waits for `operation` up to the budget.
    ///
    /// Returns the affected count, or [`TIMED_OUT_COUNT`] if the budget runs
    /// out first. A timed-out operation keeps running; its handle can still
    /// be polled.
    pub async fn await_advisory(&self, operation: &Operation, label: &'static str) -> Result<u64> {
        match operation.wait_for_completion(self.timeout).await {
            Ok(result) => Ok(result.total),
            Err(StorageError::Timeout) => {
                tracing::warn!(
                    operation = %operation.id(),
                    label,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "bulk operation did not complete within the wait budget; returning advisory count"
                );
                Ok(TIMED_OUT_COUNT)
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Revokes every match and waits for the advisory count.
    pub async fn revoke<T: Document>(&self, filter: &EntityFilter) -> Result<u64> {
        let operation = self.start_revoke(T::COLLECTION, filter).await?;
        self.await_advisory(&operation, "revoke").await
    }

    /// Prunes and waits for the advisory count.
    pub async fn prune(&self, target: PruneTarget, threshold: DateTime<Utc>) -> Result<u64> {
        let operation = self.start_prune(target, threshold).await?;
        self.await_advisory(&operation, "prune").await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use rstest::rstest;

    use super::*;

    fn days_ago(days: i64) -> String {
        (Utc::now() - ChronoDuration::days(days)).to_rfc3339()
    }

    #[rstest]
    #[case::invalid_without_tokens(40, "redeemed", "permanent", false, true)]
    #[case::adhoc_valid_without_tokens(40, "valid", "ad-hoc", false, true)]
    #[case::permanent_valid(40, "valid", "permanent", false, false)]
    #[case::has_tokens(40, "revoked", "ad-hoc", true, false)]
    #[case::too_recent(5, "revoked", "ad-hoc", false, false)]
    fn authorization_prune_rule(
        #[case] age_days: i64,
        #[case] status: &str,
        #[case] kind: &str,
        #[case] has_tokens: bool,
        #[case] pruned: bool,
    ) {
        let threshold = Utc::now() - ChronoDuration::days(14);
        let entry = json!({
            "authorization_id": "authorizations/1-A",
            "creation_date": days_ago(age_days),
            "status": status,
            "type": kind,
            "has_tokens": has_tokens,
        });
        assert_eq!(PruneTarget::Authorizations.query(threshold, Utc::now()).matches(&entry), pruned);
    }

    #[rstest]
    #[case::expired(40, Some(-1), "valid", Some("valid"), true)]
    #[case::live_and_valid(40, Some(1), "valid", Some("valid"), false)]
    #[case::inactive_is_kept(40, Some(1), "inactive", Some("valid"), false)]
    #[case::redeemed(40, Some(1), "redeemed", Some("valid"), true)]
    #[case::authorization_revoked(40, Some(1), "valid", Some("revoked"), true)]
    #[case::no_authorization(40, None, "valid", None, true)]
    #[case::too_recent(5, Some(-1), "redeemed", Some("revoked"), false)]
    fn token_prune_rule(
        #[case] age_days: i64,
        #[case] expires_in_days: Option<i64>,
        #[case] status: &str,
        #[case] authorization_status: Option<&str>,
        #[case] pruned: bool,
    ) {
        let now = Utc::now();
        let threshold = now - ChronoDuration::days(14);
        let entry = json!({
            "token_id": "tokens/1-A",
            "creation_date": days_ago(age_days),
            "expiration_date": expires_in_days.map(|d| (now + ChronoDuration::days(d)).to_rfc3339()),
            "status": status,
            "authorization_status": authorization_status,
        });
        assert_eq!(PruneTarget::Tokens.query(threshold, now).matches(&entry), pruned);
    }

    #[test]
    fn revoke_filter_skips_blank_values() {
        let filter = EntityFilter::builder().subject("alice").status("").build();
        let query = filter.to_query("Tokens");
        assert_eq!(query.predicates().len(), 1);
        assert!(query.matches(&json!({ "subject": "alice", "status": "valid" })));
        assert!(!query.matches(&json!({ "subject": "bob" })));
    }

    #[test]
    fn empty_revoke_filter_matches_everything() {
        let query = EntityFilter::default().to_query("Authorizations");
        assert!(query.predicates().is_empty());
        assert_eq!(query.collection_name(), "Authorizations");
    }
}
