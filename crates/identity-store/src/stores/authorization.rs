use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use identity_docstore::{Document, DocumentSession, DocumentStore, Query};

use super::{EntityStream, commit, loaded_id, page, require_change_vector, require_collection, stream};
use crate::{
    config::IdentityStoreConfig,
    error::{Result, require_non_blank},
    maintenance::{BulkMaintenance, EntityFilter, PruneTarget},
    models::Authorization,
};

/// Persistence contract for [`Authorization`]s.
///
/// Authorizations are bulk-revoked and bulk-pruned, so writes use
/// change-vector concurrency.
#[async_trait]
pub trait AuthorizationStore: Send {
    /// Counts every authorization.
    async fn count(&mut self) -> Result<u64>;

    /// Counts the matches of `query`, which must target authorizations.
    async fn count_matching(&mut self, query: &Query) -> Result<u64>;

    /// Persists a new authorization.
    async fn create(&mut self, authorization: &mut Authorization) -> Result<()>;

    /// Deletes the authorization, conditioned on the version this session
    /// loaded.
    async fn delete(&mut self, authorization: &Authorization) -> Result<()>;

    /// Streams the authorizations a subject gave a client, optionally
    /// narrowed by status, type and a set of scopes that must all be granted.
    fn find(
        &self,
        subject: &str,
        client: &str,
        status: Option<&str>,
        kind: Option<&str>,
        scopes: &[String],
    ) -> Result<EntityStream<Authorization>>;

    /// Streams the authorizations of an application.
    fn find_by_application_id(&self, application_id: &str) -> Result<EntityStream<Authorization>>;

    /// Loads an authorization by id.
    async fn find_by_id(&mut self, id: &str) -> Result<Option<Authorization>>;

    /// Streams the authorizations given by a subject.
    fn find_by_subject(&self, subject: &str) -> Result<EntityStream<Authorization>>;

    /// Streams a page of authorizations in id order.
    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Authorization>;

    /// Deletes authorizations created before `threshold` that have no
    /// tokens and are invalid or ad-hoc. The count is advisory.
    async fn prune(&mut self, threshold: DateTime<Utc>) -> Result<u64>;

    /// Revokes every authorization matching `filter`. The count is advisory.
    async fn revoke(&mut self, filter: &EntityFilter) -> Result<u64>;

    /// Revokes every authorization of an application.
    async fn revoke_by_application_id(&mut self, application_id: &str) -> Result<u64>;

    /// Revokes every authorization given by a subject.
    async fn revoke_by_subject(&mut self, subject: &str) -> Result<u64>;

    /// Writes back a loaded authorization.
    async fn update(&mut self, authorization: &mut Authorization) -> Result<()>;
}

/// [`AuthorizationStore`] over a [`DocumentSession`].
pub struct DocumentAuthorizationStore<S: DocumentStore> {
    session: DocumentSession<S>,
    maintenance: BulkMaintenance<S>,
}

impl<S: DocumentStore> DocumentAuthorizationStore<S> {
    /// Creates a store working through `session`.
    #[must_use]
    pub fn new(session: DocumentSession<S>, config: Arc<IdentityStoreConfig>) -> Self {
        let maintenance =
            BulkMaintenance::new(session.document_store().clone(), config.bulk_operation_timeout());
        Self { session, maintenance }
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &DocumentSession<S> {
        &self.session
    }

    /// Mutable access to the underlying session.
    pub fn session_mut(&mut self) -> &mut DocumentSession<S> {
        &mut self.session
    }

    /// Releases the underlying session.
    #[must_use]
    pub fn into_session(self) -> DocumentSession<S> {
        self.session
    }

    /// Bulk maintenance handle, for callers that poll operations themselves.
    #[must_use]
    pub fn maintenance(&self) -> &BulkMaintenance<S> {
        &self.maintenance
    }

    fn where_eq(&self, field: &'static str, value: &str) -> Result<EntityStream<Authorization>> {
        require_non_blank(field, value)?;
        Ok(stream(&self.session, Query::collection(Authorization::COLLECTION).where_eq(field, value)))
    }
}

#[async_trait]
impl<S: DocumentStore> AuthorizationStore for DocumentAuthorizationStore<S> {
    async fn count(&mut self) -> Result<u64> {
        Ok(self.session.count(&Query::collection(Authorization::COLLECTION)).await?)
    }

    async fn count_matching(&mut self, query: &Query) -> Result<u64> {
        require_collection::<Authorization>(query)?;
        Ok(self.session.count(query).await?)
    }

    #[tracing::instrument(skip(self, authorization), fields(application_id = %authorization.application_id))]
    async fn create(&mut self, authorization: &mut Authorization) -> Result<()> {
        require_non_blank("application_id", &authorization.application_id)?;
        require_change_vector(&self.session)?;

        let id = self.session.store_new(authorization).await?;
        commit(&mut self.session, "create_authorization", &id).await
    }

    #[tracing::instrument(skip(self, authorization), fields(id = ?authorization.id))]
    async fn delete(&mut self, authorization: &Authorization) -> Result<()> {
        let id = loaded_id(&self.session, authorization)?;
        require_change_vector(&self.session)?;

        self.session.delete(&id);
        commit(&mut self.session, "delete_authorization", &id).await
    }

    fn find(
        &self,
        subject: &str,
        client: &str,
        status: Option<&str>,
        kind: Option<&str>,
        scopes: &[String],
    ) -> Result<EntityStream<Authorization>> {
        require_non_blank("subject", subject)?;
        require_non_blank("client", client)?;

        let filter = EntityFilter::builder()
            .subject(subject)
            .application_id(client)
            .maybe_status(status)
            .maybe_kind(kind)
            .build();
        let mut query = filter.to_query(Authorization::COLLECTION);
        if !scopes.is_empty() {
            query = query.where_contains_all("scopes", scopes.iter().cloned());
        }
        Ok(stream(&self.session, query))
    }

    fn find_by_application_id(&self, application_id: &str) -> Result<EntityStream<Authorization>> {
        self.where_eq("application_id", application_id)
    }

    async fn find_by_id(&mut self, id: &str) -> Result<Option<Authorization>> {
        require_non_blank("id", id)?;
        Ok(self.session.load(id).await?)
    }

    fn find_by_subject(&self, subject: &str) -> Result<EntityStream<Authorization>> {
        self.where_eq("subject", subject)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Authorization> {
        stream(&self.session, page::<Authorization>(count, offset))
    }

    async fn prune(&mut self, threshold: DateTime<Utc>) -> Result<u64> {
        self.maintenance.prune(PruneTarget::Authorizations, threshold).await
    }

    async fn revoke(&mut self, filter: &EntityFilter) -> Result<u64> {
        self.maintenance.revoke::<Authorization>(filter).await
    }

    async fn revoke_by_application_id(&mut self, application_id: &str) -> Result<u64> {
        require_non_blank("application_id", application_id)?;
        self.revoke(&EntityFilter::builder().application_id(application_id).build()).await
    }

    async fn revoke_by_subject(&mut self, subject: &str) -> Result<u64> {
        require_non_blank("subject", subject)?;
        self.revoke(&EntityFilter::builder().subject(subject).build()).await
    }

    #[tracing::instrument(skip(self, authorization), fields(id = ?authorization.id))]
    async fn update(&mut self, authorization: &mut Authorization) -> Result<()> {
        require_non_blank("application_id", &authorization.application_id)?;
        let id = loaded_id(&self.session, &*authorization)?;
        require_change_vector(&self.session)?;

        self.session.store(authorization).await?;
        commit(&mut self.session, "update_authorization", &id).await
    }
}
