use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use identity_docstore::{Document, DocumentSession, DocumentStore, Query, document_id};

use super::{
    EntityStream, commit, loaded_id, page, property_change, require_change_vector, require_collection,
    stream,
};
use crate::{
    config::IdentityStoreConfig,
    error::{IdentityStoreError, Result, require_non_blank},
    maintenance::{BulkMaintenance, EntityFilter, PruneTarget},
    models::Token,
};

/// Persistence contract for [`Token`]s.
///
/// A token's reference id is woven into its document id, which makes it
/// unique without a reservation. Writes use change-vector concurrency.
#[async_trait]
pub trait TokenStore: Send {
    /// Counts every token.
    async fn count(&mut self) -> Result<u64>;

    /// Counts the matches of `query`, which must target tokens.
    async fn count_matching(&mut self, query: &Query) -> Result<u64>;

    /// Persists a new token, tagging it with its expiration date.
    async fn create(&mut self, token: &mut Token) -> Result<()>;

    /// Deletes the token, conditioned on the version this session loaded.
    async fn delete(&mut self, token: &Token) -> Result<()>;

    /// Streams the tokens issued for a subject and client, optionally
    /// narrowed by status and type.
    fn find(
        &self,
        subject: &str,
        client: &str,
        status: Option<&str>,
        kind: Option<&str>,
    ) -> Result<EntityStream<Token>>;

    /// Streams the tokens of an application.
    fn find_by_application_id(&self, application_id: &str) -> Result<EntityStream<Token>>;

    /// Streams the tokens derived from an authorization.
    fn find_by_authorization_id(&self, authorization_id: &str) -> Result<EntityStream<Token>>;

    /// Loads a token by id.
    async fn find_by_id(&mut self, id: &str) -> Result<Option<Token>>;

    /// Finds the token with this reference id.
    async fn find_by_reference_id(&mut self, reference_id: &str) -> Result<Option<Token>>;

    /// Streams the tokens issued for a subject.
    fn find_by_subject(&self, subject: &str) -> Result<EntityStream<Token>>;

    /// Streams a page of tokens in id order.
    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Token>;

    /// Deletes tokens created before `threshold` that are expired, spent, or
    /// whose authorization is no longer valid. The count is advisory.
    async fn prune(&mut self, threshold: DateTime<Utc>) -> Result<u64>;

    /// Revokes every token matching `filter`. The count is advisory.
    async fn revoke(&mut self, filter: &EntityFilter) -> Result<u64>;

    /// Revokes every token of an application.
    async fn revoke_by_application_id(&mut self, application_id: &str) -> Result<u64>;

    /// Revokes every token derived from an authorization.
    async fn revoke_by_authorization_id(&mut self, authorization_id: &str) -> Result<u64>;

    /// Revokes every token issued for a subject.
    async fn revoke_by_subject(&mut self, subject: &str) -> Result<u64>;

    /// Writes back a loaded token. The reference id cannot change.
    async fn update(&mut self, token: &mut Token) -> Result<()>;
}

/// [`TokenStore`] over a [`DocumentSession`].
pub struct DocumentTokenStore<S: DocumentStore> {
    session: DocumentSession<S>,
    maintenance: BulkMaintenance<S>,
}

impl<S: DocumentStore> DocumentTokenStore<S> {
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

    fn where_eq(&self, field: &'static str, value: &str) -> Result<EntityStream<Token>> {
        require_non_blank(field, value)?;
        Ok(stream(&self.session, Query::collection(Token::COLLECTION).where_eq(field, value)))
    }

    fn stage_expiration(&mut self, id: &str, token: &Token) -> Result<()> {
        if let Some(expires_at) = token.expiration_date {
            self.session.set_expiration(id, expires_at)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DocumentStore> TokenStore for DocumentTokenStore<S> {
    async fn count(&mut self) -> Result<u64> {
        Ok(self.session.count(&Query::collection(Token::COLLECTION)).await?)
    }

    async fn count_matching(&mut self, query: &Query) -> Result<u64> {
        require_collection::<Token>(query)?;
        Ok(self.session.count(query).await?)
    }

    #[tracing::instrument(skip(self, token), fields(reference = ?token.reference()))]
    async fn create(&mut self, token: &mut Token) -> Result<()> {
        require_change_vector(&self.session)?;

        let reference_id = token.reference().map(|reference| document_id(Token::ID_PREFIX, reference));
        if let Some(id) = reference_id {
            if self.session.exists(&id).await? {
                tracing::info!(%id, "reference id already in use");
                return Err(IdentityStoreError::Duplicate { id });
            }
            token.id = Some(id);
        }

        let id = self.session.store_new(token).await?;
        self.stage_expiration(&id, token)?;
        commit(&mut self.session, "create_token", &id).await
    }

    #[tracing::instrument(skip(self, token), fields(id = ?token.id))]
    async fn delete(&mut self, token: &Token) -> Result<()> {
        let id = loaded_id(&self.session, token)?;
        require_change_vector(&self.session)?;

        self.session.delete(&id);
        commit(&mut self.session, "delete_token", &id).await
    }

    fn find(
        &self,
        subject: &str,
        client: &str,
        status: Option<&str>,
        kind: Option<&str>,
    ) -> Result<EntityStream<Token>> {
        require_non_blank("subject", subject)?;
        require_non_blank("client", client)?;

        let filter = EntityFilter::builder()
            .subject(subject)
            .application_id(client)
            .maybe_status(status)
            .maybe_kind(kind)
            .build();
        Ok(stream(&self.session, filter.to_query(Token::COLLECTION)))
    }

    fn find_by_application_id(&self, application_id: &str) -> Result<EntityStream<Token>> {
        self.where_eq("application_id", application_id)
    }

    fn find_by_authorization_id(&self, authorization_id: &str) -> Result<EntityStream<Token>> {
        self.where_eq("authorization_id", authorization_id)
    }

    async fn find_by_id(&mut self, id: &str) -> Result<Option<Token>> {
        require_non_blank("id", id)?;
        Ok(self.session.load(id).await?)
    }

    async fn find_by_reference_id(&mut self, reference_id: &str) -> Result<Option<Token>> {
        require_non_blank("reference_id", reference_id)?;
        let query = Query::collection(Token::COLLECTION).where_eq("reference_id", reference_id);
        Ok(self.session.first(query).await?)
    }

    fn find_by_subject(&self, subject: &str) -> Result<EntityStream<Token>> {
        self.where_eq("subject", subject)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Token> {
        stream(&self.session, page::<Token>(count, offset))
    }

    async fn prune(&mut self, threshold: DateTime<Utc>) -> Result<u64> {
        self.maintenance.prune(PruneTarget::Tokens, threshold).await
    }

    async fn revoke(&mut self, filter: &EntityFilter) -> Result<u64> {
        self.maintenance.revoke::<Token>(filter).await
    }

    async fn revoke_by_application_id(&mut self, application_id: &str) -> Result<u64> {
        require_non_blank("application_id", application_id)?;
        self.revoke(&EntityFilter::builder().application_id(application_id).build()).await
    }

    async fn revoke_by_authorization_id(&mut self, authorization_id: &str) -> Result<u64> {
        require_non_blank("authorization_id", authorization_id)?;
        self.revoke(&EntityFilter::builder().authorization_id(authorization_id).build()).await
    }

    async fn revoke_by_subject(&mut self, subject: &str) -> Result<u64> {
        require_non_blank("subject", subject)?;
        self.revoke(&EntityFilter::builder().subject(subject).build()).await
    }

    #[tracing::instrument(skip(self, token), fields(id = ?token.id))]
    async fn update(&mut self, token: &mut Token) -> Result<()> {
        let id = loaded_id(&self.session, &*token)?;
        require_change_vector(&self.session)?;

        if let Some(change) = property_change(&self.session, &id, &*token, |t| t.reference_id.clone())? {
            tracing::warn!(%id, old = ?change.old, new = ?change.new, "attempt to change reference id");
            return Err(IdentityStoreError::ImmutableFieldChanged { id, field: "reference_id" });
        }

        self.session.store(token).await?;
        self.stage_expiration(&id, token)?;
        commit(&mut self.session, "update_token", &id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use futures::TryStreamExt;
    use identity_docstore::{ConcurrencyMode, MemoryDocumentStore};

    use super::*;
    use crate::{
        indexes::deploy_indexes,
        models::{Authorization, statuses},
    };

    fn open(store: &MemoryDocumentStore) -> DocumentTokenStore<MemoryDocumentStore> {
        DocumentTokenStore::new(DocumentSession::new(store.clone()), Arc::new(IdentityStoreConfig::default()))
    }

    fn access_token(application_id: &str, subject: &str) -> Token {
        Token::builder()
            .application_id(application_id)
            .subject(subject)
            .status(statuses::VALID)
            .token_type("access_token")
            .creation_date(Utc::now())
            .build()
    }

    async fn create(store: &MemoryDocumentStore, token: Token) -> Token {
        let mut token = token;
        open(store).create(&mut token).await.unwrap();
        token
    }

    #[tokio::test]
    async fn test_reference_id_becomes_document_id() {
        let store = MemoryDocumentStore::new();
        let mut token = access_token("applications/1-A", "alice");
        token.reference_id = Some("r1".into());
        let token = create(&store, token).await;
        assert_eq!(token.id.as_deref(), Some("tokens/r1"));

        let found = open(&store).find_by_reference_id("r1").await.unwrap().unwrap();
        assert_eq!(found.id.as_deref(), Some("tokens/r1"));
    }

    #[tokio::test]
    async fn test_duplicate_reference_id_is_rejected_before_write() {
        let store = MemoryDocumentStore::new();
        let mut first = access_token("applications/1-A", "alice");
        first.reference_id = Some("r1".into());
        create(&store, first).await;

        let mut second = access_token("applications/2-A", "bob");
        second.reference_id = Some("r1".into());
        let err = open(&store).create(&mut second).await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::Duplicate { ref id } if id == "tokens/r1"));

        let kept = open(&store).find_by_id("tokens/r1").await.unwrap().unwrap();
        assert_eq!(kept.subject.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_tokens_without_reference_never_collide() {
        let store = MemoryDocumentStore::new();
        let mut tokens = open(&store);
        for _ in 0..25 {
            let mut token = access_token("applications/1-A", "alice");
            tokens.create(&mut token).await.unwrap();
        }
        assert_eq!(tokens.count().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_create_rejects_atomic_claim_session() {
        let store = MemoryDocumentStore::new();
        let mut tokens = DocumentTokenStore::new(
            DocumentSession::with_mode(store.clone(), ConcurrencyMode::AtomicClaim),
            Arc::new(IdentityStoreConfig::default()),
        );
        let mut token = access_token("applications/1-A", "alice");
        assert!(matches!(
            tokens.create(&mut token).await,
            Err(IdentityStoreError::ConcurrencyModeRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_rejects_reference_change() {
        let store = MemoryDocumentStore::new();
        let mut token = access_token("applications/1-A", "alice");
        token.reference_id = Some("r1".into());
        create(&store, token).await;

        let mut tokens = open(&store);
        let mut loaded = tokens.find_by_id("tokens/r1").await.unwrap().unwrap();
        loaded.reference_id = Some("r2".into());
        let err = tokens.update(&mut loaded).await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::ImmutableFieldChanged { field: "reference_id", .. }));
        assert!(!tokens.session().has_changes());
    }

    #[tokio::test]
    async fn test_update_in_two_sessions_conflicts() {
        let store = MemoryDocumentStore::new();
        let id = create(&store, access_token("applications/1-A", "alice")).await.id.unwrap();

        let mut first = open(&store);
        let mut second = open(&store);
        let mut a = first.find_by_id(&id).await.unwrap().unwrap();
        let mut b = second.find_by_id(&id).await.unwrap().unwrap();

        a.status = Some(statuses::REDEEMED.into());
        first.update(&mut a).await.unwrap();
        b.status = Some(statuses::REVOKED.into());
        assert!(matches!(second.update(&mut b).await, Err(IdentityStoreError::Concurrency { .. })));
    }

    #[tokio::test]
    async fn test_delete_of_stale_copy_conflicts() {
        let store = MemoryDocumentStore::new();
        let token = create(&store, access_token("applications/1-A", "alice")).await;
        let id = token.id.clone().unwrap();
        let stale = token.clone();

        let mut writer = open(&store);
        let mut fresh = writer.find_by_id(&id).await.unwrap().unwrap();
        fresh.status = Some(statuses::REDEEMED.into());
        writer.update(&mut fresh).await.unwrap();

        let err = open(&store).delete(&stale).await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::NotLoaded { .. }), "got {err:?}");

        let mut deleter = open(&store);
        let _ = deleter.find_by_id(&id).await.unwrap().unwrap();
        let mut other = open(&store);
        let mut newer = other.find_by_id(&id).await.unwrap().unwrap();
        newer.status = Some(statuses::REVOKED.into());
        other.update(&mut newer).await.unwrap();
        assert!(deleter.delete(&stale).await.unwrap_err().is_concurrency());

        let kept = open(&store).find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(kept.status.as_deref(), Some(statuses::REVOKED));
        other.delete(&newer).await.unwrap();
        assert_eq!(store.collection_len(Token::COLLECTION), 0);
    }

    #[tokio::test]
    async fn test_generated_ids_skip_reference_ids_of_the_same_shape() {
        let store = MemoryDocumentStore::new();
        let mut referenced = access_token("applications/1-A", "alice");
        referenced.reference_id = Some("1-A".into());
        let referenced = create(&store, referenced).await;
        assert_eq!(referenced.id.as_deref(), Some("tokens/1-A"));

        let mut tokens = open(&store);
        for _ in 0..3 {
            let mut plain = access_token("applications/1-A", "alice");
            tokens.create(&mut plain).await.unwrap();
            assert_ne!(plain.id.as_deref(), Some("tokens/1-A"));
        }
        assert_eq!(tokens.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_expiration_is_store_managed() {
        let store = MemoryDocumentStore::new();
        let mut token = access_token("applications/1-A", "alice");
        token.expiration_date = Some(Utc::now() - ChronoDuration::minutes(1));
        let id = create(&store, token).await.id.unwrap();

        assert!(open(&store).find_by_id(&id).await.unwrap().is_some());
        assert_eq!(store.purge_expired(Utc::now()), 1);
        assert!(open(&store).find_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_by_application_leaves_others() {
        let store = MemoryDocumentStore::new();
        for _ in 0..3 {
            create(&store, access_token("applications/1-A", "alice")).await;
        }
        create(&store, access_token("applications/2-A", "alice")).await;

        let mut tokens = open(&store);
        assert_eq!(tokens.revoke_by_application_id("applications/1-A").await.unwrap(), 3);

        let other: Vec<Token> =
            tokens.find_by_application_id("applications/2-A").unwrap().try_collect().await.unwrap();
        assert_eq!(other[0].status.as_deref(), Some(statuses::VALID));
        let revoked: Vec<Token> = tokens
            .find("alice", "applications/1-A", Some(statuses::REVOKED), None)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(revoked.len(), 3);
    }

    #[tokio::test]
    async fn test_revoke_by_authorization() {
        let store = MemoryDocumentStore::new();
        let mut linked = access_token("applications/1-A", "alice");
        linked.authorization_id = Some("authorizations/1-A".into());
        create(&store, linked).await;
        create(&store, access_token("applications/1-A", "alice")).await;

        let mut tokens = open(&store);
        assert_eq!(tokens.revoke_by_authorization_id("authorizations/1-A").await.unwrap(), 1);
        assert!(tokens.revoke_by_authorization_id("").await.is_err());
    }

    #[tokio::test]
    async fn test_prune_spent_and_orphaned_tokens() {
        let store = MemoryDocumentStore::new();
        deploy_indexes(&store).await.unwrap();
        let old = Utc::now() - ChronoDuration::days(40);

        let mut session = DocumentSession::new(store.clone());
        let mut authorization = Authorization::builder()
            .application_id("applications/1-A")
            .status(statuses::VALID)
            .build();
        let authorization_id = session.store_new(&mut authorization).await.unwrap();
        session.save_changes().await.unwrap();

        let mut live = access_token("applications/1-A", "alice");
        live.creation_date = Some(old);
        live.authorization_id = Some(authorization_id.clone());
        live.expiration_date = Some(Utc::now() + ChronoDuration::days(1));
        let live = create(&store, live).await;

        let mut redeemed = live.clone();
        redeemed.id = None;
        redeemed.status = Some(statuses::REDEEMED.into());
        let redeemed = create(&store, redeemed).await;

        let mut orphan = live.clone();
        orphan.id = None;
        orphan.authorization_id = None;
        let orphan = create(&store, orphan).await;

        let mut tokens = open(&store);
        assert_eq!(tokens.prune(Utc::now() - ChronoDuration::days(14)).await.unwrap(), 2);
        assert!(tokens.find_by_id(live.id.as_deref().unwrap()).await.unwrap().is_some());
        assert!(tokens.find_by_id(redeemed.id.as_deref().unwrap()).await.unwrap().is_none());
        assert!(tokens.find_by_id(orphan.id.as_deref().unwrap()).await.unwrap().is_none());
    }
}
