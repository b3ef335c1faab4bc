use std::sync::Arc;

use async_trait::async_trait;
use identity_docstore::{Document, DocumentSession, DocumentStore, Query};

use super::{
    EntityStream, commit, enter_atomic_claim, loaded_id, page, property_change, require_collection,
    stream,
};
use crate::{
    config::IdentityStoreConfig,
    error::{IdentityStoreError, Result, require_non_blank},
    models::Scope,
    reservation::{ReservationKeyDeriver, UniqueReservationCoordinator, UniqueReservationKind},
};

/// Persistence contract for [`Scope`]s. `name` is unique after
/// normalization.
#[async_trait]
pub trait ScopeStore: Send {
    /// Counts every scope.
    async fn count(&mut self) -> Result<u64>;

    /// Counts the matches of `query`, which must target scopes.
    async fn count_matching(&mut self, query: &Query) -> Result<u64>;

    /// Persists a new scope and reserves its name.
    async fn create(&mut self, scope: &mut Scope) -> Result<()>;

    /// Deletes a loaded scope and releases its name.
    async fn delete(&mut self, scope: &Scope) -> Result<()>;

    /// Loads a scope by id.
    async fn find_by_id(&mut self, id: &str) -> Result<Option<Scope>>;

    /// Finds the scope with this exact name.
    async fn find_by_name(&mut self, name: &str) -> Result<Option<Scope>>;

    /// Streams the scopes whose name is one of `names`.
    ///
    /// Fails before any read if a name is blank.
    fn find_by_names(&self, names: &[String]) -> Result<EntityStream<Scope>>;

    /// Streams scopes that grant access to `resource`.
    fn find_by_resource(&self, resource: &str) -> Result<EntityStream<Scope>>;

    /// Streams a page of scopes in id order.
    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Scope>;

    /// Writes back a loaded scope, moving its reservation if the name
    /// changed.
    async fn update(&mut self, scope: &mut Scope) -> Result<()>;
}

/// [`ScopeStore`] over a [`DocumentSession`].
pub struct DocumentScopeStore<S: DocumentStore> {
    session: DocumentSession<S>,
    deriver: ReservationKeyDeriver,
}

impl<S: DocumentStore> DocumentScopeStore<S> {
    /// Creates a store working through `session`.
    #[must_use]
    pub fn new(session: DocumentSession<S>, config: Arc<IdentityStoreConfig>) -> Self {
        Self { session, deriver: ReservationKeyDeriver::new(config) }
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
}

#[async_trait]
impl<S: DocumentStore> ScopeStore for DocumentScopeStore<S> {
    async fn count(&mut self) -> Result<u64> {
        Ok(self.session.count(&Query::collection(Scope::COLLECTION)).await?)
    }

    async fn count_matching(&mut self, query: &Query) -> Result<u64> {
        require_collection::<Scope>(query)?;
        Ok(self.session.count(query).await?)
    }

    #[tracing::instrument(skip(self, scope), fields(name = %scope.name))]
    async fn create(&mut self, scope: &mut Scope) -> Result<()> {
        require_non_blank("name", &scope.name)?;
        enter_atomic_claim(&mut self.session, "create_scope")?;

        let id = self.session.store_new(scope).await?;
        let mut coordinator = UniqueReservationCoordinator::new(
            &self.deriver,
            UniqueReservationKind::ScopeName,
            scope.name.as_str(),
        )?;
        if let Err(err) = coordinator.claim(&mut self.session, &id).await {
            self.session.delete(&id);
            return Err(err);
        }

        commit(&mut self.session, "create_scope", &id).await
    }

    #[tracing::instrument(skip(self, scope), fields(id = ?scope.id))]
    async fn delete(&mut self, scope: &Scope) -> Result<()> {
        let id = loaded_id(&self.session, scope)?;
        enter_atomic_claim(&mut self.session, "delete_scope")?;

        let name = self.session.original::<Scope>(&id)?.map_or_else(|| scope.name.clone(), |s| s.name);

        if name.trim().is_empty() {
            tracing::warn!(%id, "scope has no name; no reservation to release");
        } else {
            UniqueReservationCoordinator::new(&self.deriver, UniqueReservationKind::ScopeName, name)?
                .release(&mut self.session)
                .await?;
        }
        self.session.delete(&id);

        commit(&mut self.session, "delete_scope", &id).await
    }

    async fn find_by_id(&mut self, id: &str) -> Result<Option<Scope>> {
        require_non_blank("id", id)?;
        Ok(self.session.load(id).await?)
    }

    async fn find_by_name(&mut self, name: &str) -> Result<Option<Scope>> {
        require_non_blank("name", name)?;
        let query = Query::collection(Scope::COLLECTION).where_eq("name", name);
        Ok(self.session.first(query).await?)
    }

    fn find_by_names(&self, names: &[String]) -> Result<EntityStream<Scope>> {
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(IdentityStoreError::invalid_argument(
                "names",
                "scope names cannot be null or empty",
            ));
        }
        let query = Query::collection(Scope::COLLECTION).where_in("name", names.iter().cloned());
        Ok(stream(&self.session, query))
    }

    fn find_by_resource(&self, resource: &str) -> Result<EntityStream<Scope>> {
        require_non_blank("resource", resource)?;
        Ok(stream(&self.session, Query::collection(Scope::COLLECTION).where_contains("resources", resource)))
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Scope> {
        stream(&self.session, page::<Scope>(count, offset))
    }

    #[tracing::instrument(skip(self, scope), fields(id = ?scope.id))]
    async fn update(&mut self, scope: &mut Scope) -> Result<()> {
        require_non_blank("name", &scope.name)?;
        let id = loaded_id(&self.session, &*scope)?;
        enter_atomic_claim(&mut self.session, "update_scope")?;

        if let Some(change) = property_change(&self.session, &id, &*scope, |s| s.name.clone())? {
            tracing::debug!(old = %change.old, new = %change.new, "scope name changed");
            let mut coordinator = UniqueReservationCoordinator::new(
                &self.deriver,
                UniqueReservationKind::ScopeName,
                change.new.as_str(),
            )?;
            coordinator.rename(&mut self.session, Some(change.old.as_str()), &id).await?;
        }
        self.session.store(scope).await?;

        commit(&mut self.session, "update_scope", &id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use futures::TryStreamExt;
    use identity_docstore::{ConcurrencyMode, MemoryDocumentStore};

    use super::*;

    fn open(store: &MemoryDocumentStore) -> DocumentScopeStore<MemoryDocumentStore> {
        DocumentScopeStore::new(DocumentSession::new(store.clone()), Arc::new(IdentityStoreConfig::default()))
    }

    async fn create(store: &MemoryDocumentStore, name: &str, resources: &[&str]) -> Scope {
        let mut scope = Scope::builder()
            .name(name)
            .resources(resources.iter().map(|r| (*r).to_owned()).collect())
            .build();
        open(store).create(&mut scope).await.unwrap();
        scope
    }

    #[tokio::test]
    async fn test_create_switches_session_to_atomic_claim() {
        let store = MemoryDocumentStore::new();
        let mut scopes = open(&store);
        assert_eq!(scopes.session().mode(), ConcurrencyMode::ChangeVector);

        let mut scope = Scope::builder().name("openid").build();
        scopes.create(&mut scope).await.unwrap();
        assert_eq!(scopes.session().mode(), ConcurrencyMode::AtomicClaim);
        assert!(store.exists("uniques/scopename/openid").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_lifecycle() {
        let store = MemoryDocumentStore::new();
        let id = create(&store, "scope-1", &[]).await.id.unwrap();

        let mut dup = Scope::builder().name("scope-1").build();
        assert!(open(&store).create(&mut dup).await.unwrap_err().is_duplicate());

        let mut scopes = open(&store);
        let mut loaded = scopes.find_by_id(&id).await.unwrap().unwrap();
        loaded.name = "scope-1-updated".into();
        scopes.update(&mut loaded).await.unwrap();

        let mut again = Scope::builder().name("scope-1").build();
        open(&store).create(&mut again).await.unwrap();
        assert_eq!(store.collection_len(Scope::COLLECTION), 2);
    }

    #[tokio::test]
    async fn test_case_only_rename_keeps_reservation() {
        let store = MemoryDocumentStore::new();
        let id = create(&store, "profile", &[]).await.id.unwrap();

        let mut scopes = open(&store);
        let mut loaded = scopes.find_by_id(&id).await.unwrap().unwrap();
        loaded.name = "Profile".into();
        scopes.update(&mut loaded).await.unwrap();

        let reread = open(&store).find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(reread.name, "Profile");
        assert!(store.exists("uniques/scopename/profile").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_releases_name() {
        let store = MemoryDocumentStore::new();
        let id = create(&store, "email", &[]).await.id.unwrap();

        let mut scopes = open(&store);
        let loaded = scopes.find_by_id(&id).await.unwrap().unwrap();
        scopes.delete(&loaded).await.unwrap();
        assert!(!store.exists("uniques/scopename/email").await.unwrap());
        create(&store, "email", &[]).await;
    }

    #[tokio::test]
    async fn test_stale_delete_is_rejected() {
        let store = MemoryDocumentStore::new();
        let scope = create(&store, "email", &[]).await;
        let id = scope.id.clone().unwrap();

        let mut deleter = open(&store);
        let stale = deleter.find_by_id(&id).await.unwrap().unwrap();
        let mut writer = open(&store);
        let mut fresh = writer.find_by_id(&id).await.unwrap().unwrap();
        fresh.description = Some("Email address".into());
        writer.update(&mut fresh).await.unwrap();

        assert!(deleter.delete(&stale).await.unwrap_err().is_concurrency());
        assert!(matches!(
            open(&store).delete(&scope).await,
            Err(IdentityStoreError::NotLoaded { .. })
        ));
        assert_eq!(store.collection_len(Scope::COLLECTION), 1);
        assert!(store.exists("uniques/scopename/email").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_names_and_resource() {
        let store = MemoryDocumentStore::new();
        create(&store, "openid", &[]).await;
        create(&store, "api:read", &["resource-server"]).await;
        create(&store, "api:write", &["resource-server"]).await;
        let mut scopes = open(&store);

        let names = vec!["openid".to_owned(), "api:read".to_owned(), "missing".to_owned()];
        let found: Vec<Scope> = scopes.find_by_names(&names).unwrap().try_collect().await.unwrap();
        assert_eq!(found.len(), 2);

        let by_resource: Vec<Scope> =
            scopes.find_by_resource("resource-server").unwrap().try_collect().await.unwrap();
        assert_eq!(by_resource.len(), 2);

        assert_eq!(scopes.find_by_name("openid").await.unwrap().unwrap().name, "openid");
        assert_eq!(scopes.count().await.unwrap(), 3);
    }

    #[test]
    fn test_find_by_names_rejects_blank_name() {
        let store = MemoryDocumentStore::new();
        let scopes = open(&store);
        let names = vec!["openid".to_owned(), String::new()];
        assert!(matches!(
            scopes.find_by_names(&names),
            Err(IdentityStoreError::InvalidArgument { name: "names", .. })
        ));
    }
}
