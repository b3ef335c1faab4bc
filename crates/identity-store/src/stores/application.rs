use std::sync::Arc;

use async_trait::async_trait;
use identity_docstore::{Document, DocumentSession, DocumentStore, Query};

use super::{
    EntityStream, commit, enter_atomic_claim, loaded_id, page, property_change, require_collection,
    stream,
};
use crate::{
    config::IdentityStoreConfig,
    error::{Result, require_non_blank},
    models::Application,
    reservation::{ReservationKeyDeriver, UniqueReservationCoordinator, UniqueReservationKind},
};

/// Persistence contract for [`Application`]s.
///
/// `client_id` is unique after normalization. Creates and client id changes
/// claim the value through a reservation committed atomically with the
/// application itself.
#[async_trait]
pub trait ApplicationStore: Send {
    /// Counts every application.
    async fn count(&mut self) -> Result<u64>;

    /// Counts the matches of `query`, which must target applications.
    async fn count_matching(&mut self, query: &Query) -> Result<u64>;

    /// Persists a new application and reserves its client id.
    ///
    /// Assigns `application.id` if it is empty.
    async fn create(&mut self, application: &mut Application) -> Result<()>;

    /// Deletes a loaded application and releases its client id.
    ///
    /// The delete is conditioned on the version this session loaded.
    async fn delete(&mut self, application: &Application) -> Result<()>;

    /// Loads an application by id.
    async fn find_by_id(&mut self, id: &str) -> Result<Option<Application>>;

    /// Finds the application with this exact client id.
    async fn find_by_client_id(&mut self, client_id: &str) -> Result<Option<Application>>;

    /// Streams applications allowing `uri` as a redirect URI.
    fn find_by_redirect_uri(&self, uri: &str) -> Result<EntityStream<Application>>;

    /// Streams applications allowing `uri` as a post-logout redirect URI.
    fn find_by_post_logout_redirect_uri(&self, uri: &str) -> Result<EntityStream<Application>>;

    /// Streams a page of applications in id order.
    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Application>;

    /// Writes back a loaded application, moving its reservation if the
    /// client id changed.
    async fn update(&mut self, application: &mut Application) -> Result<()>;
}

/// [`ApplicationStore`] over a [`DocumentSession`].
///
/// Every write switches the session to atomic-claim mode.
pub struct DocumentApplicationStore<S: DocumentStore> {
    session: DocumentSession<S>,
    deriver: ReservationKeyDeriver,
}

impl<S: DocumentStore> DocumentApplicationStore<S> {
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

    fn containing(&self, field: &'static str, uri: &str) -> Result<EntityStream<Application>> {
        require_non_blank("uri", uri)?;
        Ok(stream(&self.session, Query::collection(Application::COLLECTION).where_contains(field, uri)))
    }
}

#[async_trait]
impl<S: DocumentStore> ApplicationStore for DocumentApplicationStore<S> {
    async fn count(&mut self) -> Result<u64> {
        Ok(self.session.count(&Query::collection(Application::COLLECTION)).await?)
    }

    async fn count_matching(&mut self, query: &Query) -> Result<u64> {
        require_collection::<Application>(query)?;
        Ok(self.session.count(query).await?)
    }

    #[tracing::instrument(skip(self, application), fields(client_id = %application.client_id))]
    async fn create(&mut self, application: &mut Application) -> Result<()> {
        require_non_blank("client_id", &application.client_id)?;
        enter_atomic_claim(&mut self.session, "create_application")?;

        let id = self.session.store_new(application).await?;
        let mut coordinator = UniqueReservationCoordinator::new(
            &self.deriver,
            UniqueReservationKind::ApplicationClientId,
            application.client_id.as_str(),
        )?;
        if let Err(err) = coordinator.claim(&mut self.session, &id).await {
            self.session.delete(&id);
            return Err(err);
        }

        commit(&mut self.session, "create_application", &id).await
    }

    #[tracing::instrument(skip(self, application), fields(id = ?application.id))]
    async fn delete(&mut self, application: &Application) -> Result<()> {
        let id = loaded_id(&self.session, application)?;
        enter_atomic_claim(&mut self.session, "delete_application")?;

        let client_id = self
            .session
            .original::<Application>(&id)?
            .map_or_else(|| application.client_id.clone(), |a| a.client_id);

        if client_id.trim().is_empty() {
            tracing::warn!(%id, "application has no client id; no reservation to release");
        } else {
            UniqueReservationCoordinator::new(
                &self.deriver,
                UniqueReservationKind::ApplicationClientId,
                client_id.as_str(),
            )?
            .release(&mut self.session)
            .await?;
        }
        self.session.delete(&id);

        commit(&mut self.session, "delete_application", &id).await
    }

    async fn find_by_id(&mut self, id: &str) -> Result<Option<Application>> {
        require_non_blank("id", id)?;
        Ok(self.session.load(id).await?)
    }

    async fn find_by_client_id(&mut self, client_id: &str) -> Result<Option<Application>> {
        require_non_blank("client_id", client_id)?;
        let query = Query::collection(Application::COLLECTION).where_eq("client_id", client_id);
        Ok(self.session.first(query).await?)
    }

    fn find_by_redirect_uri(&self, uri: &str) -> Result<EntityStream<Application>> {
        self.containing("redirect_uris", uri)
    }

    fn find_by_post_logout_redirect_uri(&self, uri: &str) -> Result<EntityStream<Application>> {
        self.containing("post_logout_redirect_uris", uri)
    }

    fn list(&self, count: Option<usize>, offset: Option<usize>) -> EntityStream<Application> {
        stream(&self.session, page::<Application>(count, offset))
    }

    #[tracing::instrument(skip(self, application), fields(id = ?application.id))]
    async fn update(&mut self, application: &mut Application) -> Result<()> {
        require_non_blank("client_id", &application.client_id)?;
        let id = loaded_id(&self.session, &*application)?;
        enter_atomic_claim(&mut self.session, "update_application")?;

        if let Some(change) =
            property_change(&self.session, &id, &*application, |a| a.client_id.clone())?
        {
            tracing::debug!(old = %change.old, new = %change.new, "client id changed");
            let mut coordinator = UniqueReservationCoordinator::new(
                &self.deriver,
                UniqueReservationKind::ApplicationClientId,
                change.new.as_str(),
            )?;
            coordinator.rename(&mut self.session, Some(change.old.as_str()), &id).await?;
        }
        self.session.store(application).await?;

        commit(&mut self.session, "update_application", &id).await
    }
}
