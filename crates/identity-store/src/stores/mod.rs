//! Entity stores.
//!
//! Each store owns one [`DocumentSession`] and turns entity operations into
//! staged writes plus one commit. The concurrency discipline depends on the
//! kind:
//!
//! | Store | Mode | Why |
//! |-------|------|-----|
//! | [`DocumentApplicationStore`] | atomic claim | owns a unique client id reservation |
//! | [`DocumentScopeStore`] | atomic claim | owns a unique name reservation |
//! | [`DocumentAuthorizationStore`] | change vector | target of bulk delete, which leaves guards behind |
//! | [`DocumentTokenStore`] | change vector | target of bulk delete, which leaves guards behind |
//!
//! Streams returned by `find_*` and `list` are lazy and untracked: load an
//! entity by id before updating or deleting it.

mod application;
mod authorization;
mod scope;
mod token;

pub use application::{ApplicationStore, DocumentApplicationStore};
pub use authorization::{AuthorizationStore, DocumentAuthorizationStore};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use identity_docstore::{ConcurrencyMode, Document, DocumentSession, DocumentStore, Query};
pub use scope::{DocumentScopeStore, ScopeStore};
pub use token::{DocumentTokenStore, TokenStore};

use crate::error::{IdentityStoreError, Result};

/// Lazily produced entities. Dropping the stream stops further reads.
pub type EntityStream<T> = BoxStream<'static, Result<T>>;

/// Old and new value of a field that changed since the entity was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange<V> {
    /// Value the session loaded.
    pub old: V,
    /// Value about to be written.
    pub new: V,
}

/// Compares `select(entity)` with the value this session loaded.
///
/// Returns `None` when the field is unchanged or the entity is not tracked.
pub(crate) fn property_change<S, T, V>(
    session: &DocumentSession<S>,
    id: &str,
    entity: &T,
    select: impl Fn(&T) -> V,
) -> Result<Option<PropertyChange<V>>>
where
    S: DocumentStore,
    T: Document,
    V: PartialEq,
{
    let Some(original) = session.original::<T>(id)? else {
        return Ok(None);
    };
    let old = select(&original);
    let new = select(entity);
    Ok((old != new).then_some(PropertyChange { old, new }))
}

/// Returns the entity id, failing with `NotLoaded` unless the session
/// tracks it.
pub(crate) fn loaded_id<S: DocumentStore, T: Document>(
    session: &DocumentSession<S>,
    entity: &T,
) -> Result<String> {
    match entity.id().filter(|id| !id.is_empty()) {
        Some(id) if session.is_loaded(id) => Ok(id.to_owned()),
        id => Err(IdentityStoreError::NotLoaded { id: id.unwrap_or_default().to_owned() }),
    }
}

/// Switches `session` to atomic-claim mode.
pub(crate) fn enter_atomic_claim<S: DocumentStore>(
    session: &mut DocumentSession<S>,
    operation: &'static str,
) -> Result<()> {
    if session.mode() != ConcurrencyMode::AtomicClaim {
        tracing::debug!(operation, "setting atomic-claim mode");
    }
    session.set_mode(ConcurrencyMode::AtomicClaim)?;
    Ok(())
}

/// Rejects atomic-claim sessions for kinds that are bulk-deleted.
pub(crate) fn require_change_vector<S: DocumentStore>(session: &DocumentSession<S>) -> Result<()> {
    match session.mode() {
        ConcurrencyMode::ChangeVector => Ok(()),
        actual => Err(IdentityStoreError::ConcurrencyModeRequired {
            required: ConcurrencyMode::ChangeVector,
            actual,
        }),
    }
}

/// Rejects queries over another collection.
pub(crate) fn require_collection<T: Document>(query: &Query) -> Result<()> {
    if query.collection_name() != T::COLLECTION {
        return Err(IdentityStoreError::invalid_argument(
            "query",
            format!("expected a query over {}, got {}", T::COLLECTION, query.collection_name()),
        ));
    }
    Ok(())
}

/// A page of the whole collection.
pub(crate) fn page<T: Document>(count: Option<usize>, offset: Option<usize>) -> Query {
    let query = Query::collection(T::COLLECTION).skip(offset.unwrap_or(0));
    match count {
        Some(count) => query.take(count),
        None => query,
    }
}

/// Streams `query` through the session without tracking.
pub(crate) fn stream<S: DocumentStore, T: Document>(
    session: &DocumentSession<S>,
    query: Query,
) -> EntityStream<T> {
    session.stream::<T>(query).map_err(IdentityStoreError::from).boxed()
}

/// Commits the session, logging failures with the operation that staged
/// them.
pub(crate) async fn commit<S: DocumentStore>(
    session: &mut DocumentSession<S>,
    operation: &'static str,
    id: &str,
) -> Result<()> {
    match session.save_changes().await {
        Ok(()) => Ok(()),
        Err(err) => {
            let err = IdentityStoreError::from(err);
            if !err.is_concurrency() {
                tracing::error!(operation, id, error = %err, "commit failed");
            }
            Err(err)
        },
    }
}
