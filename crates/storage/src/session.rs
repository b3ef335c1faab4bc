//! Unit-of-work sessions.
//!
//! A [`DocumentSession`] buffers staged writes and tracks every document it
//! has loaded, together with the change vector and atomic guard observed at
//! load time. [`save_changes`](DocumentSession::save_changes) turns the staged
//! writes into one [`CommitBatch`] and commits it under the session's
//! [`ConcurrencyMode`]:
//!
//! - **ChangeVector**: a write to a tracked document carries the observed change vector; a write
//!   staged through [`store_new`](DocumentSession::store_new) requires the id to be free.
//! - **AtomicClaim**: every write carries the observed guard, and a write to an untracked document
//!   requires neither the document nor its guard to exist.
//!
//! Sessions take `&mut self` for every operation. Concurrent callers must open
//! separate sessions.
//!
//! # Example
//!
//! ```
//! use identity_docstore::{DocumentSession, MemoryDocumentStore};
//! # use identity_docstore::Document;
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct Note { #[serde(skip)] id: Option<String>, text: String }
//! # impl Document for Note {
//! #     const COLLECTION: &'static str = "Notes";
//! #     const ID_PREFIX: &'static str = "notes";
//! #     fn id(&self) -> Option<&str> { self.id.as_deref() }
//! #     fn set_id(&mut self, id: String) { self.id = Some(id); }
//! # }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryDocumentStore::new();
//!
//! let mut session = DocumentSession::new(store.clone());
//! let mut note = Note { id: None, text: "hello".into() };
//! let id = session.store(&mut note).await.unwrap();
//! session.save_changes().await.unwrap();
//!
//! let mut reader = DocumentSession::new(store);
//! let loaded: Note = reader.load(&id).await.unwrap().unwrap();
//! assert_eq!(loaded.text, "hello");
//! # });
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use crate::{
    backend::DocumentStore,
    document::{Document, from_body, to_body},
    error::{StorageError, StorageResult},
    query::Query,
    transaction::{Command, CommitBatch, ConcurrencyMode, GuardExpectation, WriteCondition},
    types::{ChangeVector, GuardIndex, StoredDocument},
};

/// What the session last observed for a document.
#[derive(Debug, Clone)]
struct TrackedDocument {
    collection: String,
    change_vector: ChangeVector,
    guard: Option<GuardIndex>,
    body: Value,
}

#[derive(Debug, Clone)]
enum Staged {
    Put {
        collection: String,
        body: Value,
        must_not_exist: bool,
        expires_at: Option<DateTime<Utc>>,
    },
    Delete,
}

/// A short-lived unit of work over a [`DocumentStore`].
pub struct DocumentSession<S: DocumentStore> {
    store: S,
    mode: ConcurrencyMode,
    tracked: HashMap<String, TrackedDocument>,
    staged: BTreeMap<String, Staged>,
}

impl<S: DocumentStore> DocumentSession<S> {
    /// Opens a session in [`ConcurrencyMode::ChangeVector`].
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_mode(store, ConcurrencyMode::ChangeVector)
    }

    /// Opens a session in the given mode.
    #[must_use]
    pub fn with_mode(store: S, mode: ConcurrencyMode) -> Self {
        Self { store, mode, tracked: HashMap::new(), staged: BTreeMap::new() }
    }

    /// The store this session commits to.
    #[must_use]
    pub fn document_store(&self) -> &S {
        &self.store
    }

    /// Current concurrency mode.
    #[must_use]
    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Switches the concurrency mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidOperation`] when writes are already
    /// staged under a different mode.
    pub fn set_mode(&mut self, mode: ConcurrencyMode) -> StorageResult<()> {
        if mode == self.mode {
            return Ok(());
        }
        if !self.staged.is_empty() {
            return Err(StorageError::invalid_operation(format!(
                "cannot switch to {mode} mode with {} staged writes",
                self.staged.len()
            )));
        }
        tracing::debug!(from = %self.mode, to = %mode, "switching session concurrency mode");
        self.mode = mode;
        Ok(())
    }

    /// Returns `true` if writes are staged.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    fn track(&mut self, document: &StoredDocument) {
        self.tracked.insert(
            document.id.clone(),
            TrackedDocument {
                collection: document.metadata.collection.clone(),
                change_vector: document.metadata.change_vector,
                guard: document.metadata.guard,
                body: document.body.clone(),
            },
        );
    }

    fn check_collection<T: Document>(document: &StoredDocument) -> StorageResult<()> {
        if document.metadata.collection != T::COLLECTION {
            return Err(StorageError::invalid_operation(format!(
                "document {} belongs to {}, not {}",
                document.id,
                document.metadata.collection,
                T::COLLECTION
            )));
        }
        Ok(())
    }

    /// Loads a document, preferring this session's staged and tracked state.
    ///
    /// The document is tracked afterwards.
    pub async fn load<T: Document>(&mut self, id: &str) -> StorageResult<Option<T>> {
        match self.staged.get(id) {
            Some(Staged::Put { body, .. }) => return from_body(id, body.clone()).map(Some),
            Some(Staged::Delete) => return Ok(None),
            None => {},
        }
        if let Some(tracked) = self.tracked.get(id) {
            return from_body(id, tracked.body.clone()).map(Some);
        }

        match self.store.load(id).await? {
            Some(document) => {
                Self::check_collection::<T>(&document)?;
                self.track(&document);
                from_body(id, document.body).map(Some)
            },
            None => Ok(None),
        }
    }

    /// Returns `true` if the document exists, counting staged writes.
    pub async fn exists(&mut self, id: &str) -> StorageResult<bool> {
        match self.staged.get(id) {
            Some(Staged::Put { .. }) => Ok(true),
            Some(Staged::Delete) => Ok(false),
            None if self.tracked.contains_key(id) => Ok(true),
            None => self.store.exists(id).await,
        }
    }

    /// Returns `true` if this session loaded the document or staged it.
    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.tracked.contains_key(id) || matches!(self.staged.get(id), Some(Staged::Put { .. }))
    }

    /// Change vector observed for a tracked document.
    #[must_use]
    pub fn change_vector_for(&self, id: &str) -> Option<ChangeVector> {
        self.tracked.get(id).map(|tracked| tracked.change_vector)
    }

    /// The document as this session last observed it in the store, ignoring
    /// staged writes. Used to detect field changes before an update.
    pub fn original<T: Document>(&self, id: &str) -> StorageResult<Option<T>> {
        self.tracked.get(id).map(|tracked| from_body(id, tracked.body.clone())).transpose()
    }

    async fn assign_id<T: Document>(&self, document: &mut T) -> StorageResult<String> {
        if let Some(id) = document.id().filter(|id| !id.is_empty()) {
            return Ok(id.to_owned());
        }
        let id = self.store.generate_id(T::ID_PREFIX).await?;
        document.set_id(id.clone());
        Ok(id)
    }

    /// Stages a create-or-replace of `document`, assigning an id if needed.
    pub async fn store<T: Document>(&mut self, document: &mut T) -> StorageResult<String> {
        let id = self.assign_id(document).await?;
        let body = to_body(document)?;
        let (must_not_exist, expires_at) = match self.staged.get(&id) {
            Some(Staged::Put { must_not_exist, expires_at, .. }) => (*must_not_exist, *expires_at),
            _ => (false, None),
        };
        self.staged.insert(
            id.clone(),
            Staged::Put { collection: T::COLLECTION.to_owned(), body, must_not_exist, expires_at },
        );
        Ok(id)
    }

    /// Stages the creation of a document whose id must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NonUniqueObject`] when this session already
    /// tracks or stages a document under the same id. A document created
    /// concurrently elsewhere is detected at commit as a conflict.
    pub async fn store_new<T: Document>(&mut self, document: &mut T) -> StorageResult<String> {
        let id = self.assign_id(document).await?;
        if self.tracked.contains_key(&id) || matches!(self.staged.get(&id), Some(Staged::Put { .. }))
        {
            return Err(StorageError::non_unique_object(id));
        }
        let body = to_body(document)?;
        self.staged.insert(
            id.clone(),
            Staged::Put {
                collection: T::COLLECTION.to_owned(),
                body,
                must_not_exist: true,
                expires_at: None,
            },
        );
        Ok(id)
    }

    /// Attaches a store-managed expiry to a staged write.
    pub fn set_expiration(&mut self, id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        match self.staged.get_mut(id) {
            Some(Staged::Put { expires_at, .. }) => {
                *expires_at = Some(at);
                Ok(())
            },
            _ => Err(StorageError::invalid_operation(format!(
                "cannot set expiration on {id}: no staged write"
            ))),
        }
    }

    /// Stages the deletion of `id`.
    ///
    /// Deleting a document that was only staged in this session just drops
    /// the staged write.
    pub fn delete(&mut self, id: &str) {
        if !self.tracked.contains_key(id)
            && matches!(self.staged.get(id), Some(Staged::Put { must_not_exist: true, .. }))
        {
            self.staged.remove(id);
            return;
        }
        self.staged.insert(id.to_owned(), Staged::Delete);
    }

    /// Runs `query` and tracks every result.
    ///
    /// Results reflect staged writes to documents the query returned; new
    /// documents that are only staged are not returned.
    pub async fn query<T: Document>(&mut self, query: &Query) -> StorageResult<Vec<T>> {
        let documents = self.store.query(query).await?;
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            Self::check_collection::<T>(&document)?;
            match self.staged.get(&document.id) {
                Some(Staged::Delete) => continue,
                Some(Staged::Put { body, .. }) => {
                    results.push(from_body(&document.id, body.clone())?);
                },
                None => {
                    if !self.tracked.contains_key(&document.id) {
                        self.track(&document);
                    }
                    let body = self
                        .tracked
                        .get(&document.id)
                        .map_or_else(|| document.body.clone(), |t| t.body.clone());
                    results.push(from_body(&document.id, body)?);
                },
            }
        }
        Ok(results)
    }

    /// Runs `query` with `take(1)` and returns the first result.
    pub async fn first<T: Document>(&mut self, query: Query) -> StorageResult<Option<T>> {
        Ok(self.query(&query.take(1)).await?.into_iter().next())
    }

    /// Counts every match of `query` in the store.
    pub async fn count(&self, query: &Query) -> StorageResult<u64> {
        self.store.count(query).await
    }

    /// Lazily streams the matches of `query` without tracking them.
    pub fn stream<T: Document>(&self, query: Query) -> BoxStream<'static, StorageResult<T>> {
        self.store
            .stream(query)
            .map(|result| {
                result.and_then(|document| {
                    Self::check_collection::<T>(&document)?;
                    from_body(&document.id, document.body)
                })
            })
            .boxed()
    }

    fn command_for(&self, id: &str, staged: &Staged) -> Command {
        let tracked = self.tracked.get(id);
        let guard = match tracked {
            Some(t) => t.guard.map_or(GuardExpectation::Unguarded, GuardExpectation::Index),
            None => match staged {
                Staged::Put { .. } => GuardExpectation::Absent,
                Staged::Delete => GuardExpectation::Unguarded,
            },
        };
        let observed = tracked
            .map_or(WriteCondition::Unconditional, |t| WriteCondition::ChangeVector(t.change_vector));

        match staged {
            Staged::Put { collection, body, must_not_exist, expires_at } => Command::Put {
                id: id.to_owned(),
                collection: collection.clone(),
                body: body.clone(),
                condition: if *must_not_exist { WriteCondition::MustNotExist } else { observed },
                guard,
                expires_at: *expires_at,
            },
            Staged::Delete => Command::Delete { id: id.to_owned(), condition: observed, guard },
        }
    }

    /// Commits every staged write atomically.
    ///
    /// Staged writes are discarded whether or not the commit succeeds. On
    /// success the written documents are tracked with their new change
    /// vectors, so the session can keep working with them.
    #[tracing::instrument(skip(self), fields(mode = %self.mode, staged = self.staged.len()))]
    pub async fn save_changes(&mut self) -> StorageResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let staged = std::mem::take(&mut self.staged);
        let mut batch = CommitBatch::new(self.mode);
        for (id, write) in &staged {
            batch.push(self.command_for(id, write));
        }

        let receipt = self.store.commit(batch).await?;

        for result in receipt.results {
            match (staged.get(&result.id), result.change_vector) {
                (Some(Staged::Put { collection, body, .. }), Some(change_vector)) => {
                    let guard = match self.mode {
                        ConcurrencyMode::AtomicClaim => result.guard,
                        ConcurrencyMode::ChangeVector => {
                            self.tracked.get(&result.id).and_then(|t| t.guard)
                        },
                    };
                    self.tracked.insert(
                        result.id,
                        TrackedDocument {
                            collection: collection.clone(),
                            change_vector,
                            guard,
                            body: body.clone(),
                        },
                    );
                },
                _ => {
                    self.tracked.remove(&result.id);
                },
            }
        }
        Ok(())
    }

    /// Collection of a tracked document.
    #[must_use]
    pub fn tracked_collection(&self, id: &str) -> Option<&str> {
        self.tracked.get(id).map(|tracked| tracked.collection.as_str())
    }
}
