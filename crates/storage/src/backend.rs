//! Document store trait definition.
//!
//! This module defines the [`DocumentStore`] trait, the capability contract
//! the identity stores are built on. A store offers:
//!
//! - **Per-id atomicity**: every document id is unique, and a commit batch
//!   lands completely or not at all
//! - **Two concurrency disciplines**: change-vector checks or atomic guards
//!   (see [`ConcurrencyMode`](crate::ConcurrencyMode))
//! - **Queries**: ad-hoc filtered queries, counts and lazy streams
//! - **Bulk operations**: server-side patch/delete-by-query with pollable
//!   [`Operation`] handles
//! - **Materialized indexes**: projections kept in plain collections
//! - **Id generation**: `{prefix}/{n}-A` ids for new documents
//!
//! What a store does *not* offer is uniqueness on anything but the id.
//! Everything else is built on top of that guarantee.
//!
//! # Implementing a Backend
//!
//! 1. Implement the required methods of [`DocumentStore`]
//! 2. Validate every command of a batch before applying any
//! 3. Map backend-specific errors to [`StorageError`](crate::StorageError)
//!
//! See [`MemoryDocumentStore`](crate::MemoryDocumentStore) for a reference
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{
    error::StorageResult,
    index::IndexDefinition,
    operation::{BulkOperation, Operation},
    query::Query,
    transaction::{CommitBatch, CommitReceipt},
    types::StoredDocument,
};

/// Number of documents fetched per round-trip by [`DocumentStore::stream`].
pub const STREAM_PAGE_SIZE: usize = 128;

/// Abstract document store.
///
/// Stores are cheaply cloneable handles; all clones share the same data.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`load`](DocumentStore::load) | Fetch one document by id |
/// | [`exists`](DocumentStore::exists) | Check an id without fetching the body |
/// | [`query`](DocumentStore::query) | Run a filtered, paged query |
/// | [`count`](DocumentStore::count) | Count query matches, ignoring paging |
/// | [`stream`](DocumentStore::stream) | Lazily page through query matches |
/// | [`commit`](DocumentStore::commit) | Apply a batch atomically |
/// | [`send`](DocumentStore::send) | Start a bulk operation |
/// | [`deploy_index`](DocumentStore::deploy_index) | Register a materialized projection |
/// | [`generate_id`](DocumentStore::generate_id) | Allocate an id for a new document |
#[async_trait]
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Retrieves a document by id.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn load(&self, id: &str) -> StorageResult<Option<StoredDocument>>;

    /// Returns `true` if a document with this id exists.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Returns the matches of `query` in id order, honouring skip/take.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn query(&self, query: &Query) -> StorageResult<Vec<StoredDocument>>;

    /// Counts every match of `query`, ignoring skip/take.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn count(&self, query: &Query) -> StorageResult<u64>;

    /// Applies every command of `batch` or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`](crate::StorageError::Conflict)
    /// naming the first command whose condition or guard failed.
    #[must_use = "commits may fail with a conflict and errors must be handled"]
    async fn commit(&self, batch: CommitBatch) -> StorageResult<CommitReceipt>;

    /// Starts a server-side bulk operation and returns its handle.
    ///
    /// The returned handle resolves independently of the caller; the
    /// operation continues if the handle is dropped.
    #[must_use = "the operation handle is the only way to observe the result"]
    async fn send(&self, operation: BulkOperation) -> StorageResult<Operation>;

    /// Registers a projection and materializes it immediately.
    ///
    /// Deploying an index with an existing name replaces the old definition.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn deploy_index(&self, index: Arc<dyn IndexDefinition>) -> StorageResult<()>;

    /// Allocates a fresh id of the form `{prefix}/{n}-A`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn generate_id(&self, prefix: &str) -> StorageResult<String>;

    /// Lazily streams the matches of `query`.
    ///
    /// Pages of [`STREAM_PAGE_SIZE`] documents are fetched on demand, so
    /// dropping the stream stops further round-trips. Paging applied to
    /// `query` itself is respected. The stream ends after the first error.
    fn stream(&self, query: Query) -> BoxStream<'static, StorageResult<StoredDocument>> {
        let store = self.clone();
        let limit = query.take_count();
        let start = query.skip_count();
        let base = query.unpaged();

        struct Cursor<S> {
            store: S,
            base: Query,
            offset: usize,
            remaining: Option<usize>,
            done: bool,
        }

        let cursor = Cursor { store, base, offset: start, remaining: limit, done: false };

        stream::unfold(cursor, |mut cursor| async move {
            if cursor.done || cursor.remaining == Some(0) {
                return None;
            }
            let page_size = cursor.remaining.map_or(STREAM_PAGE_SIZE, |r| r.min(STREAM_PAGE_SIZE));
            let page = cursor.base.clone().skip(cursor.offset).take(page_size);
            match cursor.store.query(&page).await {
                Ok(documents) => {
                    if documents.len() < page_size {
                        cursor.done = true;
                    }
                    cursor.offset += documents.len();
                    if let Some(remaining) = cursor.remaining.as_mut() {
                        *remaining = remaining.saturating_sub(documents.len());
                    }
                    Some((stream::iter(documents.into_iter().map(Ok)).left_stream(), cursor))
                },
                Err(err) => {
                    cursor.done = true;
                    Some((stream::once(async move { Err(err) }).right_stream(), cursor))
                },
            }
        })
        .flatten()
        .boxed()
    }
}
