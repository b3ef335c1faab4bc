//! In-memory document store implementation.
//!
//! This module provides [`MemoryDocumentStore`], an in-memory implementation
//! of [`DocumentStore`] used by tests and local development.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Atomic batches**: every command is validated under the write lock before any is applied
//! - **Both concurrency modes**: change-vector conditions and atomic guards
//! - **Bulk operations**: run on spawned tasks, optionally delayed to simulate a slow server
//! - **Materialized indexes**: refreshed after every write that touches a source collection
//! - **Expiration**: an opt-in sweeper deletes documents whose expiry has passed
//!
//! # Example
//!
//! ```
//! use identity_docstore::{CommitBatch, ConcurrencyMode, DocumentStore, MemoryDocumentStore, WriteCondition};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryDocumentStore::new();
//!     let batch = CommitBatch::new(ConcurrencyMode::ChangeVector)
//!         .put("tokens/r1", "Tokens", json!({ "status": "valid" }), WriteCondition::MustNotExist);
//!     store.commit(batch).await.unwrap();
//!
//!     assert!(store.exists("tokens/r1").await.unwrap());
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Index refresh is synchronous, so projections never lag in this backend
//! - The expiration sweeper runs on an interval, so expiry is not precise

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::DocumentStore,
    document::document_id,
    error::{ConflictReason, StorageError, StorageResult},
    index::{IndexDefinition, IndexSource},
    metrics::StoreMetrics,
    operation::{BulkOperation, Operation, Patch},
    query::Query,
    transaction::{
        Command, CommandResult, CommitBatch, CommitReceipt, ConcurrencyMode, GuardExpectation,
        WriteCondition,
    },
    types::{ChangeVector, DocumentMetadata, GuardIndex, OperationId, StoredDocument},
};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the expiration sweeper exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Sending is a best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

/// Tuning knobs for [`MemoryDocumentStore`].
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct MemoryStoreOptions {
    /// Delay before a bulk operation starts applying. Lets tests observe
    /// in-flight operations and wait-budget timeouts.
    #[builder(default)]
    pub bulk_operation_delay: Duration,
    /// Interval of the expiration sweeper. `None` disables the sweeper;
    /// [`MemoryDocumentStore::purge_expired`] can still be called directly.
    pub expiration_sweep_interval: Option<Duration>,
}

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<String, StoredDocument>,
    guards: BTreeMap<String, GuardIndex>,
    indexes: Vec<Arc<dyn IndexDefinition>>,
    identities: HashMap<String, u64>,
    last_change: u64,
    last_guard: u64,
    last_operation: u64,
}

impl StoreState {
    fn next_change_vector(&mut self) -> ChangeVector {
        self.last_change += 1;
        ChangeVector::from(self.last_change)
    }

    fn next_guard(&mut self) -> GuardIndex {
        self.last_guard += 1;
        GuardIndex::from(self.last_guard)
    }

    fn matching_ids(&self, query: &Query) -> Vec<String> {
        self.documents
            .values()
            .filter(|doc| doc.metadata.collection == query.collection_name())
            .filter(|doc| query.matches(&doc.body))
            .map(|doc| doc.id.clone())
            .collect()
    }

    fn check_condition(&self, id: &str, condition: WriteCondition) -> StorageResult<()> {
        let current = self.documents.get(id);
        match condition {
            WriteCondition::Unconditional => Ok(()),
            WriteCondition::MustNotExist => match current {
                Some(_) => Err(StorageError::conflict(id, ConflictReason::AlreadyExists)),
                None => Ok(()),
            },
            WriteCondition::ChangeVector(expected) => match current {
                Some(doc) if doc.metadata.change_vector == expected => Ok(()),
                _ => Err(StorageError::conflict(id, ConflictReason::ChangeVectorMismatch)),
            },
        }
    }

    fn check_guard(&self, id: &str, expectation: GuardExpectation) -> StorageResult<()> {
        let guard = self.guards.get(id).copied();
        match expectation {
            GuardExpectation::Absent => {
                if self.documents.contains_key(id) || guard.is_some() {
                    return Err(StorageError::conflict(id, ConflictReason::AlreadyExists));
                }
                Ok(())
            },
            GuardExpectation::Index(expected) if guard == Some(expected) => Ok(()),
            GuardExpectation::Unguarded if guard.is_none() => Ok(()),
            _ => Err(StorageError::conflict(id, ConflictReason::GuardMismatch)),
        }
    }

    fn validate(&self, batch: &CommitBatch) -> StorageResult<()> {
        for command in &batch.commands {
            match (batch.mode, command) {
                (ConcurrencyMode::ChangeVector, Command::Put { id, condition, .. })
                | (ConcurrencyMode::ChangeVector, Command::Delete { id, condition, .. }) => {
                    self.check_condition(id, *condition)?;
                },
                (ConcurrencyMode::AtomicClaim, Command::Put { id, guard, .. })
                | (ConcurrencyMode::AtomicClaim, Command::Delete { id, guard, .. }) => {
                    self.check_guard(id, *guard)?;
                },
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: CommitBatch) -> (CommitReceipt, BTreeSet<String>) {
        let mut receipt = CommitReceipt::default();
        let mut touched = BTreeSet::new();

        for command in batch.commands {
            match command {
                Command::Put { id, collection, body, expires_at, .. } => {
                    let change_vector = self.next_change_vector();
                    let guard = match batch.mode {
                        ConcurrencyMode::AtomicClaim => {
                            let guard = self.next_guard();
                            self.guards.insert(id.clone(), guard);
                            Some(guard)
                        },
                        ConcurrencyMode::ChangeVector => self.guards.get(&id).copied(),
                    };
                    touched.insert(collection.clone());
                    self.documents.insert(
                        id.clone(),
                        StoredDocument {
                            id: id.clone(),
                            body,
                            metadata: DocumentMetadata {
                                collection,
                                change_vector,
                                guard,
                                expires_at,
                            },
                        },
                    );
                    receipt.results.push(CommandResult {
                        id,
                        change_vector: Some(change_vector),
                        guard,
                    });
                },
                Command::Delete { id, .. } => {
                    if let Some(removed) = self.documents.remove(&id) {
                        touched.insert(removed.metadata.collection);
                    }
                    if batch.mode == ConcurrencyMode::AtomicClaim {
                        self.guards.remove(&id);
                    }
                    receipt.results.push(CommandResult { id, change_vector: None, guard: None });
                },
            }
        }

        (receipt, touched)
    }

    fn run_bulk(&mut self, operation: &BulkOperation) -> (u64, BTreeSet<String>) {
        let mut touched = BTreeSet::new();
        let mut total = 0;

        match operation {
            BulkOperation::PatchByQuery { query, patch } => {
                for id in self.matching_ids(query) {
                    let change_vector = self.next_change_vector();
                    if let Some(doc) = self.documents.get_mut(&id) {
                        apply_patch(&mut doc.body, patch);
                        doc.metadata.change_vector = change_vector;
                        total += 1;
                    }
                }
                touched.insert(query.collection_name().to_owned());
            },
            BulkOperation::DeleteByQuery { query } => {
                // Guards are left behind on purpose: bulk deletes do not
                // participate in atomic-guard bookkeeping.
                for id in self.matching_ids(query) {
                    if self.documents.remove(&id).is_some() {
                        total += 1;
                    }
                }
                touched.insert(query.collection_name().to_owned());
            },
            BulkOperation::DeleteReferenced { query, reference_field } => {
                let targets: BTreeSet<String> = self
                    .matching_ids(query)
                    .iter()
                    .filter_map(|id| self.documents.get(id))
                    .filter_map(|entry| entry.body.get(reference_field.as_str()))
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect();
                for id in targets {
                    if let Some(removed) = self.documents.remove(&id) {
                        touched.insert(removed.metadata.collection);
                        total += 1;
                    }
                }
            },
        }

        (total, touched)
    }

    fn refresh_indexes(&mut self, touched: &BTreeSet<String>) {
        let stale: Vec<Arc<dyn IndexDefinition>> = self
            .indexes
            .iter()
            .filter(|index| index.source_collections().iter().any(|c| touched.contains(*c)))
            .cloned()
            .collect();
        for index in stale {
            self.materialize(index.as_ref());
        }
    }

    fn materialize(&mut self, index: &dyn IndexDefinition) {
        let entries = index.project(&IndexSource::new(&self.documents));
        let output = index.output_collection().to_owned();

        let mut previous: BTreeMap<String, StoredDocument> = BTreeMap::new();
        self.documents.retain(|id, doc| {
            if doc.metadata.collection == output {
                previous.insert(id.clone(), doc.clone());
                false
            } else {
                true
            }
        });

        for entry in entries {
            let change_vector = match previous.get(&entry.id) {
                Some(old) if old.body == entry.body => old.metadata.change_vector,
                _ => self.next_change_vector(),
            };
            self.documents.insert(
                entry.id.clone(),
                StoredDocument {
                    id: entry.id,
                    body: entry.body,
                    metadata: DocumentMetadata {
                        collection: output.clone(),
                        change_vector,
                        guard: None,
                        expires_at: None,
                    },
                },
            );
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .documents
            .values()
            .filter(|doc| doc.metadata.expires_at.is_some_and(|at| at <= now))
            .map(|doc| doc.id.clone())
            .collect();

        let mut touched = BTreeSet::new();
        for id in &expired {
            if let Some(removed) = self.documents.remove(id) {
                touched.insert(removed.metadata.collection);
            }
        }
        if !touched.is_empty() {
            self.refresh_indexes(&touched);
        }
        expired.len()
    }
}

fn apply_patch(body: &mut Value, patch: &Patch) {
    match patch {
        Patch::Set { field, value } => {
            if let Some(object) = body.as_object_mut() {
                object.insert(field.clone(), value.clone());
            }
        },
    }
}

/// In-memory document store.
///
/// # Cloning
///
/// `MemoryDocumentStore` is cheaply cloneable via [`Arc`]. All clones share
/// the same documents, guards and indexes.
///
/// # Shutdown
///
/// When the expiration sweeper is enabled it stops automatically once all
/// clones are dropped (via the internal `ShutdownGuard`), or explicitly via
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct MemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
    options: Arc<MemoryStoreOptions>,
    metrics: StoreMetrics,
    shutdown_guard: Option<Arc<ShutdownGuard>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store with default options and no sweeper.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MemoryStoreOptions::default())
    }

    /// Creates an empty store with the given options.
    ///
    /// When `expiration_sweep_interval` is set this spawns the sweeper and
    /// must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_options(options: MemoryStoreOptions) -> Self {
        let sweep_interval = options.expiration_sweep_interval;
        let mut store = Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            options: Arc::new(options),
            metrics: StoreMetrics::new(),
            shutdown_guard: None,
        };

        if let Some(interval) = sweep_interval {
            let (shutdown_tx, shutdown_rx) = watch::channel(());
            store.shutdown_guard = Some(Arc::new(ShutdownGuard { shutdown_tx }));
            let sweeper = store.clone_without_guard();
            tokio::spawn(async move {
                sweeper.sweep_expired(interval, shutdown_rx).await;
            });
        }

        store
    }

    /// A clone that does not keep the sweeper alive.
    fn clone_without_guard(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            options: Arc::clone(&self.options),
            metrics: self.metrics.clone(),
            shutdown_guard: None,
        }
    }

    /// Background task deleting expired documents.
    async fn sweep_expired(&self, interval: Duration, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            select! {
                _ = sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    return;
                }
            }

            let purged = self.purge_expired(Utc::now());
            if purged > 0 {
                tracing::debug!(purged, "expiration sweep removed documents");
            }
        }
    }

    /// Explicitly signals the expiration sweeper to stop.
    pub fn shutdown(&self) {
        if let Some(guard) = &self.shutdown_guard {
            let _ = guard.shutdown_tx.send(());
        }
    }

    /// Deletes every document whose expiry is at or before `now`.
    ///
    /// Returns the number of documents removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let purged = self.state.write().purge_expired(now);
        self.metrics.record_expired(purged as u64);
        purged
    }

    /// Number of atomic guards currently held, including guards leaked by
    /// bulk deletes.
    #[must_use]
    pub fn guard_count(&self) -> usize {
        self.state.read().guards.len()
    }

    /// Returns `true` if an atomic guard exists for `id`.
    #[must_use]
    pub fn has_guard(&self, id: &str) -> bool {
        self.state.read().guards.contains_key(id)
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.state.read().documents.values().filter(|d| d.metadata.collection == collection).count()
    }

    /// Metrics for this store.
    #[must_use]
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    #[tracing::instrument(skip(self))]
    async fn load(&self, id: &str) -> StorageResult<Option<StoredDocument>> {
        self.metrics.record_load();
        Ok(self.state.read().documents.get(id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, id: &str) -> StorageResult<bool> {
        self.metrics.record_load();
        Ok(self.state.read().documents.contains_key(id))
    }

    #[tracing::instrument(skip(self, query), fields(collection = query.collection_name()))]
    async fn query(&self, query: &Query) -> StorageResult<Vec<StoredDocument>> {
        self.metrics.record_query();
        let state = self.state.read();
        let documents = state
            .documents
            .values()
            .filter(|doc| doc.metadata.collection == query.collection_name())
            .filter(|doc| query.matches(&doc.body))
            .skip(query.skip_count())
            .take(query.take_count().unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(documents)
    }

    #[tracing::instrument(skip(self, query), fields(collection = query.collection_name()))]
    async fn count(&self, query: &Query) -> StorageResult<u64> {
        self.metrics.record_query();
        let state = self.state.read();
        let count = state
            .documents
            .values()
            .filter(|doc| doc.metadata.collection == query.collection_name())
            .filter(|doc| query.matches(&doc.body))
            .count();
        Ok(count as u64)
    }

    #[tracing::instrument(skip(self, batch), fields(mode = %batch.mode, commands = batch.len()))]
    async fn commit(&self, batch: CommitBatch) -> StorageResult<CommitReceipt> {
        let start = Instant::now();
        let mut state = self.state.write();

        if let Err(err) = state.validate(&batch) {
            self.metrics.record_conflict();
            tracing::debug!(error = %err, "commit rejected");
            return Err(err);
        }

        let (receipt, touched) = state.apply(batch);
        state.refresh_indexes(&touched);
        self.metrics.record_commit(start.elapsed());
        Ok(receipt)
    }

    #[tracing::instrument(skip(self, operation), fields(kind = operation.kind(), collection = operation.collection()))]
    async fn send(&self, operation: BulkOperation) -> StorageResult<Operation> {
        let operation_id = {
            let mut state = self.state.write();
            state.last_operation += 1;
            OperationId::from(state.last_operation)
        };
        let (handle, progress) = Operation::channel(operation_id);
        self.metrics.record_bulk_operation();

        let state = Arc::clone(&self.state);
        let delay = self.options.bulk_operation_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let total = {
                let mut state = state.write();
                let (total, touched) = state.run_bulk(&operation);
                state.refresh_indexes(&touched);
                total
            };
            tracing::debug!(operation = %operation_id, total, "bulk operation completed");
            progress.complete(total);
        });

        Ok(handle)
    }

    #[tracing::instrument(skip(self, index), fields(index = index.name()))]
    async fn deploy_index(&self, index: Arc<dyn IndexDefinition>) -> StorageResult<()> {
        let mut state = self.state.write();
        state.indexes.retain(|existing| existing.name() != index.name());
        state.materialize(index.as_ref());
        state.indexes.push(index);
        Ok(())
    }

    async fn generate_id(&self, prefix: &str) -> StorageResult<String> {
        if prefix.is_empty() {
            return Err(StorageError::invalid_operation("id prefix must not be empty"));
        }
        let mut state = self.state.write();
        let StoreState { documents, identities, .. } = &mut *state;
        let next = identities.entry(prefix.to_owned()).or_insert(0);
        // Callers may pick ids in the same shape; skip any already taken.
        loop {
            *next += 1;
            let id = document_id(prefix, &format!("{next}-A"));
            if !documents.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}
