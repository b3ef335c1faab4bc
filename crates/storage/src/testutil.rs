//! Shared test utilities for document store testing.
//!
//! Helpers for building stores, seeding documents and asserting on
//! [`StorageResult`](crate::StorageResult) values. Feature-gated behind `testutil` to keep them out
//! of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! identity-docstore = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use identity_docstore::testutil::{seed_document, slow_bulk_store};
//! ```

use std::time::Duration;

use serde_json::Value;

use crate::{
    DocumentStore,
    memory::{MemoryDocumentStore, MemoryStoreOptions},
    transaction::{CommitBatch, ConcurrencyMode, WriteCondition},
};

/// Create a [`MemoryDocumentStore`] whose bulk operations wait `delay`
/// before applying.
///
/// Pair with `#[tokio::test(start_paused = true)]` to exercise wait-budget
/// timeouts without real sleeping.
#[must_use]
pub fn slow_bulk_store(delay: Duration) -> MemoryDocumentStore {
    MemoryDocumentStore::with_options(MemoryStoreOptions::builder().bulk_operation_delay(delay).build())
}

/// Write one document directly, outside any session.
///
/// # Panics
///
/// Panics if the commit fails.
pub async fn seed_document(store: &MemoryDocumentStore, collection: &str, id: &str, body: Value) {
    store
        .commit(CommitBatch::new(ConcurrencyMode::ChangeVector).put(
            id,
            collection,
            body,
            WriteCondition::Unconditional,
        ))
        .await
        .expect("seed commit failed");
}

/// Assert that a [`StorageResult`](crate::StorageResult) is a
/// [`StorageError::Conflict`](crate::StorageError::Conflict).
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use identity_docstore::assert_conflict;
/// use identity_docstore::{ConflictReason, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::conflict("tokens/1", ConflictReason::AlreadyExists));
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict { .. })),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $reason:pat) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict { reason: $reason, .. })),
            "expected StorageError::Conflict with reason {}, got: {:?}",
            stringify!($reason),
            $result,
        );
    };
}

/// Assert that a [`StorageResult`](crate::StorageResult) is `Ok` and return
/// the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`](crate::StorageResult) contains a
/// [`StorageError::Timeout`](crate::StorageError::Timeout).
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Timeout)),
            "expected StorageError::Timeout, got: {:?}",
            $result,
        );
    };
}
