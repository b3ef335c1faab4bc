//! Server-side bulk operations and their pollable handles.
//!
//! Bulk operations run on the store, outside any session. [`DocumentStore::send`]
//! returns an [`Operation`] immediately; the caller polls or awaits it with a
//! bounded wait. Dropping the handle, or abandoning the wait, does not cancel
//! the work on the store.
//!
//! [`DocumentStore::send`]: crate::DocumentStore::send

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::{
    error::{StorageError, StorageResult},
    query::Query,
    types::OperationId,
};

/// A field-level patch applied to every matching document.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Sets a top-level field.
    Set {
        /// Field name.
        field: String,
        /// New value.
        value: Value,
    },
}

impl Patch {
    /// Convenience constructor for [`Patch::Set`].
    #[must_use]
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set { field: field.into(), value: value.into() }
    }
}

/// A server-side operation over the documents a query selects.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Applies `patch` to every match.
    PatchByQuery {
        /// Selection.
        query: Query,
        /// Change to apply.
        patch: Patch,
    },
    /// Deletes every match.
    DeleteByQuery {
        /// Selection.
        query: Query,
    },
    /// Deletes the documents whose ids are stored in `reference_field` of
    /// every match. Used to delete entities through a projection collection.
    DeleteReferenced {
        /// Selection over the projection.
        query: Query,
        /// Field holding the id of the document to delete.
        reference_field: String,
    },
}

impl BulkOperation {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PatchByQuery { .. } => "patch_by_query",
            Self::DeleteByQuery { .. } => "delete_by_query",
            Self::DeleteReferenced { .. } => "delete_referenced",
        }
    }

    /// Collection the selection runs against.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::PatchByQuery { query, .. }
            | Self::DeleteByQuery { query }
            | Self::DeleteReferenced { query, .. } => query.collection_name(),
        }
    }
}

/// Progress of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running.
    InProgress,
    /// Finished; `total` documents were affected.
    Completed {
        /// Number of documents patched or deleted.
        total: u64,
    },
    /// Failed on the store.
    Faulted {
        /// Store-side failure description.
        message: String,
    },
}

impl OperationStatus {
    /// Returns `true` once the status can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Result of a completed bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOperationResult {
    /// Number of documents patched or deleted.
    pub total: u64,
}

/// Store side of an [`Operation`]. Backends publish progress through it.
#[derive(Debug)]
pub struct OperationProgress {
    tx: watch::Sender<OperationStatus>,
}

impl OperationProgress {
    /// Publishes successful completion.
    pub fn complete(self, total: u64) {
        // Every handle may already be gone; completion is still final.
        let _ = self.tx.send(OperationStatus::Completed { total });
    }

    /// Publishes failure.
    pub fn fault(self, message: impl Into<String>) {
        let _ = self.tx.send(OperationStatus::Faulted { message: message.into() });
    }
}

/// Pollable handle to a bulk operation running on the store.
///
/// Cloning is cheap; every clone observes the same operation.
#[derive(Debug, Clone)]
pub struct Operation {
    id: OperationId,
    rx: watch::Receiver<OperationStatus>,
}

impl Operation {
    /// Creates a handle together with the progress sender the backend keeps.
    #[must_use]
    pub fn channel(id: OperationId) -> (Self, OperationProgress) {
        let (tx, rx) = watch::channel(OperationStatus::InProgress);
        (Self { id, rx }, OperationProgress { tx })
    }

    /// Operation id.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Current status without waiting.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.rx.borrow().clone()
    }

    /// Waits up to `timeout` for the operation to finish.
    ///
    /// Returns [`StorageError::Timeout`] when the budget elapses first. The
    /// operation keeps running and this handle can be awaited again.
    pub async fn wait_for_completion(&self, timeout: Duration) -> StorageResult<BulkOperationResult> {
        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(OperationStatus::is_terminal)).await;
        let status = match waited {
            Err(_elapsed) => return Err(StorageError::timeout()),
            Ok(Err(_closed)) => {
                return Err(StorageError::internal(format!(
                    "bulk operation {} was abandoned by the store",
                    self.id
                )));
            },
            Ok(Ok(status)) => status.clone(),
        };
        match status {
            OperationStatus::Completed { total } => Ok(BulkOperationResult { total }),
            OperationStatus::Faulted { message } => Err(StorageError::internal(message)),
            OperationStatus::InProgress => Err(StorageError::timeout()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_operation_reports_total() {
        let (operation, progress) = Operation::channel(OperationId::from(1));
        assert_eq!(operation.status(), OperationStatus::InProgress);

        progress.complete(3);

        let result = operation.wait_for_completion(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_operation_times_out_and_can_be_awaited_again() {
        let (operation, progress) = Operation::channel(OperationId::from(2));

        let result = operation.wait_for_completion(Duration::from_secs(30)).await;
        crate::assert_timeout!(result);

        progress.complete(5);
        let result = operation.wait_for_completion(Duration::from_secs(30)).await.unwrap();
        assert_eq!(result.total, 5);
    }

    #[tokio::test]
    async fn faulted_operation_surfaces_internal_error() {
        let (operation, progress) = Operation::channel(OperationId::from(3));
        progress.fault("index is stale");

        let err = operation.wait_for_completion(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }));
    }

    #[tokio::test]
    async fn dropped_progress_is_reported() {
        let (operation, progress) = Operation::channel(OperationId::from(4));
        drop(progress);

        let err = operation.wait_for_completion(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }));
    }
}
