//! Storage error types and result alias.
//!
//! Every [`DocumentStore`](crate::DocumentStore) backend and the
//! [`DocumentSession`](crate::DocumentSession) map their failures onto
//! [`StorageError`]. Callers that build domain semantics on top of the store
//! (uniqueness, optimistic concurrency) translate these variants at their own
//! boundary.
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - Document does not exist
//! - [`StorageError::Conflict`] - A conditional write lost a race at commit
//! - [`StorageError::NonUniqueObject`] - A session was asked to track two new documents under one
//!   id
//! - [`StorageError::InvalidOperation`] - The request is not valid for the session's state
//! - [`StorageError::Serialization`] - Document encoding/decoding failures
//! - [`StorageError::Internal`] - Backend-specific internal errors
//! - [`StorageError::Timeout`] - A bulk operation did not complete in time
//!
//! # Example
//!
//! ```
//! use identity_docstore::{StorageError, StorageResult};
//!
//! fn lookup(id: &str) -> StorageResult<serde_json::Value> {
//!     Err(StorageError::not_found(id))
//! }
//! ```

use std::{fmt, sync::Arc};

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Why a conditional write was rejected at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictReason {
    /// The write required the document to be absent, but it exists (or, in
    /// atomic-guard mode, its guard still exists).
    AlreadyExists,
    /// The stored change vector no longer matches the one the write carried.
    ChangeVectorMismatch,
    /// The document's atomic guard moved since the session observed it.
    GuardMismatch,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => f.write_str("document already exists"),
            Self::ChangeVectorMismatch => f.write_str("change vector mismatch"),
            Self::GuardMismatch => f.write_str("atomic guard mismatch"),
        }
    }
}

/// Errors that can occur during storage operations.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested document was not found.
    #[error("Document not found: {id}")]
    NotFound {
        /// The id that was not found.
        id: String,
    },

    /// A conditional write lost a race at commit.
    ///
    /// The whole batch was rejected; nothing in it was applied.
    #[error("Concurrency conflict on {id}: {reason}")]
    Conflict {
        /// The first document whose condition failed.
        id: String,
        /// Which condition failed.
        reason: ConflictReason,
    },

    /// A session already holds a different new document under this id.
    #[error("Attempted to associate a different object with id '{id}'")]
    NonUniqueObject {
        /// The contested id.
        id: String,
    },

    /// The request is not valid in the session's current state.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of what was rejected.
        message: String,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A bulk operation did not reach a terminal state within the wait budget.
    ///
    /// The operation may still be running on the store.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `NotFound` error for the given id.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(id: impl Into<String>, reason: ConflictReason) -> Self {
        Self::Conflict { id: id.into(), reason }
    }

    /// Creates a new `NonUniqueObject` error.
    #[must_use]
    pub fn non_unique_object(id: impl Into<String>) -> Self {
        Self::NonUniqueObject { id: id.into() }
    }

    /// Creates a new `InvalidOperation` error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation { message: message.into() }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` if this error is a commit-time conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source(err.to_string(), err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn conflict_display_names_document_and_reason() {
        let err = StorageError::conflict("uniques/scopename/read", ConflictReason::AlreadyExists);
        assert_eq!(
            err.to_string(),
            "Concurrency conflict on uniques/scopename/read: document already exists"
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn serde_errors_keep_their_source() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = StorageError::from(parse);
        assert!(matches!(err, StorageError::Serialization { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn non_conflicts_are_not_reported_as_conflicts() {
        assert!(!StorageError::timeout().is_conflict());
        assert!(!StorageError::non_unique_object("tokens/1-A").is_conflict());
    }
}
