//! Document store abstraction for the identity stores.
//!
//! This crate provides the [`DocumentStore`] trait and the pieces built on
//! it: a unit-of-work [`DocumentSession`], commit batches in two concurrency
//! modes, ad-hoc [`Query`]s, server-side [`BulkOperation`]s with pollable
//! [`Operation`] handles, and materialized [`IndexDefinition`] projections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    identity-store                           │
//! │   Application/Scope/Authorization/Token stores,             │
//! │   unique reservations, bulk maintenance                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   DocumentSession                           │
//! │   (tracking, staged writes, mode, save_changes)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   DocumentStore trait                       │
//! │   (load, query, commit, send, deploy_index, generate_id)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  MemoryDocumentStore                        │
//! │            (reference backend, testing)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use identity_docstore::{BulkOperation, DocumentStore, MemoryDocumentStore, Patch, Query};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryDocumentStore::new();
//!
//!     let operation = store
//!         .send(BulkOperation::PatchByQuery {
//!             query: Query::collection("Tokens").where_eq("subject", "alice"),
//!             patch: Patch::set("status", "revoked"),
//!         })
//!         .await?;
//!     let result = operation.wait_for_completion(Duration::from_secs(30)).await?;
//!     assert_eq!(result.total, 0);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Commit races surface as
//! [`StorageError::Conflict`] with a [`ConflictReason`]; callers translate
//! them into their own taxonomy.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with store factories, seeding helpers and
//!   assertion macros. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod memory;
pub mod metrics;
pub mod operation;
pub mod query;
pub mod session;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod transaction;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::{DocumentStore, STREAM_PAGE_SIZE};
pub use document::{Document, ID_FIELD, IDENTITY_SEPARATOR, document_id};
pub use error::{BoxError, ConflictReason, StorageError, StorageResult};
pub use index::{IndexDefinition, IndexEntry, IndexSource};
pub use memory::{MemoryDocumentStore, MemoryStoreOptions};
pub use metrics::{StoreMetrics, StoreMetricsSnapshot};
pub use operation::{BulkOperation, BulkOperationResult, Operation, OperationStatus, Patch};
pub use query::{Predicate, Query};
pub use session::DocumentSession;
pub use transaction::{
    Command, CommandResult, CommitBatch, CommitReceipt, ConcurrencyMode, GuardExpectation,
    WriteCondition,
};
pub use types::{ChangeVector, DocumentMetadata, GuardIndex, OperationId, StoredDocument};
