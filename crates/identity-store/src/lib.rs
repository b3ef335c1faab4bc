//! Identity record stores on a schema-less document store.
//!
//! The document store only guarantees uniqueness of document ids. This
//! crate builds the rest on top of that:
//!
//! - **Unique values**: application client ids and scope names are claimed
//!   through reservation documents whose id is the normalized value (see
//!   [`reservation`]). The reservation commits atomically with the entity.
//! - **Concurrency discipline per kind**: applications and scopes write in
//!   atomic-claim mode, authorizations and tokens in change-vector mode,
//!   because bulk deletes do not clean up atomic guards.
//! - **Bulk maintenance**: revoke is a server-side patch by query, prune a
//!   delete driven by materialized projections (see [`maintenance`] and
//!   [`indexes`]).
//! - **One error taxonomy**: store conflicts become
//!   [`IdentityStoreError::Duplicate`] or [`IdentityStoreError::Concurrency`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  ApplicationStore   ScopeStore   AuthorizationStore  TokenStore │
//! ├──────────────────────────────┬────────────────────────────────┤
//! │ UniqueReservationCoordinator │ BulkMaintenance                │
//! │ ReservationKeyDeriver        │ prune projections              │
//! │ Normalizer                   │                                │
//! ├──────────────────────────────┴────────────────────────────────┤
//! │                 DocumentSession (identity-docstore)           │
//! ├───────────────────────────────────────────────────────────────┤
//! │                 DocumentStore trait / MemoryDocumentStore     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use identity_docstore::{DocumentSession, MemoryDocumentStore};
//! use identity_store::{
//!     ApplicationStore, DocumentApplicationStore, IdentityStoreConfig, models::Application,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryDocumentStore::new();
//!     let config = Arc::new(IdentityStoreConfig::builder().build()?);
//!
//!     let mut apps = DocumentApplicationStore::new(DocumentSession::new(store.clone()), config.clone());
//!     let mut app = Application::builder().client_id("billing").build();
//!     apps.create(&mut app).await?;
//!
//!     let mut again = DocumentApplicationStore::new(DocumentSession::new(store), config);
//!     let mut clash = Application::builder().client_id("Billing").build();
//!     assert!(again.create(&mut clash).await.unwrap_err().is_duplicate());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Sessions
//!
//! Each `Document*Store` owns one [`DocumentSession`](identity_docstore::DocumentSession).
//! Use a fresh store per logical unit of work, and load an entity through
//! the same store before updating or deleting it.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod indexes;
pub mod maintenance;
pub mod models;
pub mod normalize;
pub mod reservation;
pub mod stores;

pub use config::IdentityStoreConfig;
pub use error::{IdentityStoreError, Result};
pub use indexes::{AuthorizationPruneIndex, TokenPruneIndex, deploy_indexes};
pub use maintenance::{BulkMaintenance, EntityFilter, PruneTarget, TIMED_OUT_COUNT};
pub use normalize::{NormalizationCallback, Normalizer};
pub use reservation::{
    RESERVATION_ID_PREFIX, ReservationKeyDeriver, UniqueReservation, UniqueReservationCoordinator,
    UniqueReservationKind,
};
pub use stores::{
    ApplicationStore, AuthorizationStore, DocumentApplicationStore, DocumentAuthorizationStore,
    DocumentScopeStore, DocumentTokenStore, EntityStream, PropertyChange, ScopeStore, TokenStore,
};
