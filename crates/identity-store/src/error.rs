//! Identity store error taxonomy.
//!
//! Every store-native failure is translated into [`IdentityStoreError`]
//! before it leaves this crate. Translation happens in the
//! `From<StorageError>` impl, so `?` on any store call is the commit
//! boundary:
//!
//! | Store failure | Domain error |
//! |---------------|--------------|
//! | conflict on a reservation document | [`Duplicate`](IdentityStoreError::Duplicate) |
//! | conflict because the id already exists | [`Duplicate`](IdentityStoreError::Duplicate) |
//! | any other conflict | [`Concurrency`](IdentityStoreError::Concurrency) |
//! | a session asked to track two new documents under one id | [`Duplicate`](IdentityStoreError::Duplicate) |
//! | anything else | [`Storage`](IdentityStoreError::Storage) |
//!
//! [`Duplicate`](IdentityStoreError::Duplicate) is the "value already taken"
//! flavour of a concurrency failure; [`IdentityStoreError::is_concurrency`]
//! returns `true` for both.

use identity_docstore::{ConcurrencyMode, ConflictReason, StorageError};
use thiserror::Error;

use crate::reservation::{RESERVATION_ID_PREFIX, UniqueReservationKind};

/// Result type alias for identity store operations.
pub type Result<T> = std::result::Result<T, IdentityStoreError>;

/// Errors produced by the identity stores.
///
/// # Non-exhaustive
///
/// Downstream match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityStoreError {
    /// A unique value or identifier is already claimed.
    #[error("Duplicate: '{id}' is already taken")]
    Duplicate {
        /// The contested document id (a reservation id or an entity id).
        id: String,
    },

    /// A concurrent writer changed the document first.
    #[error("Concurrency conflict on '{id}'")]
    Concurrency {
        /// The document whose version moved.
        id: String,
    },

    /// The session is in the wrong concurrency mode for the operation.
    #[error("Operation requires {required} mode but the session is in {actual} mode")]
    ConcurrencyModeRequired {
        /// Mode the operation needs.
        required: ConcurrencyMode,
        /// Mode the session is in.
        actual: ConcurrencyMode,
    },

    /// A reservation coordinator was asked to claim twice.
    #[error("A {kind} reservation for '{value}' is already staged by this operation")]
    AlreadyStaged {
        /// Reservation kind.
        kind: UniqueReservationKind,
        /// Raw value passed to the second claim.
        value: String,
    },

    /// An identity-bearing field was changed after creation.
    #[error("Field '{field}' of '{id}' cannot change once set")]
    ImmutableFieldChanged {
        /// Entity id.
        id: String,
        /// Field name.
        field: &'static str,
    },

    /// An argument failed validation before any I/O.
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument {
        /// Argument or field name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The entity was not loaded by the session used for the update.
    #[error("Entity '{id}' is not tracked by this session; load it before updating")]
    NotLoaded {
        /// Entity id, or an empty string when the entity has none.
        id: String,
    },

    /// Configuration failed validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the invalid setting.
        message: String,
    },

    /// Any other store failure.
    #[error(transparent)]
    Storage(StorageError),
}

impl IdentityStoreError {
    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument { name, message: message.into() }
    }

    /// Creates a new `InvalidArgument` error for a missing or blank value.
    #[must_use]
    pub fn blank(name: &'static str) -> Self {
        Self::invalid_argument(name, "value cannot be null or empty")
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` for lost races, including [`Duplicate`](Self::Duplicate).
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Duplicate { .. } | Self::Concurrency { .. })
    }

    /// Returns `true` if a unique value or id was already taken.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Fails with [`IdentityStoreError::InvalidArgument`] when `value` is blank.
pub(crate) fn require_non_blank(name: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(IdentityStoreError::blank(name));
    }
    Ok(())
}

impl From<StorageError> for IdentityStoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { id, reason } => {
                if reason == ConflictReason::AlreadyExists || id.starts_with(RESERVATION_ID_PREFIX) {
                    tracing::info!(id = %id, %reason, "value already taken");
                    Self::Duplicate { id }
                } else {
                    tracing::error!(id = %id, %reason, "concurrency conflict while saving changes");
                    Self::Concurrency { id }
                }
            },
            StorageError::NonUniqueObject { id } => {
                tracing::info!(id = %id, "session already holds a new document with this id");
                Self::Duplicate { id }
            },
            other => Self::Storage(other),
        }
    }
}
