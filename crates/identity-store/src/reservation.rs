//! Unique value reservations.
//!
//! The document store has no unique constraint on fields. Uniqueness of a
//! value (an application's client id, a scope's name) is emulated with a
//! small reservation document whose *id* is derived from the normalized
//! value:
//!
//! ```text
//! uniques/{kind prefix}/{normalized value}   { "reference_id": "<owner id>" }
//! ```
//!
//! Because ids are unique per store, at most one reservation can exist per
//! normalized value. A reservation is only ever staged in the same
//! atomic-claim session as its owner, so the owner and its reservation are
//! committed (or rejected) together.
//!
//! # Lifecycle
//!
//! | Owner change | Reservation change |
//! |--------------|--------------------|
//! | created | [`claim`](UniqueReservationCoordinator::claim) |
//! | unique field changed | [`rename`](UniqueReservationCoordinator::rename) |
//! | deleted | [`release`](UniqueReservationCoordinator::release) |
//!
//! Reservations are never updated in place.

use std::{fmt, sync::Arc};

use identity_docstore::{
    ConcurrencyMode, Document, DocumentSession, DocumentStore, IDENTITY_SEPARATOR, document_id,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::IdentityStoreConfig,
    error::{IdentityStoreError, Result, require_non_blank},
    normalize::Normalizer,
};

/// Leading segment of every reservation id.
pub const RESERVATION_ID_PREFIX: &str = "uniques/";

/// The kinds of value that are kept unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueReservationKind {
    /// An application's `client_id`.
    ApplicationClientId,
    /// A scope's `name`.
    ScopeName,
}

impl fmt::Display for UniqueReservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationClientId => write!(f, "application client id"),
            Self::ScopeName => write!(f, "scope name"),
        }
    }
}

/// A claimed unique value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueReservation {
    /// Derived reservation id.
    #[serde(default, skip_serializing)]
    pub id: String,
    /// Id of the entity holding the value.
    pub reference_id: String,
}

impl Document for UniqueReservation {
    const COLLECTION: &'static str = "UniqueReservations";
    const ID_PREFIX: &'static str = "uniques";

    fn id(&self) -> Option<&str> {
        Some(self.id.as_str()).filter(|id| !id.is_empty())
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Builds reservation ids from a kind and a raw value.
///
/// The id depends only on the kind and the normalized value, never on the
/// owner, so every writer derives the same id for equivalent values.
#[derive(Debug, Clone)]
pub struct ReservationKeyDeriver {
    config: Arc<IdentityStoreConfig>,
    normalizer: Normalizer,
}

impl ReservationKeyDeriver {
    /// Creates a deriver using the prefixes and normalization of `config`.
    #[must_use]
    pub fn new(config: Arc<IdentityStoreConfig>) -> Self {
        let normalizer = config.normalizer();
        Self { config, normalizer }
    }

    /// Returns `uniques/{kind prefix}/{normalized value}`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStoreError::InvalidArgument`] when `value` is blank
    /// before or after normalization.
    pub fn derive(&self, kind: UniqueReservationKind, value: &str) -> Result<String> {
        let normalized = self.normalizer.normalize(value)?;
        let prefix = document_id(UniqueReservation::ID_PREFIX, self.config.reservation_prefix(kind));
        Ok(format!("{prefix}{IDENTITY_SEPARATOR}{normalized}"))
    }

    /// The configuration the deriver was built from.
    #[must_use]
    pub fn config(&self) -> &IdentityStoreConfig {
        &self.config
    }
}

/// Coordinates the reservation of one unique value for one logical change.
///
/// A coordinator stages at most one reservation. Create a new coordinator
/// for every create or update.
#[derive(Debug)]
pub struct UniqueReservationCoordinator<'a> {
    deriver: &'a ReservationKeyDeriver,
    kind: UniqueReservationKind,
    value: String,
    taken: Option<bool>,
    staged: bool,
}

impl<'a> UniqueReservationCoordinator<'a> {
    /// Creates a coordinator for `value` of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStoreError::InvalidArgument`] when `value` is blank.
    pub fn new(
        deriver: &'a ReservationKeyDeriver,
        kind: UniqueReservationKind,
        value: impl Into<String>,
    ) -> Result<Self> {
        let value = value.into();
        require_non_blank("unique_value", &value)?;
        Ok(Self { deriver, kind, value, taken: None, staged: false })
    }

    /// Reservation id of the coordinated value.
    pub fn reservation_id(&self) -> Result<String> {
        self.deriver.derive(self.kind, &self.value)
    }

    fn require_atomic_claim<S: DocumentStore>(session: &DocumentSession<S>) -> Result<()> {
        if session.mode() != ConcurrencyMode::AtomicClaim {
            return Err(IdentityStoreError::ConcurrencyModeRequired {
                required: ConcurrencyMode::AtomicClaim,
                actual: session.mode(),
            });
        }
        Ok(())
    }

    /// Returns `true` if the value is already reserved, counting writes
    /// staged in `session`.
    pub async fn exists<S: DocumentStore>(&mut self, session: &mut DocumentSession<S>) -> Result<bool> {
        let id = self.reservation_id()?;
        let taken = session.exists(&id).await?;
        self.taken = Some(taken);
        Ok(taken)
    }

    /// Stages a new reservation of the value for `owner_id`.
    ///
    /// # Errors
    ///
    /// - [`IdentityStoreError::InvalidArgument`] if `owner_id` is blank
    /// - [`IdentityStoreError::AlreadyStaged`] if this coordinator already staged a reservation
    /// - [`IdentityStoreError::ConcurrencyModeRequired`] outside atomic-claim mode
    /// - [`IdentityStoreError::Duplicate`] if the value is taken
    pub async fn claim<S: DocumentStore>(
        &mut self,
        session: &mut DocumentSession<S>,
        owner_id: &str,
    ) -> Result<UniqueReservation> {
        require_non_blank("owner_id", owner_id)?;
        if self.staged {
            return Err(IdentityStoreError::AlreadyStaged { kind: self.kind, value: self.value.clone() });
        }
        Self::require_atomic_claim(session)?;
        self.staged = true;

        let id = self.reservation_id()?;
        let taken = match self.taken {
            Some(taken) => taken,
            None => self.exists(session).await?,
        };
        if taken {
            tracing::info!(kind = %self.kind, reservation = %id, "unique value already taken");
            return Err(IdentityStoreError::Duplicate { id });
        }

        let mut reservation = UniqueReservation { id, reference_id: owner_id.to_owned() };
        session.store_new(&mut reservation).await?;
        Ok(reservation)
    }

    /// Stages the deletion of the value's reservation, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStoreError::ConcurrencyModeRequired`] outside
    /// atomic-claim mode.
    pub async fn release<S: DocumentStore>(&self, session: &mut DocumentSession<S>) -> Result<()> {
        Self::require_atomic_claim(session)?;
        let id = self.reservation_id()?;
        if session.load::<UniqueReservation>(&id).await?.is_some() {
            session.delete(&id);
        }
        Ok(())
    }

    /// Moves `owner_id`'s claim from `old_value` to this coordinator's value.
    ///
    /// Availability of the new value is checked before the old reservation
    /// is touched, so a failed rename stages nothing. When both values
    /// normalize to the same key the owner keeps its current reservation.
    /// An old reservation held by another owner is left alone.
    ///
    /// # Errors
    ///
    /// Same as [`claim`](Self::claim).
    pub async fn rename<S: DocumentStore>(
        &mut self,
        session: &mut DocumentSession<S>,
        old_value: Option<&str>,
        owner_id: &str,
    ) -> Result<UniqueReservation> {
        require_non_blank("owner_id", owner_id)?;
        if self.staged {
            return Err(IdentityStoreError::AlreadyStaged { kind: self.kind, value: self.value.clone() });
        }
        Self::require_atomic_claim(session)?;

        let new_id = self.reservation_id()?;
        let old_id = match old_value.filter(|v| !v.trim().is_empty()) {
            Some(old) => Some(self.deriver.derive(self.kind, old)?),
            None => None,
        };

        if old_id.as_deref() == Some(new_id.as_str()) {
            match session.load::<UniqueReservation>(&new_id).await? {
                Some(existing) if existing.reference_id == owner_id => {
                    self.staged = true;
                    return Ok(existing);
                },
                _ => {},
            }
        }

        if self.exists(session).await? {
            tracing::info!(kind = %self.kind, reservation = %new_id, "rename target already taken");
            self.staged = true;
            return Err(IdentityStoreError::Duplicate { id: new_id });
        }

        if let Some(old_id) = old_id {
            match session.load::<UniqueReservation>(&old_id).await? {
                Some(old) if old.reference_id == owner_id => session.delete(&old_id),
                Some(old) => {
                    tracing::warn!(
                        reservation = %old_id,
                        owner = %old.reference_id,
                        requested_by = owner_id,
                        "old reservation belongs to another owner; leaving it in place"
                    );
                },
                None => {},
            }
        }

        self.claim(session, owner_id).await
    }

    /// Loads the value's current reservation.
    pub async fn load<S: DocumentStore>(
        &self,
        session: &mut DocumentSession<S>,
    ) -> Result<Option<UniqueReservation>> {
        let id = self.reservation_id()?;
        Ok(session.load::<UniqueReservation>(&id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use identity_docstore::MemoryDocumentStore;

    use super::*;

    fn deriver() -> ReservationKeyDeriver {
        ReservationKeyDeriver::new(Arc::new(IdentityStoreConfig::default()))
    }

    fn atomic_session(store: &MemoryDocumentStore) -> DocumentSession<MemoryDocumentStore> {
        DocumentSession::with_mode(store.clone(), ConcurrencyMode::AtomicClaim)
    }

    #[test]
    fn test_reservation_ids_share_prefix() {
        let id = deriver().derive(UniqueReservationKind::ScopeName, "Read").unwrap();
        assert_eq!(id, "uniques/scopename/read");
        assert!(id.starts_with(RESERVATION_ID_PREFIX));
    }

    #[test]
    fn test_kinds_derive_distinct_ids() {
        let deriver = deriver();
        assert_ne!(
            deriver.derive(UniqueReservationKind::ScopeName, "x").unwrap(),
            deriver.derive(UniqueReservationKind::ApplicationClientId, "x").unwrap()
        );
    }

    #[test]
    fn test_composed_and_decomposed_values_share_a_reservation() {
        let deriver = deriver();
        let composed = deriver.derive(UniqueReservationKind::ApplicationClientId, "caf\u{e9}").unwrap();
        let decomposed =
            deriver.derive(UniqueReservationKind::ApplicationClientId, "CAFE\u{301}").unwrap();
        assert_eq!(composed, decomposed);
    }

    #[test]
    fn test_blank_value_is_rejected() {
        let deriver = deriver();
        assert!(UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, " ").is_err());
    }

    #[tokio::test]
    async fn test_claim_requires_atomic_claim_mode() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = DocumentSession::new(store);
        let mut coordinator =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();

        let err = coordinator.claim(&mut session, "scopes/1-A").await.unwrap_err();
        assert!(matches!(
            err,
            IdentityStoreError::ConcurrencyModeRequired { required: ConcurrencyMode::AtomicClaim, .. }
        ));
        assert!(!session.has_changes());
    }

    #[tokio::test]
    async fn test_claim_twice_is_already_staged() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = atomic_session(&store);
        let mut coordinator =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();

        coordinator.claim(&mut session, "scopes/1-A").await.unwrap();
        let err = coordinator.claim(&mut session, "scopes/1-A").await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::AlreadyStaged { .. }));
    }

    #[tokio::test]
    async fn test_claim_rejects_blank_owner() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = atomic_session(&store);
        let mut coordinator =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();

        let err = coordinator.claim(&mut session, "").await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::InvalidArgument { name: "owner_id", .. }));
    }

    #[tokio::test]
    async fn test_claim_sees_staged_and_committed_reservations() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = atomic_session(&store);

        let mut first =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "Read").unwrap();
        first.claim(&mut session, "scopes/1-A").await.unwrap();

        // Staged in the same session.
        let mut second =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "READ").unwrap();
        assert!(second.claim(&mut session, "scopes/2-A").await.unwrap_err().is_duplicate());

        session.save_changes().await.unwrap();

        // Committed, seen from another session.
        let mut other = atomic_session(&store);
        let mut third =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();
        assert!(third.exists(&mut other).await.unwrap());
        assert!(third.claim(&mut other, "scopes/3-A").await.unwrap_err().is_duplicate());

        let loaded = third.load(&mut other).await.unwrap().unwrap();
        assert_eq!(loaded.reference_id, "scopes/1-A");
    }

    #[tokio::test]
    async fn test_release_stages_deletion() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = atomic_session(&store);
        let mut coordinator =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();
        coordinator.claim(&mut session, "scopes/1-A").await.unwrap();
        session.save_changes().await.unwrap();

        let mut releasing = atomic_session(&store);
        let releaser =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();
        releaser.release(&mut releasing).await.unwrap();
        releasing.save_changes().await.unwrap();

        assert!(!store.exists("uniques/scopename/read").await.unwrap());
        assert!(!store.has_guard("uniques/scopename/read"));
    }

    #[tokio::test]
    async fn test_release_requires_atomic_claim_mode() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = DocumentSession::new(store);
        let coordinator =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "read").unwrap();
        assert!(matches!(
            coordinator.release(&mut session).await,
            Err(IdentityStoreError::ConcurrencyModeRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_to_taken_value_stages_nothing() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut setup = atomic_session(&store);
        for (value, owner) in [("a", "scopes/1-A"), ("b", "scopes/2-A")] {
            let mut c =
                UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, value).unwrap();
            c.claim(&mut setup, owner).await.unwrap();
        }
        setup.save_changes().await.unwrap();

        let mut session = atomic_session(&store);
        let mut renaming =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "b").unwrap();
        let err = renaming.rename(&mut session, Some("a"), "scopes/1-A").await.unwrap_err();
        assert!(err.is_duplicate());
        assert!(!session.has_changes());
    }

    #[tokio::test]
    async fn test_rename_moves_reservation() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut setup = atomic_session(&store);
        let mut c = UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "a").unwrap();
        c.claim(&mut setup, "scopes/1-A").await.unwrap();
        setup.save_changes().await.unwrap();

        let mut session = atomic_session(&store);
        let mut renaming =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "c").unwrap();
        let reservation = renaming.rename(&mut session, Some("a"), "scopes/1-A").await.unwrap();
        assert_eq!(reservation.id, "uniques/scopename/c");
        session.save_changes().await.unwrap();

        assert!(!store.exists("uniques/scopename/a").await.unwrap());
        assert!(store.exists("uniques/scopename/c").await.unwrap());
    }

    #[tokio::test]
    async fn test_case_only_rename_keeps_reservation() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut setup = atomic_session(&store);
        let mut c =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "Read").unwrap();
        c.claim(&mut setup, "scopes/1-A").await.unwrap();
        setup.save_changes().await.unwrap();

        let mut session = atomic_session(&store);
        let mut renaming =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "READ").unwrap();
        let reservation = renaming.rename(&mut session, Some("Read"), "scopes/1-A").await.unwrap();
        assert_eq!(reservation.reference_id, "scopes/1-A");
        assert!(!session.has_changes());
    }

    #[tokio::test]
    async fn test_rename_without_old_value_claims() {
        let store = MemoryDocumentStore::new();
        let deriver = deriver();
        let mut session = atomic_session(&store);
        let mut renaming =
            UniqueReservationCoordinator::new(&deriver, UniqueReservationKind::ScopeName, "fresh").unwrap();
        renaming.rename(&mut session, None, "scopes/1-A").await.unwrap();
        session.save_changes().await.unwrap();
        assert!(store.exists("uniques/scopename/fresh").await.unwrap());
    }
}
