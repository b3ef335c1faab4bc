//! Configuration for the identity stores.
//!
//! [`IdentityStoreConfig`] holds the reservation key prefixes, an optional
//! normalization override and the wait budget for bulk maintenance.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{IdentityStoreError, Result},
    normalize::{NormalizationCallback, Normalizer},
    reservation::UniqueReservationKind,
};

/// Default wait budget for bulk operations (30 seconds).
const DEFAULT_BULK_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default key prefix for application client id reservations.
const DEFAULT_APPLICATION_CLIENT_ID_PREFIX: &str = "appclientid";

/// Default key prefix for scope name reservations.
const DEFAULT_SCOPE_NAME_PREFIX: &str = "scopename";

/// Configuration shared by every identity store.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use identity_store::IdentityStoreConfig;
///
/// let config = IdentityStoreConfig::builder()
///     .bulk_operation_timeout(Duration::from_secs(10))
///     .build()?;
/// assert_eq!(config.scope_name_prefix(), "scopename");
/// # Ok::<(), identity_store::IdentityStoreError>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityStoreConfig {
    /// How long revoke and prune wait for the server-side operation.
    #[serde(with = "humantime_serde", default = "default_bulk_operation_timeout")]
    pub(crate) bulk_operation_timeout: Duration,

    /// Key prefix for application client id reservations.
    #[serde(default = "default_application_client_id_prefix")]
    pub(crate) application_client_id_prefix: String,

    /// Key prefix for scope name reservations.
    #[serde(default = "default_scope_name_prefix")]
    pub(crate) scope_name_prefix: String,

    /// Replacement for the default Unicode normalization.
    #[serde(skip)]
    pub(crate) normalization: Option<NormalizationCallback>,
}

fn default_bulk_operation_timeout() -> Duration {
    DEFAULT_BULK_OPERATION_TIMEOUT
}

fn default_application_client_id_prefix() -> String {
    DEFAULT_APPLICATION_CLIENT_ID_PREFIX.to_owned()
}

fn default_scope_name_prefix() -> String {
    DEFAULT_SCOPE_NAME_PREFIX.to_owned()
}

impl Default for IdentityStoreConfig {
    fn default() -> Self {
        Self {
            bulk_operation_timeout: default_bulk_operation_timeout(),
            application_client_id_prefix: default_application_client_id_prefix(),
            scope_name_prefix: default_scope_name_prefix(),
            normalization: None,
        }
    }
}

#[bon::bon]
impl IdentityStoreConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Optional Fields
    ///
    /// * `bulk_operation_timeout` - Wait budget for revoke and prune (default: 30 seconds).
    /// * `application_client_id_prefix` - Reservation key prefix for client ids (default: `appclientid`).
    /// * `scope_name_prefix` - Reservation key prefix for scope names (default: `scopename`).
    /// * `normalization` - Replacement for NFKD + lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStoreError::Config`] if:
    /// - The timeout is zero
    /// - A prefix is blank or contains `/`
    /// - Both prefixes are equal
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_BULK_OPERATION_TIMEOUT)] bulk_operation_timeout: Duration,
        #[builder(into, default = DEFAULT_APPLICATION_CLIENT_ID_PREFIX.to_owned())]
        application_client_id_prefix: String,
        #[builder(into, default = DEFAULT_SCOPE_NAME_PREFIX.to_owned())] scope_name_prefix: String,
        normalization: Option<NormalizationCallback>,
    ) -> Result<Self> {
        let config = Self {
            bulk_operation_timeout,
            application_client_id_prefix,
            scope_name_prefix,
            normalization,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants [`new`](Self::new) enforces.
    ///
    /// Call this after deserializing, since serde bypasses the builder.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStoreError::Config`] on the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.bulk_operation_timeout.is_zero() {
            return Err(IdentityStoreError::config("bulk_operation_timeout must be greater than zero"));
        }

        for (name, prefix) in [
            ("application_client_id_prefix", &self.application_client_id_prefix),
            ("scope_name_prefix", &self.scope_name_prefix),
        ] {
            if prefix.trim().is_empty() {
                return Err(IdentityStoreError::config(format!("{name} cannot be empty")));
            }
            if prefix.contains(identity_docstore::IDENTITY_SEPARATOR) {
                return Err(IdentityStoreError::config(format!(
                    "{name} cannot contain '{}'",
                    identity_docstore::IDENTITY_SEPARATOR
                )));
            }
        }

        if self.application_client_id_prefix == self.scope_name_prefix {
            return Err(IdentityStoreError::config(format!(
                "reservation prefixes must be distinct, both are '{}'",
                self.scope_name_prefix
            )));
        }

        Ok(())
    }

    /// Returns the bulk operation wait budget.
    #[must_use]
    pub fn bulk_operation_timeout(&self) -> Duration {
        self.bulk_operation_timeout
    }

    /// Returns the client id reservation prefix.
    #[must_use]
    pub fn application_client_id_prefix(&self) -> &str {
        &self.application_client_id_prefix
    }

    /// Returns the scope name reservation prefix.
    #[must_use]
    pub fn scope_name_prefix(&self) -> &str {
        &self.scope_name_prefix
    }

    /// Returns the key prefix for a reservation kind.
    #[must_use]
    pub fn reservation_prefix(&self, kind: UniqueReservationKind) -> &str {
        match kind {
            UniqueReservationKind::ApplicationClientId => &self.application_client_id_prefix,
            UniqueReservationKind::ScopeName => &self.scope_name_prefix,
        }
    }

    /// Builds the normalizer this configuration describes.
    #[must_use]
    pub fn normalizer(&self) -> Normalizer {
        match &self.normalization {
            Some(callback) => Normalizer::with_callback(callback.clone()),
            None => Normalizer::new(),
        }
    }
}

impl fmt::Debug for IdentityStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityStoreConfig")
            .field("bulk_operation_timeout", &self.bulk_operation_timeout)
            .field("application_client_id_prefix", &self.application_client_id_prefix)
            .field("scope_name_prefix", &self.scope_name_prefix)
            .field("normalization", &self.normalization.as_ref().map(|_| "custom"))
            .finish()
    }
}
