//! Canonicalization of unique values.
//!
//! Two unique values collide when they normalize to the same string. The
//! default normalization is Unicode compatibility decomposition (NFKD)
//! followed by lowercasing, so `"ＡＰＰ"`, `"App"` and `"app"` all claim
//! the same reservation. Deployments can replace it with a
//! [`NormalizationCallback`].

use std::{fmt, sync::Arc};

use unicode_normalization::UnicodeNormalization;

use crate::error::{IdentityStoreError, Result};

/// Replacement for the default normalization.
///
/// Must be pure: the same input always yields the same output.
pub type NormalizationCallback = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Turns raw unique values into reservation keys.
#[derive(Clone, Default)]
pub struct Normalizer {
    callback: Option<NormalizationCallback>,
}

impl Normalizer {
    /// Creates a normalizer that uses NFKD followed by lowercasing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a normalizer that delegates to `callback`.
    #[must_use]
    pub fn with_callback(callback: NormalizationCallback) -> Self {
        Self { callback: Some(callback) }
    }

    /// Normalizes a raw unique value.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStoreError::InvalidArgument`] when `value` is blank,
    /// or when normalization produces a blank string.
    pub fn normalize(&self, value: &str) -> Result<String> {
        if value.trim().is_empty() {
            return Err(IdentityStoreError::blank("unique_value"));
        }

        let normalized = match &self.callback {
            Some(callback) => callback(value),
            None => default_normalize(value),
        };

        if normalized.trim().is_empty() {
            return Err(IdentityStoreError::invalid_argument(
                "unique_value",
                format!("'{value}' normalizes to an empty value"),
            ));
        }
        Ok(normalized)
    }
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer").field("custom", &self.callback.is_some()).finish()
    }
}

fn default_normalize(value: &str) -> String {
    value.nfkd().collect::<String>().to_lowercase()
}
