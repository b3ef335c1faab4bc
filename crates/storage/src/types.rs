//! Common types used across document store operations.
//!
//! Version tokens are modelled as strongly typed newtypes so that a
//! [`GuardIndex`] can never be passed where a [`ChangeVector`] is expected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Macro to define a newtype wrapper around `u64` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `u64`
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<u64>` and `Into<u64>`
/// - Implements `Display` with a per-type tag so log lines stay unambiguous
macro_rules! define_version {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($tag, ":{}"), self.0)
            }
        }
    };
}

define_version!(
    /// Per-document version token.
    ///
    /// Every successful write assigns the document a fresh, store-wide
    /// monotonically increasing change vector. A conditional write that
    /// carries a stale change vector is rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use identity_docstore::ChangeVector;
    ///
    /// let cv = ChangeVector::from(7);
    /// assert_eq!(u64::from(cv), 7);
    /// assert_eq!(cv.to_string(), "A:7");
    /// ```
    ChangeVector,
    "A"
);

define_version!(
    /// Index of a document's invisible atomic guard.
    ///
    /// Guards exist only for documents written through an atomic-guard
    /// commit. Bulk operations never touch them.
    GuardIndex,
    "G"
);

define_version!(
    /// Identifier of a server-side bulk operation.
    OperationId,
    "op"
);

/// Store-maintained metadata carried next to every document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Collection the document belongs to.
    pub collection: String,
    /// Current version token.
    pub change_vector: ChangeVector,
    /// Atomic guard, if the document was last written in atomic-guard mode.
    pub guard: Option<GuardIndex>,
    /// Store-managed expiry. The expiration sweeper deletes the document once
    /// this instant has passed.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Document id.
    pub id: String,
    /// JSON body.
    pub body: Value,
    /// Store-maintained metadata.
    pub metadata: DocumentMetadata,
}

impl StoredDocument {
    /// Returns a top-level field of the body, or [`Value::Null`] if absent.
    #[must_use]
    pub fn field(&self, name: &str) -> &Value {
        self.body.get(name).unwrap_or(&Value::Null)
    }
}
