//! Typed documents and id conventions.
//!
//! A [`Document`] is a serde type that knows which collection it lives in and
//! how its id is prefixed. Ids follow the `{prefix}/{suffix}` convention; the
//! store assigns `{prefix}/{n}-A` when a new document has no id yet.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Separator between the parts of a document id.
pub const IDENTITY_SEPARATOR: char = '/';

/// Body field that holds the document id.
pub const ID_FIELD: &str = "id";

/// A typed document stored in a named collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the collection documents of this type are stored in.
    const COLLECTION: &'static str;

    /// Lowercase prefix used for ids of this type.
    const ID_PREFIX: &'static str;

    /// Returns the document id, if one has been assigned.
    fn id(&self) -> Option<&str>;

    /// Assigns the document id.
    fn set_id(&mut self, id: String);
}

/// Joins an id prefix and a suffix with [`IDENTITY_SEPARATOR`].
///
/// # Examples
///
/// ```
/// use identity_docstore::document_id;
///
/// assert_eq!(document_id("tokens", "ref-1"), "tokens/ref-1");
/// ```
#[must_use]
pub fn document_id(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{IDENTITY_SEPARATOR}{suffix}")
}

/// Encodes a document as a JSON body.
pub fn to_body<T: Document>(document: &T) -> StorageResult<Value> {
    let body = serde_json::to_value(document)?;
    if !body.is_object() {
        return Err(StorageError::serialization(format!(
            "documents in {} must serialize to a JSON object",
            T::COLLECTION
        )));
    }
    Ok(body)
}

/// Decodes a JSON body and stamps it with the id it was stored under.
pub fn from_body<T: Document>(id: &str, body: Value) -> StorageResult<T> {
    let mut document: T = serde_json::from_value(body)?;
    document.set_id(id.to_owned());
    Ok(document)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        text: String,
    }

    impl Document for Note {
        const COLLECTION: &'static str = "Notes";
        const ID_PREFIX: &'static str = "notes";

        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn set_id(&mut self, id: String) {
            self.id = Some(id);
        }
    }

    #[test]
    fn from_body_stamps_storage_id() {
        let note: Note = from_body("notes/1-A", json!({ "text": "hi" })).unwrap();
        assert_eq!(note.id(), Some("notes/1-A"));
    }

    #[test]
    fn to_body_produces_object() {
        let body = to_body(&Note { id: None, text: "hi".into() }).unwrap();
        assert_eq!(body, json!({ "text": "hi" }));
    }
}
