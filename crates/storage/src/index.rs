//! Materialized projections written to plain collections.
//!
//! An [`IndexDefinition`] joins documents across collections and writes one
//! entry per projected row into its output collection. Output collections
//! are ordinary collections: they can be queried, counted and targeted by
//! [`BulkOperation::DeleteReferenced`](crate::BulkOperation::DeleteReferenced),
//! which is the point of materializing them.
//!
//! Entries are derived data. They lag the source documents they were built
//! from and must never drive single-document decisions.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::StoredDocument;

/// One row of a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Id of the entry document in the output collection.
    pub id: String,
    /// Entry body.
    pub body: Value,
}

/// Read-only view of the source documents handed to a projection.
pub struct IndexSource<'a> {
    documents: &'a BTreeMap<String, StoredDocument>,
}

impl<'a> IndexSource<'a> {
    /// Wraps a snapshot of the store's documents keyed by id.
    #[must_use]
    pub fn new(documents: &'a BTreeMap<String, StoredDocument>) -> Self {
        Self { documents }
    }

    /// Iterates the documents of one collection in id order.
    pub fn collection(&self, name: &'a str) -> impl Iterator<Item = &'a StoredDocument> + 'a {
        self.documents.values().filter(move |doc| doc.metadata.collection == name)
    }

    /// Loads a document by id, like a projection-side `LoadDocument`.
    #[must_use]
    pub fn load(&self, id: &str) -> Option<&'a StoredDocument> {
        self.documents.get(id)
    }
}

/// A projection the store keeps materialized.
pub trait IndexDefinition: Send + Sync + 'static {
    /// Unique index name.
    fn name(&self) -> &str;

    /// Collections whose changes invalidate the projection.
    fn source_collections(&self) -> &[&str];

    /// Collection the entries are written to.
    fn output_collection(&self) -> &str;

    /// Computes every entry from the current source documents.
    fn project(&self, source: &IndexSource<'_>) -> Vec<IndexEntry>;
}

impl std::fmt::Debug for dyn IndexDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("name", &self.name())
            .field("output_collection", &self.output_collection())
            .finish()
    }
}
