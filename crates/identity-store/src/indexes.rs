//! Materialized projections that drive pruning.
//!
//! The store cannot delete by a query that joins collections. Both prune
//! rules need a joined fact (does an authorization still have tokens, is a
//! token's authorization still valid), so the join is materialized into a
//! plain collection and the bulk delete targets that collection, deleting
//! the documents each matching entry references.
//!
//! Entries lag entity writes. They are only used by bulk maintenance.

use std::{collections::HashSet, sync::Arc};

use identity_docstore::{
    Document, DocumentStore, IndexDefinition, IndexEntry, IndexSource, StoredDocument, document_id,
};
use serde_json::{Value, json};

use crate::{
    error::Result,
    models::{Authorization, Token},
};

/// Output collection of [`AuthorizationPruneIndex`].
pub const AUTHORIZATION_PRUNE_ENTRIES: &str = "AuthorizationPruneEntries";

/// Output collection of [`TokenPruneIndex`].
pub const TOKEN_PRUNE_ENTRIES: &str = "TokenPruneEntries";

fn field_or_null(document: &StoredDocument, name: &str) -> Value {
    document.field(name).clone()
}

/// One entry per authorization:
/// `{ authorization_id, creation_date, status, type, has_tokens }`.
#[derive(Debug, Default)]
pub struct AuthorizationPruneIndex;

impl IndexDefinition for AuthorizationPruneIndex {
    fn name(&self) -> &str {
        "AuthorizationPrune"
    }

    fn source_collections(&self) -> &[&str] {
        &[Authorization::COLLECTION, Token::COLLECTION]
    }

    fn output_collection(&self) -> &str {
        AUTHORIZATION_PRUNE_ENTRIES
    }

    fn project(&self, source: &IndexSource<'_>) -> Vec<IndexEntry> {
        let referenced: HashSet<&str> = source
            .collection(Token::COLLECTION)
            .filter_map(|token| token.field("authorization_id").as_str())
            .collect();

        source
            .collection(Authorization::COLLECTION)
            .map(|authorization| IndexEntry {
                id: document_id("authorizationpruneentries", &authorization.id),
                body: json!({
                    "authorization_id": authorization.id,
                    "creation_date": field_or_null(authorization, "creation_date"),
                    "status": field_or_null(authorization, "status"),
                    "type": field_or_null(authorization, "type"),
                    "has_tokens": referenced.contains(authorization.id.as_str()),
                }),
            })
            .collect()
    }
}

/// One entry per token:
/// `{ token_id, creation_date, expiration_date, status, authorization_status }`.
///
/// `authorization_status` is `null` when the token has no authorization or
/// the authorization no longer exists.
#[derive(Debug, Default)]
pub struct TokenPruneIndex;

impl IndexDefinition for TokenPruneIndex {
    fn name(&self) -> &str {
        "TokenPrune"
    }

    fn source_collections(&self) -> &[&str] {
        &[Token::COLLECTION, Authorization::COLLECTION]
    }

    fn output_collection(&self) -> &str {
        TOKEN_PRUNE_ENTRIES
    }

    fn project(&self, source: &IndexSource<'_>) -> Vec<IndexEntry> {
        source
            .collection(Token::COLLECTION)
            .map(|token| {
                let authorization_status = token
                    .field("authorization_id")
                    .as_str()
                    .and_then(|id| source.load(id))
                    .filter(|auth| auth.metadata.collection == Authorization::COLLECTION)
                    .map_or(Value::Null, |auth| field_or_null(auth, "status"));

                IndexEntry {
                    id: document_id("tokenpruneentries", &token.id),
                    body: json!({
                        "token_id": token.id,
                        "creation_date": field_or_null(token, "creation_date"),
                        "expiration_date": field_or_null(token, "expiration_date"),
                        "status": field_or_null(token, "status"),
                        "authorization_status": authorization_status,
                    }),
                }
            })
            .collect()
    }
}

/// Registers both prune projections on `store`.
///
/// Safe to call more than once; a redeployed index replaces the previous
/// definition.
#[tracing::instrument(skip(store))]
pub async fn deploy_indexes<S: DocumentStore>(store: &S) -> Result<()> {
    store.deploy_index(Arc::new(AuthorizationPruneIndex)).await?;
    store.deploy_index(Arc::new(TokenPruneIndex)).await?;
    tracing::debug!("prune indexes deployed");
    Ok(())
}
