//! Shared fixtures for the identity store integration tests.

#![allow(dead_code, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use identity_docstore::{DocumentSession, MemoryDocumentStore};
use identity_store::{
    DocumentApplicationStore, DocumentAuthorizationStore, DocumentScopeStore, DocumentTokenStore,
    EntityStream, IdentityStoreConfig,
    models::{Authorization, Token, authorization_types, statuses},
};

pub type Store = MemoryDocumentStore;

/// Configuration with a short bulk wait budget.
pub fn config(bulk_operation_timeout: Duration) -> Arc<IdentityStoreConfig> {
    Arc::new(
        IdentityStoreConfig::builder()
            .bulk_operation_timeout(bulk_operation_timeout)
            .build()
            .expect("valid config"),
    )
}

pub fn default_config() -> Arc<IdentityStoreConfig> {
    config(Duration::from_secs(5))
}

pub fn applications(store: &Store) -> DocumentApplicationStore<Store> {
    DocumentApplicationStore::new(DocumentSession::new(store.clone()), default_config())
}

pub fn scopes(store: &Store) -> DocumentScopeStore<Store> {
    DocumentScopeStore::new(DocumentSession::new(store.clone()), default_config())
}

pub fn authorizations(store: &Store) -> DocumentAuthorizationStore<Store> {
    DocumentAuthorizationStore::new(DocumentSession::new(store.clone()), default_config())
}

pub fn tokens(store: &Store) -> DocumentTokenStore<Store> {
    DocumentTokenStore::new(DocumentSession::new(store.clone()), default_config())
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(days)
}

pub fn authorization(application_id: &str, status: &str, created: DateTime<Utc>) -> Authorization {
    Authorization::builder()
        .application_id(application_id)
        .subject("alice")
        .status(status)
        .authorization_type(authorization_types::PERMANENT)
        .creation_date(created)
        .build()
}

pub fn token(application_id: &str) -> Token {
    Token::builder()
        .application_id(application_id)
        .subject("alice")
        .status(statuses::VALID)
        .token_type("access_token")
        .creation_date(Utc::now())
        .build()
}

pub async fn collect<T>(stream: EntityStream<T>) -> Vec<T> {
    stream.try_collect().await.expect("stream failed")
}
