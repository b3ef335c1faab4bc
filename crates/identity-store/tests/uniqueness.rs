//! Unique values under concurrency.
//!
//! Independent sessions race to claim the same client id or scope name.
//! Exactly one commit may win; every loser must see `Duplicate`.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{applications, scopes};
use identity_docstore::{Document, DocumentStore, MemoryDocumentStore};
use identity_store::{
    ApplicationStore, ScopeStore,
    models::{Application, Scope},
};
use tokio::task::JoinSet;

const CONCURRENCY: usize = 16;

// ---------------------------------------------------------------------------
// Racing creates
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_with_equivalent_client_ids_have_one_winner() {
    let store = MemoryDocumentStore::new();
    let variants = ["Billing", "billing", "BILLING", "ＢＩＬＬＩＮＧ"];

    let mut tasks = JoinSet::new();
    for i in 0..CONCURRENCY {
        let store = store.clone();
        let client_id = variants[i % variants.len()];
        tasks.spawn(async move {
            let mut app = Application::builder().client_id(client_id).build();
            applications(&store).create(&mut app).await
        });
    }

    let mut wins = 0;
    let mut duplicates = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(()) => wins += 1,
            Err(err) if err.is_duplicate() => duplicates += 1,
            Err(err) => panic!("unexpected error: {err:?}"),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(duplicates, CONCURRENCY - 1);
    assert_eq!(store.collection_len(Application::COLLECTION), 1);
    assert!(store.exists("uniques/appclientid/billing").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_renames_to_one_name_have_one_winner() {
    let store = MemoryDocumentStore::new();
    let mut ids = Vec::new();
    for i in 0..CONCURRENCY {
        let mut scope = Scope::builder().name(format!("scope-{i}")).build();
        scopes(&store).create(&mut scope).await.unwrap();
        ids.push(scope.id.unwrap());
    }

    let mut tasks = JoinSet::new();
    for id in ids {
        let store = store.clone();
        tasks.spawn(async move {
            let mut scopes = scopes(&store);
            let mut scope = scopes.find_by_id(&id).await?.expect("scope exists");
            scope.name = "contested".into();
            scopes.update(&mut scope).await
        });
    }

    let mut wins = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(()) => wins += 1,
            Err(err) => assert!(err.is_duplicate(), "unexpected error: {err:?}"),
        }
    }
    assert_eq!(wins, 1);

    // One scope moved, so exactly one old name is free and every other
    // reservation is still held.
    assert_eq!(scopes(&store).count().await.unwrap(), CONCURRENCY as u64);
    assert_eq!(store.collection_len("UniqueReservations"), CONCURRENCY);
}

// ---------------------------------------------------------------------------
// Rename atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_rename_leaves_entity_and_reservation_intact() {
    let store = MemoryDocumentStore::new();
    let mut a = Application::builder().client_id("a").build();
    applications(&store).create(&mut a).await.unwrap();
    let mut b = Application::builder().client_id("b").build();
    applications(&store).create(&mut b).await.unwrap();

    let mut apps = applications(&store);
    let mut loaded = apps.find_by_id(a.id.as_deref().unwrap()).await.unwrap().unwrap();
    loaded.client_id = "B".into();
    assert!(apps.update(&mut loaded).await.unwrap_err().is_duplicate());

    let reread = applications(&store).find_by_client_id("a").await.unwrap().unwrap();
    assert_eq!(reread.id, a.id);
    let reservation = store.load("uniques/appclientid/a").await.unwrap().unwrap();
    assert_eq!(reservation.field("reference_id").as_str(), a.id.as_deref());
}

#[tokio::test]
async fn scope_lifecycle() {
    let store = MemoryDocumentStore::new();

    let mut scope = Scope::builder().name("scope-1").display_name("Scope one").build();
    scopes(&store).create(&mut scope).await.unwrap();

    let mut clash = Scope::builder().name("scope-1").build();
    assert!(scopes(&store).create(&mut clash).await.unwrap_err().is_duplicate());

    let mut session = scopes(&store);
    let mut loaded = session.find_by_name("scope-1").await.unwrap().unwrap();
    loaded.name = "scope-1-updated".into();
    session.update(&mut loaded).await.unwrap();

    assert!(!store.exists("uniques/scopename/scope-1").await.unwrap());
    let moved = store.load("uniques/scopename/scope-1-updated").await.unwrap().unwrap();
    assert_eq!(moved.field("reference_id").as_str(), scope.id.as_deref());

    let mut reuse = Scope::builder().name("scope-1").build();
    scopes(&store).create(&mut reuse).await.unwrap();
    assert_eq!(scopes(&store).count().await.unwrap(), 2);
}
