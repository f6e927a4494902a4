//! Integration tests for startup reconciliation.

mod common;

use std::sync::Arc;

use adk_catalog::{
    IngestionPipeline, Readiness, ReconcileOutcome, ReconcileState, Reconciler, SourceRecord,
    VectorStore,
};
use common::{FlakyStore, HashEmbedder, VecSource, backend, fast_retry, memory_config, service_with};

fn reconciler(store: Arc<FlakyStore>) -> Reconciler {
    let backend = backend(store);
    let pipeline = IngestionPipeline::builder()
        .backend(backend.clone())
        .embedding_provider(HashEmbedder::new())
        .batch_size(2)
        .batch_retry_limit(0)
        .retry(fast_retry())
        .build()
        .unwrap();
    Reconciler::new(backend, Arc::new(pipeline), common::DIM)
}

fn commodities() -> Vec<SourceRecord> {
    vec![
        SourceRecord::new("43211503", "Notebook computers", Some("Portable personal computers")),
        SourceRecord::new("44121701", "Ballpoint pens", None),
        SourceRecord::new("14111507", "Printer paper", Some("   ")),
    ]
}

#[tokio::test]
async fn an_empty_collection_is_created_and_populated() {
    let store = FlakyStore::new();
    let source = VecSource::new(commodities());

    let outcome = reconciler(store.clone()).reconcile("unspsc_categories", &source).await;

    match &outcome {
        ReconcileOutcome::Populated { report } => {
            assert!(report.is_complete());
            assert_eq!(report.succeeded.len(), 3);
        }
        other => panic!("expected Populated, got {other:?}"),
    }
    assert!(outcome.is_healthy());
    assert_eq!(store.count("unspsc_categories").await.unwrap(), 3);
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn a_second_run_makes_no_upserts() {
    let store = FlakyStore::new();
    let source = VecSource::new(commodities());
    let reconciler = reconciler(store.clone());

    reconciler.reconcile("unspsc_categories", &source).await;
    let upserts_after_first = store.upserts();
    assert!(upserts_after_first > 0);

    let outcome = reconciler.reconcile("unspsc_categories", &source).await;
    assert_eq!(outcome, ReconcileOutcome::AlreadyPopulated { count: 3 });
    assert_eq!(store.upserts(), upserts_after_first);
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn blank_descriptions_fall_back_to_the_name() {
    let store = FlakyStore::new();
    reconciler(store.clone())
        .reconcile("unspsc_categories", &VecSource::new(commodities()))
        .await;

    let records = store.get("unspsc_categories", &["44121701", "14111507"]).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.metadata["description"], record.metadata["name"]);
        assert_eq!(record.metadata["item_type"], "unspsc_commodity");
        assert_eq!(record.metadata["system"], "UNSPSC");
    }
}

#[tokio::test]
async fn an_empty_source_leaves_the_collection_empty() {
    let store = FlakyStore::new();
    let outcome = reconciler(store.clone()).reconcile("unspsc_categories", &VecSource::new(vec![])).await;

    assert_eq!(outcome, ReconcileOutcome::SourceEmpty);
    assert!(outcome.is_healthy());
    assert!(store.collection_exists("unspsc_categories").await.unwrap());
    assert_eq!(store.upserts(), 0);
}

#[tokio::test]
async fn a_source_failure_is_reported_with_its_state() {
    let store = FlakyStore::new();
    let outcome = reconciler(store.clone()).reconcile("unspsc_categories", &VecSource::failing()).await;

    match &outcome {
        ReconcileOutcome::Failed { state, error } => {
            assert_eq!(*state, ReconcileState::FetchFromSource);
            assert!(error.contains("connection refused"), "{error}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!outcome.is_healthy());
    assert_eq!(store.count("unspsc_categories").await.unwrap(), 0);
}

#[tokio::test]
async fn partial_ingestion_is_not_healthy() {
    let store = FlakyStore::new();
    store.poison("14111507");
    let outcome = reconciler(store.clone()).reconcile("unspsc_categories", &VecSource::new(commodities())).await;

    match &outcome {
        ReconcileOutcome::Populated { report } => assert_eq!(report.upsert_failed.len(), 1),
        other => panic!("expected Populated, got {other:?}"),
    }
    assert!(!outcome.is_healthy());
}

#[tokio::test]
async fn startup_prepares_collections_and_becomes_ready() {
    let store = FlakyStore::new();
    let (service, _) = service_with(store.clone(), memory_config());
    assert_eq!(service.readiness().await, Readiness::Initializing);

    let source = VecSource::new(commodities());
    let outcomes = service.reconcile_startup(Some(&source)).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(service.readiness().await, Readiness::Ready);
    let names = store.list_collections().await.unwrap();
    for expected in ["common_categories", "rag_manual_info", "unspsc_categories"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
    }

    // A second startup in the same process does not reconcile again.
    let outcomes = service.reconcile_startup(Some(&source)).await;
    assert!(outcomes.is_empty());
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn startup_without_a_source_only_creates_collections() {
    let store = FlakyStore::new();
    let (service, _) = service_with(store.clone(), memory_config());

    let outcomes = service.reconcile_startup(None).await;

    assert!(outcomes.is_empty());
    assert_eq!(service.readiness().await, Readiness::Ready);
    assert!(store.collection_exists("unspsc_categories").await.unwrap());
    assert_eq!(store.count("unspsc_categories").await.unwrap(), 0);
}

#[tokio::test]
async fn a_failed_reconcile_degrades_readiness_and_can_be_retried() {
    let store = FlakyStore::new();
    let (service, _) = service_with(store.clone(), memory_config());

    service.reconcile_startup(Some(&VecSource::failing())).await;
    match service.readiness().await {
        Readiness::Degraded { reasons } => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].contains("unspsc_categories"), "{reasons:?}");
        }
        other => panic!("expected Degraded, got {other:?}"),
    }

    let source = VecSource::new(commodities());
    let outcomes = service.reconcile_startup(Some(&source)).await;
    assert!(matches!(outcomes.as_slice(), [ReconcileOutcome::Populated { .. }]));
    assert_eq!(service.readiness().await, Readiness::Ready);
}

#[tokio::test]
async fn a_partially_populated_collection_stays_degraded_on_restart() {
    let store = FlakyStore::new();
    let (service, _) = service_with(store.clone(), memory_config());
    let mut rows = commodities();
    rows.push(SourceRecord::new("25101503", "Cars", Some("Passenger motor vehicles")));
    store.poison("25101503");
    let source = VecSource::new(rows);

    let outcomes = service.reconcile_startup(Some(&source)).await;
    assert!(matches!(outcomes.as_slice(), [ReconcileOutcome::Populated { report }] if report.upsert_failed.len() == 1));
    assert!(matches!(service.readiness().await, Readiness::Degraded { .. }));

    let outcomes = service.reconcile_startup(Some(&source)).await;
    assert_eq!(outcomes, vec![ReconcileOutcome::AlreadyPopulated { count: 3 }]);
    match service.readiness().await {
        Readiness::Degraded { reasons } => {
            assert!(reasons[0].contains("stored 3 items, 1 failed"), "{reasons:?}");
        }
        other => panic!("expected Degraded, got {other:?}"),
    }
    assert_eq!(source.fetch_count(), 1);
}

#[test]
fn only_runs_that_wrote_something_can_leave_partial_data() {
    assert!(!ReconcileOutcome::SourceEmpty.left_partial_data());
    assert!(!ReconcileOutcome::AlreadyPopulated { count: 3 }.left_partial_data());
    let fetch = ReconcileOutcome::Failed { state: ReconcileState::FetchFromSource, error: "down".into() };
    assert!(!fetch.left_partial_data());
    let ingest = ReconcileOutcome::Failed { state: ReconcileState::Ingest, error: "down".into() };
    assert!(ingest.left_partial_data());
}
