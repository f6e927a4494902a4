//! Integration tests for batch ingestion.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use adk_catalog::{CatalogError, CatalogItem, IngestionPipeline, VectorStore};
use common::{EMBED_FAIL, FlakyStore, HashEmbedder, backend, fast_retry, notebook, numbered_items};

fn pipeline(store: Arc<FlakyStore>, batch_size: usize, retry_limit: u32) -> IngestionPipeline {
    IngestionPipeline::builder()
        .backend(backend(store))
        .embedding_provider(HashEmbedder::new())
        .batch_size(batch_size)
        .batch_retry_limit(retry_limit)
        .retry(fast_retry())
        .build()
        .unwrap()
}

fn codes(failures: &[adk_catalog::ItemFailure]) -> Vec<&str> {
    failures.iter().map(|f| f.code.as_str()).collect()
}

#[tokio::test]
async fn sub_batch_count_is_ceil_of_items_over_batch_size() {
    for (items, batch_size) in [(1, 1), (7, 3), (9, 3), (10, 4), (5, 500)] {
        let store = FlakyStore::new();
        store.create_collection("catalog", common::DIM).await.unwrap();
        let report = pipeline(store.clone(), batch_size, 0)
            .ingest("catalog", numbered_items(items))
            .await
            .unwrap();

        assert_eq!(report.sub_batches, items.div_ceil(batch_size), "{items} items / {batch_size}");
        assert_eq!(store.upserts(), items.div_ceil(batch_size));
        assert_eq!(report.succeeded.len(), items);
        assert_eq!(store.count("catalog").await.unwrap(), items as u64);
    }
}

#[tokio::test]
async fn a_failing_sub_batch_marks_exactly_its_items() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();
    store.poison("item-04");

    let report = pipeline(store.clone(), 3, 2).ingest("catalog", numbered_items(7)).await.unwrap();

    assert_eq!(report.sub_batches, 3);
    assert_eq!(codes(&report.upsert_failed), ["item-03", "item-04", "item-05"]);
    assert_eq!(report.succeeded, ["item-00", "item-01", "item-02", "item-06"]);
    assert!(report.validation_failed.is_empty());
    assert!(report.embedding_failed.is_empty());
    // one attempt each for the healthy sub-batches, three for the poisoned one
    assert_eq!(store.upserts(), 5);
    assert_eq!(store.count("catalog").await.unwrap(), 4);

    match report.into_result() {
        Err(CatalogError::PartialBatchFailure { total, failed, upsert, .. }) => {
            assert_eq!((total, failed, upsert), (7, 3, 3));
        }
        other => panic!("expected PartialBatchFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_upsert_failures_are_retried() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();
    store.transient_upsert_failures.store(2, Ordering::SeqCst);

    let report = pipeline(store.clone(), 10, 3).ingest("catalog", numbered_items(4)).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.sub_batches, 1);
    assert_eq!(store.upserts(), 3);
}

#[tokio::test]
async fn invalid_items_are_reported_and_the_rest_stored() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();

    let items = vec![
        CatalogItem::new("1", "Pens", "Ballpoint pens"),
        CatalogItem::new("2", "  ", "No name"),
        CatalogItem::new("", "Orphan", "No code"),
        CatalogItem::new("4", "Paper", "A4 paper"),
    ];
    let report = pipeline(store.clone(), 500, 0).ingest("catalog", items).await.unwrap();

    assert_eq!(report.submitted, 4);
    assert_eq!(report.succeeded, ["1", "4"]);
    let indices: Vec<usize> = report.validation_failed.iter().map(|f| f.index).collect();
    assert_eq!(indices, [1, 2]);
    assert_eq!(report.validation_failed[0].reason, "name must not be empty");
    assert_eq!(store.count("catalog").await.unwrap(), 2);
}

#[tokio::test]
async fn an_embedding_failure_marks_exactly_its_batch() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();

    let mut items = numbered_items(5);
    items[2].description = format!("contains {EMBED_FAIL}");
    let report = pipeline(store.clone(), 2, 0).ingest("catalog", items).await.unwrap();

    let indices: Vec<usize> = report.embedding_failed.iter().map(|f| f.index).collect();
    assert_eq!(indices, [2, 3]);
    assert_eq!(report.succeeded, ["item-00", "item-01", "item-04"]);
    assert_eq!(report.sub_batches, 2);
    assert!(report.upsert_failed.is_empty());
}

#[tokio::test]
async fn duplicate_codes_collapse_to_the_last_occurrence() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();

    let items = vec![
        CatalogItem::new("43211503", "Notebook computer", "first version"),
        CatalogItem::new("44121701", "Ballpoint pens", "Pens"),
        CatalogItem::new(" 43211503 ", "Notebook computer", "second version"),
    ];
    let report = pipeline(store.clone(), 500, 0).ingest("catalog", items).await.unwrap();

    assert_eq!(report.submitted, 3);
    assert_eq!(report.succeeded, ["43211503", "44121701"]);
    assert_eq!(store.count("catalog").await.unwrap(), 2);
    let stored = store.get("catalog", &["43211503"]).await.unwrap();
    assert_eq!(stored[0].metadata["description"], "second version");
}

#[tokio::test]
async fn reingesting_overwrites_without_growing_the_collection() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();
    let pipeline = pipeline(store.clone(), 500, 0);

    pipeline.ingest("catalog", vec![notebook()]).await.unwrap();
    let updated = CatalogItem::new("43211503", "Notebook computer", "A light laptop computer");
    pipeline.ingest("catalog", vec![updated]).await.unwrap();

    assert_eq!(store.count("catalog").await.unwrap(), 1);
    let backend = backend(store);
    let hits = backend.query("catalog", &HashEmbedder::vector("laptop"), 5).await.unwrap();
    match &hits[0].payload {
        adk_catalog::Payload::Catalog(item) => assert_eq!(item.description, "A light laptop computer"),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn ingesting_into_a_missing_collection_fails() {
    let store = FlakyStore::new();
    let err = pipeline(store.clone(), 500, 0).ingest("nowhere", vec![notebook()]).await.unwrap_err();
    assert!(matches!(err, CatalogError::CollectionNotFound(name) if name == "nowhere"));
    assert_eq!(store.upserts(), 0);
}

#[tokio::test]
async fn empty_input_makes_no_backend_writes() {
    let store = FlakyStore::new();
    store.create_collection("catalog", common::DIM).await.unwrap();
    let report = pipeline(store.clone(), 500, 0).ingest("catalog", Vec::new()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.sub_batches, 0);
    assert_eq!(store.upserts(), 0);
}
