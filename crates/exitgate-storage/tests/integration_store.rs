//! Integration tests for the document store
//!
//! In-memory databases cover views, attachments and revisions; an on-disk
//! database with a real pool covers concurrent compare-and-swap writers.
//!
//! Run with: cargo test --package exitgate-storage --test integration_store

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use exitgate_core::{RecordKind, RecordStatus, TransactionRecord};
use exitgate_storage::{
    Database, DatabaseConfig, DesignDoc, ExitSummary, MemberCache, SearchAttr, SearchKind,
    SqliteTransactionStore, StoreError, TransactionStore, ViewQuery,
};
use rstest::rstest;
use tokio::sync::Barrier;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap()
}

async fn memory_store() -> SqliteTransactionStore {
    let db = Database::in_memory().await.unwrap();
    let store = SqliteTransactionStore::new(db, Duration::from_secs(2));
    store.ensure_design_doc(&DesignDoc::exit_lane()).await.unwrap();
    store
}

async fn seed(store: &SqliteTransactionStore) {
    let records = [
        TransactionRecord::parking("IMGTEST001", at(9, 0), "ENTRY_01", "OP").with_plate("B 1234 XYZ"),
        TransactionRecord::parking("IMGTEST002", at(9, 30), "ENTRY_01", "OP"),
        TransactionRecord::member("MCARD42", "MEM-42", at(8, 0), "ENTRY_02", "OP")
            .with_plate("D 42 AB"),
        // barcode that is not a valid id suffix
        TransactionRecord::parking("TCK-0009", at(10, 0), "ENTRY_01", "OP").with_id("legacy_77"),
    ];
    for record in &records {
        store.insert(record).await.unwrap();
    }
}

#[tokio::test]
async fn test_by_barcode_view() {
    let store = memory_store().await;
    seed(&store).await;

    let hits = store
        .query(&ViewQuery::ByBarcode("TCK-0009".into()))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, "legacy_77");

    // members never appear in the barcode view
    let hits = store
        .query(&ViewQuery::ByBarcode("MCARD42".into()))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_by_card_number_view() {
    let store = memory_store().await;
    seed(&store).await;

    let hits = store
        .query(&ViewQuery::ByCardNumber("MCARD42".into()))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.kind, RecordKind::MemberEntry);
    assert_eq!(hits[0].record.member_id.as_deref(), Some("MEM-42"));
}

#[tokio::test]
async fn test_active_by_type_excludes_closed() {
    let store = memory_store().await;
    seed(&store).await;

    let open = store.get("transaction_IMGTEST002").await.unwrap();
    store
        .update(&open.record.id, &open.revision, |r| r.close(at(10, 0), 1000, "G", "O"))
        .await
        .unwrap();

    let active = store
        .query(&ViewQuery::ActiveByType {
            kind: RecordKind::ParkingTransaction,
            key: None,
        })
        .await
        .unwrap();
    let ids: Vec<_> = active.iter().map(|h| h.record.id.as_str()).collect();
    assert_eq!(ids, vec!["legacy_77", "transaction_IMGTEST001"]);

    let members = store
        .query(&ViewQuery::ActiveByType {
            kind: RecordKind::MemberEntry,
            key: Some("MCARD42".into()),
        })
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
}

#[rstest]
#[case::barcode(ViewQuery::universal("imgtest001"), &["transaction_IMGTEST001"])]
#[case::upper_case_key(ViewQuery::universal("IMGTEST001"), &["transaction_IMGTEST001"])]
#[case::record_id(ViewQuery::universal("legacy_77"), &["legacy_77"])]
#[case::member_id(ViewQuery::universal("mem-42"), &["member_entry_MCARD42_1735718400000"])]
#[case::plate(ViewQuery::plate("b 1234 xyz"), &["transaction_IMGTEST001"])]
#[case::plate_wrong_attr(
    ViewQuery::UniversalSearch {
        kind: Some(SearchKind::Parking),
        attr: Some(SearchAttr::Card),
        value: "imgtest001".into(),
    },
    &[]
)]
#[case::member_kind_only(
    ViewQuery::UniversalSearch {
        kind: Some(SearchKind::Member),
        attr: None,
        value: "d 42 ab".into(),
    },
    &["member_entry_MCARD42_1735718400000"]
)]
#[tokio::test]
async fn test_universal_search(#[case] query: ViewQuery, #[case] expected: &[&str]) {
    let store = memory_store().await;
    seed(&store).await;

    let hits = store.query(&query).await.unwrap();
    let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_one_open_record_per_identifier() {
    let store = memory_store().await;
    let first = TransactionRecord::parking("IMGTEST001", at(9, 0), "ENTRY_01", "OP");
    let revision = store.insert(&first).await.unwrap();

    let twin = first.clone().with_id("transaction_IMGTEST001_b");
    let err = store.insert(&twin).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(id) if id == "transaction_IMGTEST001_b"));

    // once closed, the identifier may be reused by a new stay
    store
        .update(&first.id, &revision, |r| r.close(at(10, 0), 0, "G", "O"))
        .await
        .unwrap();
    store.insert(&twin).await.unwrap();
}

#[tokio::test]
async fn test_insert_rejects_invalid_record() {
    let store = memory_store().await;
    let mut record = TransactionRecord::parking("IMGTEST001", at(9, 0), "ENTRY_01", "OP");
    record.exit_fee = 10;

    assert!(matches!(
        store.insert(&record).await,
        Err(StoreError::Rejected(_))
    ));
}

#[tokio::test]
async fn test_closed_record_cannot_reopen() {
    let store = memory_store().await;
    seed(&store).await;

    let open = store.get("transaction_IMGTEST001").await.unwrap();
    let closed = store
        .update(&open.record.id, &open.revision, |r| r.close(at(11, 30), 4000, "G", "O"))
        .await
        .unwrap();

    let err = store
        .update(&closed.record.id, &closed.revision, |r| {
            r.status = RecordStatus::Open;
            r.exit_time = None;
            r.exit_fee = 0;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)));
}

#[tokio::test]
async fn test_attachment_survives_close() {
    let store = memory_store().await;
    seed(&store).await;

    let entry_jpeg = Bytes::from_static(b"\xFF\xD8entry\xFF\xD9");
    store
        .put_attachment("transaction_IMGTEST001", "entry.jpg", entry_jpeg.clone(), "image/jpeg")
        .await
        .unwrap();

    let open = store.get("transaction_IMGTEST001").await.unwrap();
    store
        .update(&open.record.id, &open.revision, |r| r.close(at(11, 0), 3000, "G", "O"))
        .await
        .unwrap();

    let kept = store
        .get_attachment("transaction_IMGTEST001", "entry.jpg")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.data, entry_jpeg);
}

#[tokio::test]
async fn test_attachment_on_missing_document() {
    let store = memory_store().await;
    let err = store
        .put_attachment("transaction_NOPE", "exit.jpg", Bytes::new(), "image/jpeg")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_exit_summary() {
    let store = memory_store().await;
    seed(&store).await;

    for (id, exit, fee) in [
        ("transaction_IMGTEST001", at(11, 30), 4000),
        ("transaction_IMGTEST002", at(12, 0), 3000),
    ] {
        let open = store.get(id).await.unwrap();
        store
            .update(id, &open.revision, |r| r.close(exit, fee, "G", "O"))
            .await
            .unwrap();
    }

    assert_eq!(
        store.exit_summary(at(0, 0)).await.unwrap(),
        ExitSummary {
            exits: 2,
            revenue: 7000
        }
    );
    assert_eq!(
        store.exit_summary(at(11, 45)).await.unwrap(),
        ExitSummary {
            exits: 1,
            revenue: 3000
        }
    );
}

#[tokio::test]
async fn test_member_insert_and_attachment_invalidate_cache() {
    let cache = Arc::new(MemberCache::new(10, Duration::from_secs(300)));
    let store = memory_store().await.with_member_cache(Arc::clone(&cache));
    seed(&store).await;

    let entry = store
        .query(&ViewQuery::ByCardNumber("MCARD42".into()))
        .await
        .unwrap()
        .remove(0);
    cache.put(entry.record.to_member_record().unwrap());

    store
        .put_attachment(&entry.record.id, "entry.jpg", Bytes::from_static(b"jpg"), "image/jpeg")
        .await
        .unwrap();
    assert!(cache.get("MCARD42").is_none());
}

#[tokio::test]
async fn test_outage_is_unavailable() {
    let store = memory_store().await;
    seed(&store).await;
    store.database().close().await;

    for err in [
        store.ping().await.unwrap_err(),
        store.get("transaction_IMGTEST001").await.unwrap_err(),
        store
            .query(&ViewQuery::universal("imgtest001"))
            .await
            .unwrap_err(),
    ] {
        assert!(err.is_unavailable(), "unexpected error: {err}");
    }
}

#[tokio::test]
async fn test_concurrent_closers_exactly_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lane.db");
    let db = Database::new(DatabaseConfig::new(path.to_string_lossy()).max_connections(4))
        .await
        .unwrap();
    let store = Arc::new(SqliteTransactionStore::new(db, Duration::from_secs(10)));
    store.ensure_design_doc(&DesignDoc::exit_lane()).await.unwrap();
    store
        .insert(&TransactionRecord::parking("IMGTEST001", at(9, 0), "ENTRY_01", "OP"))
        .await
        .unwrap();

    const CLOSERS: usize = 8;
    let barrier = Arc::new(Barrier::new(CLOSERS));
    let handles: Vec<_> = (0..CLOSERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                let read = store.get("transaction_IMGTEST001").await?;
                let gate = format!("EXIT_{i}");
                store
                    .update("transaction_IMGTEST001", &read.revision, move |r| {
                        r.close(at(11, 0), 3000, &gate, "O")
                    })
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(result, StoreError::Conflict { .. } | StoreError::Rejected(_)),
            "unexpected error: {result}"
        );
    }

    let stored = store.get("transaction_IMGTEST001").await.unwrap();
    assert_eq!(stored.record.status, RecordStatus::Closed);
    assert_eq!(stored.revision.generation(), 2);
    store.database().close().await;
}
