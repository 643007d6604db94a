//! Common test utilities for the engine integration tests.
//!
//! Lanes run on an in-memory store, a simulated gate and a fixed wall clock
//! reading 2025-01-01T11:30:00Z. The seeded records are:
//!
//! | identifier | record id | entry | notes |
//! |---|---|---|---|
//! | `IMGTEST001` | `transaction_IMGTEST001` | 09:00 | casual car |
//! | `TCK0009` | `legacy_9` | 09:00 | id is not `transaction_{barcode}` |
//! | `IMGTEST002` | `transaction_IMGTEST002` | 10:00 | plate `B1234XYZ` |
//! | `MCARD42` | `member_entry_MCARD42_…` | 08:00 | member entry |

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use exitgate_core::{Revision, Tariff, TariffSchedule, TransactionRecord};
use exitgate_engine::{ExitEngine, FixedClock, LaneHandle, LaneSettings};
use exitgate_hardware::{GateDriver, SimulatedGateHandle};
use exitgate_storage::{
    Attachment, Database, DesignDoc, ExitSummary, MemberCache, SqliteTransactionStore,
    StoreError, StoreResult, StoredRecord, TransactionStore, ViewQuery,
};

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap()
}

/// Car `{first: 2000, next: 1000}`, member `{first: 1000, next: 500}`.
pub fn settings() -> LaneSettings {
    LaneSettings {
        tariffs: TariffSchedule {
            car: Tariff::new(2000, 1000),
            member: Tariff::new(1000, 500),
            ..TariffSchedule::default()
        },
        ..LaneSettings::default()
    }
}

pub async fn memory_store() -> (Arc<SqliteTransactionStore>, Arc<MemberCache>) {
    let cache = Arc::new(MemberCache::new(100, Duration::from_secs(300)));
    let db = Database::in_memory().await.unwrap();
    let store = Arc::new(
        SqliteTransactionStore::new(db, Duration::from_secs(2)).with_member_cache(Arc::clone(&cache)),
    );
    store.ensure_design_doc(&DesignDoc::exit_lane()).await.unwrap();
    (store, cache)
}

pub async fn seed<S: TransactionStore>(store: &S) {
    let records = [
        TransactionRecord::parking("IMGTEST001", at(9, 0), "ENTRY_01", "OP"),
        TransactionRecord::parking("TCK0009", at(9, 0), "ENTRY_01", "OP").with_id("legacy_9"),
        TransactionRecord::parking("IMGTEST002", at(10, 0), "ENTRY_01", "OP").with_plate("B1234XYZ"),
        TransactionRecord::member("MCARD42", "MEM-42", at(8, 0), "ENTRY_02", "OP"),
    ];
    for record in &records {
        store.insert(record).await.unwrap();
    }
}

/// A started lane and everything needed to observe it.
pub struct TestLane<S> {
    pub engine: ExitEngine,
    pub lane: LaneHandle,
    pub store: Arc<S>,
    pub cache: Arc<MemberCache>,
    pub gate: SimulatedGateHandle,
    pub clock: FixedClock,
}

pub async fn start<S: TransactionStore>(
    store: Arc<S>,
    cache: Arc<MemberCache>,
    settings: LaneSettings,
) -> TestLane<S> {
    let (driver, gate) = GateDriver::simulated(3);
    let clock = FixedClock::new(at(11, 30));
    let engine = ExitEngine::builder(Arc::clone(&store), driver)
        .cache(Arc::clone(&cache))
        .settings(settings)
        .clock(clock.clone())
        .start()
        .await
        .unwrap();
    TestLane {
        lane: engine.handle(),
        engine,
        store,
        cache,
        gate,
        clock,
    }
}

/// Seeded in-memory store behind a started lane.
pub async fn seeded_lane(settings: LaneSettings) -> TestLane<SqliteTransactionStore> {
    let (store, cache) = memory_store().await;
    seed(&*store).await;
    start(store, cache, settings).await
}

/// Store that can be switched off, answering `Unavailable` while down.
#[derive(Debug)]
pub struct FlakyStore {
    inner: SqliteTransactionStore,
    down: AtomicBool,
    attachments_down: AtomicBool,
    lookups: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteTransactionStore) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            attachments_down: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Refuse attachments only.
    pub fn set_attachments_down(&self, down: bool) {
        self.attachments_down.store(down, Ordering::SeqCst);
    }

    /// `get` and `query` calls seen so far, including refused ones.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("switched off".to_string()));
        }
        Ok(())
    }
}

impl TransactionStore for FlakyStore {
    async fn get(&self, id: &str) -> StoreResult<StoredRecord> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(id).await
    }

    async fn query(&self, query: &ViewQuery) -> StoreResult<Vec<StoredRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.query(query).await
    }

    async fn update<F>(&self, id: &str, expected: &Revision, mutator: F) -> StoreResult<StoredRecord>
    where
        F: FnOnce(&mut TransactionRecord) -> exitgate_core::Result<()> + Send,
    {
        self.check()?;
        self.inner.update(id, expected, mutator).await
    }

    async fn put_attachment(
        &self,
        id: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreResult<Revision> {
        self.check()?;
        if self.attachments_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("attachments switched off".to_string()));
        }
        self.inner.put_attachment(id, name, data, content_type).await
    }

    async fn get_attachment(&self, id: &str, name: &str) -> StoreResult<Option<Attachment>> {
        self.check()?;
        self.inner.get_attachment(id, name).await
    }

    async fn ensure_design_doc(&self, doc: &DesignDoc) -> StoreResult<Revision> {
        self.check()?;
        self.inner.ensure_design_doc(doc).await
    }

    async fn insert(&self, record: &TransactionRecord) -> StoreResult<Revision> {
        self.check()?;
        self.inner.insert(record).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }

    async fn exit_summary(&self, since: DateTime<Utc>) -> StoreResult<ExitSummary> {
        self.check()?;
        self.inner.exit_summary(since).await
    }
}

/// Seeded flaky store behind a started lane.
pub async fn flaky_lane(settings: LaneSettings) -> TestLane<FlakyStore> {
    let cache = Arc::new(MemberCache::new(100, Duration::from_secs(300)));
    let db = Database::in_memory().await.unwrap();
    let inner = SqliteTransactionStore::new(db, Duration::from_secs(2)).with_member_cache(Arc::clone(&cache));
    let store = Arc::new(FlakyStore::new(inner));
    store.ensure_design_doc(&DesignDoc::exit_lane()).await.unwrap();
    seed(&*store).await;
    start(store, cache, settings).await
}
