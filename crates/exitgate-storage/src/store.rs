//! Transaction store: parking records as revisioned JSON documents.
//!
//! Each document lives in one SQLite row holding the serialized record, the
//! columns the exit views search on and a `revision` string of the form
//! `{n}-{suffix}`. Every write names the revision it was based on; a write
//! against any other revision fails with [`StoreError::Conflict`] and the
//! caller re-reads before trying again. Attachments bump the revision of
//! their document too.
//!
//! Requests run under the configured deadline. One that exceeds it fails
//! with [`StoreError::Unavailable`], the same error a lost connection gives.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use exitgate_core::{LaneConfig, RecordKind, Revision, TransactionRecord};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::MemberCache;
use crate::connection::{Database, DatabaseConfig};
use crate::error::{StoreError, StoreResult};
use crate::views::{DesignDoc, ViewQuery, search_keys};

/// Bumps of the revision attempted by `put_attachment` before it gives up.
const ATTACHMENT_CAS_ATTEMPTS: u32 = 3;

/// A record together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub record: TransactionRecord,
    pub revision: Revision,
}

/// A named binary attachment of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Closed records since an instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitSummary {
    pub exits: u64,
    pub revenue: i64,
}

/// Document store holding parking transactions and member entries.
///
/// Every write is a compare-and-swap on the document revision: a writer
/// presents the revision it read and the store refuses the write with
/// [`StoreError::Conflict`] if the document moved on in the meantime.
///
/// Methods return `Send` futures so a lane worker generic over the store can
/// be spawned onto the runtime.
pub trait TransactionStore: Send + Sync + 'static {
    /// Fetch a document by id.
    fn get(&self, id: &str) -> impl Future<Output = StoreResult<StoredRecord>> + Send;

    /// Run a view query, newest entry first.
    fn query(&self, query: &ViewQuery)
    -> impl Future<Output = StoreResult<Vec<StoredRecord>>> + Send;

    /// Apply `mutator` to the document read at `expected`.
    ///
    /// The mutated record must be a legal successor of the stored one
    /// (identity unchanged, OPEN -> CLOSED only).
    fn update<F>(
        &self,
        id: &str,
        expected: &Revision,
        mutator: F,
    ) -> impl Future<Output = StoreResult<StoredRecord>> + Send
    where
        F: FnOnce(&mut TransactionRecord) -> exitgate_core::Result<()> + Send;

    /// Store or replace a named attachment; bumps the document revision.
    fn put_attachment(
        &self,
        id: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> impl Future<Output = StoreResult<Revision>> + Send;

    fn get_attachment(
        &self,
        id: &str,
        name: &str,
    ) -> impl Future<Output = StoreResult<Option<Attachment>>> + Send;

    /// Register a set of views; calling it again with the same set is a no-op.
    fn ensure_design_doc(&self, doc: &DesignDoc)
    -> impl Future<Output = StoreResult<Revision>> + Send;

    /// Create a new document.
    ///
    /// Fails with [`StoreError::Duplicate`] if the id exists or the identifier
    /// already has an OPEN record.
    fn insert(&self, record: &TransactionRecord)
    -> impl Future<Output = StoreResult<Revision>> + Send;

    /// Round-trip to the backend.
    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Count and revenue of records closed at or after `since`.
    fn exit_summary(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<ExitSummary>> + Send;
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    revision: String,
    body: String,
}

impl DocumentRow {
    fn decode(self) -> StoreResult<StoredRecord> {
        let record: TransactionRecord =
            serde_json::from_str(&self.body).map_err(|e| StoreError::Corrupt {
                id: self.id.clone(),
                message: e.to_string(),
            })?;
        Ok(StoredRecord {
            record,
            revision: Revision::new(self.revision),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttachmentRow {
    name: String,
    content_type: String,
    data: Vec<u8>,
}

/// Indexed columns derived from a record on every write.
struct Columns {
    kind: &'static str,
    no_barcode: Option<String>,
    card_number: Option<String>,
    plate_lower: Option<String>,
    status: i64,
    entry_time: String,
    exit_time: Option<String>,
    body: String,
}

impl Columns {
    fn derive(record: &TransactionRecord) -> StoreResult<Self> {
        let body = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            id: record.id.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            kind: record.kind.as_str(),
            no_barcode: record.barcode().map(str::to_string),
            card_number: record.card_number().map(str::to_string),
            plate_lower: record.plate_lower(),
            status: i64::from(record.status.to_u8()),
            entry_time: timestamp(record.entry_time),
            exit_time: record.exit_time.map(timestamp),
            body,
        })
    }
}

/// Fixed-width UTC timestamps so that text comparison orders instants.
fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn revision_suffix() -> String {
    Uuid::new_v4().simple().to_string()
}

/// SQLite implementation of [`TransactionStore`].
///
/// Each request runs under a deadline; a request that exceeds it fails with
/// [`StoreError::Unavailable`]. Writes touching a member entry invalidate the
/// card in the attached [`MemberCache`].
///
/// # Examples
///
/// ```no_run
/// use exitgate_storage::{Database, DesignDoc, SqliteTransactionStore, TransactionStore, ViewQuery};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let db = Database::in_memory().await?;
/// let store = SqliteTransactionStore::new(db, Duration::from_secs(2));
/// store.ensure_design_doc(&DesignDoc::exit_lane()).await?;
///
/// let open = store.query(&ViewQuery::ByBarcode("IMGTEST001".into())).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqliteTransactionStore {
    db: Database,
    request_timeout: Duration,
    cache: Option<Arc<MemberCache>>,
}

impl SqliteTransactionStore {
    pub fn new(db: Database, request_timeout: Duration) -> Self {
        Self {
            db,
            request_timeout,
            cache: None,
        }
    }

    /// Open the database configured in the `store` section.
    pub async fn from_config(config: &LaneConfig) -> StoreResult<Self> {
        let db = Database::new(DatabaseConfig::from(&config.store)).await?;
        Ok(Self::new(db, config.store_timeout()))
    }

    /// Invalidate member cards in `cache` whenever their entry is written.
    pub fn with_member_cache(mut self, cache: Arc<MemberCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn deadline<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "store request exceeded its deadline"
                );
                Err(StoreError::Unavailable(format!(
                    "{operation} exceeded {} ms deadline",
                    self.request_timeout.as_millis()
                )))
            }
        }
    }

    fn invalidate_member(&self, record: &TransactionRecord) {
        if let (Some(cache), RecordKind::MemberEntry) = (&self.cache, record.kind) {
            cache.invalidate(&record.identifier);
        }
    }

    async fn fetch(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, revision, body FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(DocumentRow::decode).transpose()
    }

    async fn fetch_all(&self, query: &ViewQuery) -> StoreResult<Vec<StoredRecord>> {
        let rows = match query {
            ViewQuery::ByBarcode(barcode) => {
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT id, revision, body FROM documents
                     WHERE kind = 'parking_transaction' AND no_barcode = ?
                     ORDER BY entry_time DESC",
                )
                .bind(barcode)
                .fetch_all(self.db.pool())
                .await?
            }
            ViewQuery::ByCardNumber(card) => {
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT id, revision, body FROM documents
                     WHERE kind = 'member_entry' AND card_number = ?
                     ORDER BY entry_time DESC",
                )
                .bind(card)
                .fetch_all(self.db.pool())
                .await?
            }
            ViewQuery::ActiveByType { kind, key } => {
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT id, revision, body FROM documents
                     WHERE kind = ? AND status = 0 AND (? IS NULL OR identifier = ?)
                     ORDER BY entry_time DESC",
                )
                .bind(kind.as_str())
                .bind(key.as_deref())
                .bind(key.as_deref())
                .fetch_all(self.db.pool())
                .await?
            }
            ViewQuery::UniversalSearch { kind, attr, value } => {
                let kind = kind.map(|k| k.as_str());
                let attr = attr.map(|a| a.as_str());
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT id, revision, body FROM documents
                     WHERE id IN (
                         SELECT doc_id FROM search_keys
                         WHERE value = ?
                           AND (? IS NULL OR kind = ?)
                           AND (? IS NULL OR attr = ?)
                     )
                     ORDER BY entry_time DESC",
                )
                .bind(value.to_lowercase())
                .bind(kind)
                .bind(kind)
                .bind(attr)
                .bind(attr)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.into_iter().map(DocumentRow::decode).collect()
    }

    async fn current_revision(&self, id: &str) -> StoreResult<Option<String>> {
        let revision: Option<(String,)> =
            sqlx::query_as("SELECT revision FROM documents WHERE id = ?")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(revision.map(|(r,)| r))
    }

    async fn write_search_keys(
        tx: &mut Transaction<'_, Sqlite>,
        record: &TransactionRecord,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM search_keys WHERE doc_id = ?")
            .bind(&record.id)
            .execute(&mut **tx)
            .await?;

        for (kind, attr, value) in search_keys(record) {
            sqlx::query("INSERT INTO search_keys (doc_id, kind, attr, value) VALUES (?, ?, ?, ?)")
                .bind(&record.id)
                .bind(kind.as_str())
                .bind(attr.as_str())
                .bind(value)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn update_document<F>(
        &self,
        id: &str,
        expected: &Revision,
        mutator: F,
    ) -> StoreResult<StoredRecord>
    where
        F: FnOnce(&mut TransactionRecord) -> exitgate_core::Result<()> + Send,
    {
        let current = self
            .fetch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if current.revision != *expected {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected: expected.to_string(),
                actual: current.revision.to_string(),
            });
        }

        let mut next = current.record.clone();
        mutator(&mut next)?;
        current.record.validate_change(&next)?;

        let revision = Revision::next(Some(expected), &revision_suffix());
        let columns = Columns::derive(&next)?;

        // the conditional UPDATE is the first statement so the write lock is
        // taken up front and the revision check is atomic with the write
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE documents
             SET no_barcode = ?, card_number = ?, plate_lower = ?, member_id = ?,
                 status = ?, exit_time = ?, exit_fee = ?, revision = ?, body = ?,
                 updated_at = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(&columns.no_barcode)
        .bind(&columns.card_number)
        .bind(&columns.plate_lower)
        .bind(&next.member_id)
        .bind(columns.status)
        .bind(&columns.exit_time)
        .bind(next.exit_fee)
        .bind(revision.as_str())
        .bind(&columns.body)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            let actual = self.current_revision(id).await?;
            return Err(match actual {
                Some(actual) => StoreError::Conflict {
                    id: id.to_string(),
                    expected: expected.to_string(),
                    actual,
                },
                None => StoreError::NotFound(id.to_string()),
            });
        }

        Self::write_search_keys(&mut tx, &next).await?;
        tx.commit().await?;

        self.invalidate_member(&next);
        debug!(id, revision = %revision, status = %next.status, "document updated");

        Ok(StoredRecord {
            record: next,
            revision,
        })
    }

    async fn store_attachment(
        &self,
        id: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreResult<Revision> {
        let mut last_seen = String::new();

        for _ in 0..ATTACHMENT_CAS_ATTEMPTS {
            let current = self
                .fetch(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let revision = Revision::next(Some(&current.revision), &revision_suffix());

            let mut tx = self.db.pool().begin().await?;
            let bumped = sqlx::query(
                "UPDATE documents SET revision = ?, updated_at = ?
                 WHERE id = ? AND revision = ?",
            )
            .bind(revision.as_str())
            .bind(timestamp(Utc::now()))
            .bind(id)
            .bind(current.revision.as_str())
            .execute(&mut *tx)
            .await?;

            if bumped.rows_affected() == 0 {
                tx.rollback().await?;
                last_seen = current.revision.to_string();
                debug!(id, name, "attachment raced a concurrent write, retrying");
                continue;
            }

            sqlx::query(
                "INSERT INTO attachments (doc_id, name, content_type, length, data)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (doc_id, name) DO UPDATE SET
                     content_type = excluded.content_type,
                     length = excluded.length,
                     data = excluded.data",
            )
            .bind(id)
            .bind(name)
            .bind(content_type)
            .bind(data.len() as i64)
            .bind(data.as_ref())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            self.invalidate_member(&current.record);
            debug!(id, name, bytes = data.len(), revision = %revision, "attachment stored");
            return Ok(revision);
        }

        let actual = self.current_revision(id).await?.unwrap_or_default();
        Err(StoreError::Conflict {
            id: id.to_string(),
            expected: last_seen,
            actual,
        })
    }

    async fn load_attachment(&self, id: &str, name: &str) -> StoreResult<Option<Attachment>> {
        let row = sqlx::query_as::<_, AttachmentRow>(
            "SELECT name, content_type, data FROM attachments WHERE doc_id = ? AND name = ?",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| Attachment {
            name: row.name,
            content_type: row.content_type,
            data: Bytes::from(row.data),
        }))
    }

    async fn register_design_doc(&self, doc: &DesignDoc) -> StoreResult<Revision> {
        let views = serde_json::to_string(&doc.views).map_err(|e| StoreError::Corrupt {
            id: doc.name.clone(),
            message: e.to_string(),
        })?;

        let mut tx = self.db.pool().begin().await?;
        for view in &doc.views {
            for ddl in view.index_ddl() {
                sqlx::query(ddl).execute(&mut *tx).await?;
            }
        }

        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT views, revision FROM design_documents WHERE name = ?")
                .bind(&doc.name)
                .fetch_optional(&mut *tx)
                .await?;

        let revision = match existing {
            Some((stored, revision)) if stored == views => Revision::new(revision),
            existing => {
                let previous = existing.map(|(_, revision)| Revision::new(revision));
                let revision = Revision::next(previous.as_ref(), &revision_suffix());
                sqlx::query(
                    "INSERT INTO design_documents (name, views, revision, updated_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT (name) DO UPDATE SET
                         views = excluded.views,
                         revision = excluded.revision,
                         updated_at = excluded.updated_at",
                )
                .bind(&doc.name)
                .bind(&views)
                .bind(revision.as_str())
                .bind(timestamp(Utc::now()))
                .execute(&mut *tx)
                .await?;
                debug!(name = %doc.name, views = %views, "design document registered");
                revision
            }
        };
        tx.commit().await?;

        Ok(revision)
    }

    async fn insert_document(&self, record: &TransactionRecord) -> StoreResult<Revision> {
        record.validate()?;
        let revision = Revision::next(None, &revision_suffix());
        let columns = Columns::derive(record)?;

        let mut tx = self.db.pool().begin().await?;
        sqlx::query(
            "INSERT INTO documents (
                 id, kind, identifier, no_barcode, card_number, plate_lower, member_id,
                 status, entry_time, exit_time, exit_fee, revision, body, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(columns.kind)
        .bind(&record.identifier)
        .bind(&columns.no_barcode)
        .bind(&columns.card_number)
        .bind(&columns.plate_lower)
        .bind(&record.member_id)
        .bind(columns.status)
        .bind(&columns.entry_time)
        .bind(&columns.exit_time)
        .bind(record.exit_fee)
        .bind(revision.as_str())
        .bind(&columns.body)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Duplicate(_) => StoreError::Duplicate(record.id.clone()),
            other => other,
        })?;

        Self::write_search_keys(&mut tx, record).await?;
        tx.commit().await?;

        self.invalidate_member(record);
        debug!(id = %record.id, kind = %record.kind.as_str(), "document inserted");
        Ok(revision)
    }

    async fn summarize(&self, since: DateTime<Utc>) -> StoreResult<ExitSummary> {
        let (exits, revenue): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(exit_fee), 0) FROM documents
             WHERE status = 1 AND exit_time >= ?",
        )
        .bind(timestamp(since))
        .fetch_one(self.db.pool())
        .await?;

        Ok(ExitSummary {
            exits: exits.max(0) as u64,
            revenue,
        })
    }
}

impl TransactionStore for SqliteTransactionStore {
    async fn get(&self, id: &str) -> StoreResult<StoredRecord> {
        self.deadline("get", async {
            self.fetch(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
        .await
    }

    async fn query(&self, query: &ViewQuery) -> StoreResult<Vec<StoredRecord>> {
        self.deadline("query", self.fetch_all(query)).await
    }

    async fn update<F>(
        &self,
        id: &str,
        expected: &Revision,
        mutator: F,
    ) -> StoreResult<StoredRecord>
    where
        F: FnOnce(&mut TransactionRecord) -> exitgate_core::Result<()> + Send,
    {
        self.deadline("update", self.update_document(id, expected, mutator))
            .await
    }

    async fn put_attachment(
        &self,
        id: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreResult<Revision> {
        self.deadline(
            "put_attachment",
            self.store_attachment(id, name, data, content_type),
        )
        .await
    }

    async fn get_attachment(&self, id: &str, name: &str) -> StoreResult<Option<Attachment>> {
        self.deadline("get_attachment", self.load_attachment(id, name))
            .await
    }

    async fn ensure_design_doc(&self, doc: &DesignDoc) -> StoreResult<Revision> {
        self.deadline("ensure_design_doc", self.register_design_doc(doc))
            .await
    }

    async fn insert(&self, record: &TransactionRecord) -> StoreResult<Revision> {
        self.deadline("insert", self.insert_document(record)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.deadline("ping", self.db.health_check()).await
    }

    async fn exit_summary(&self, since: DateTime<Utc>) -> StoreResult<ExitSummary> {
        self.deadline("exit_summary", self.summarize(since)).await
    }
}
