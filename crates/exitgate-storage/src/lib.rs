//! Storage layer of an exit lane.
//!
//! This crate provides the SQLite-backed document store holding parking
//! transactions and member entries, and the in-memory member cache that keeps
//! open member entries one hash lookup away.
//!
//! # Architecture
//!
//! - [`Database`] - connection pool manager with embedded migrations
//! - [`TransactionStore`] - document store contract (get, view queries,
//!   compare-and-swap update, attachments)
//! - [`SqliteTransactionStore`] - SQLite implementation with per-request deadlines
//! - [`MemberCache`] - bounded LRU map with sliding TTL
//!
//! # Core Concepts
//!
//! ## Documents and revisions
//!
//! Each record is one row whose `body` column holds the record as JSON. The
//! remaining columns are derived from the body on every write and exist only
//! to be indexed. Every write bumps an opaque revision token; writers present
//! the token they read and stale writers get [`StoreError::Conflict`].
//!
//! ## Views
//!
//! Lookups go through named [`View`]s (`by_barcode`, `by_card_number`,
//! `active_by_type`, `universal_search`). A [`DesignDoc`] registers the
//! indexes backing them; registration is idempotent.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use exitgate_storage::{
//!     Database, DatabaseConfig, DesignDoc, MemberCache, SqliteTransactionStore,
//!     TransactionStore, ViewQuery,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("exitgate.db")).await?;
//! let cache = Arc::new(MemberCache::new(1000, Duration::from_secs(300)));
//! let store = SqliteTransactionStore::new(db, Duration::from_secs(2))
//!     .with_member_cache(Arc::clone(&cache));
//!
//! store.ensure_design_doc(&DesignDoc::exit_lane()).await?;
//!
//! for hit in store.query(&ViewQuery::ByBarcode("IMGTEST001".into())).await? {
//!     println!("{} at revision {}", hit.record.id, hit.revision);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod connection;
pub mod error;
pub mod store;
pub mod views;

pub use cache::{CacheStats, MemberCache};
pub use connection::{Database, DatabaseConfig};
pub use error::{StoreError, StoreResult};
pub use store::{Attachment, ExitSummary, SqliteTransactionStore, StoredRecord, TransactionStore};
pub use views::{DesignDoc, SearchAttr, SearchKind, View, ViewQuery};
