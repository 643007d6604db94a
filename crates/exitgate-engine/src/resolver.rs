//! Identifier to open record resolution.
//!
//! Tiers are tried in order and the first OPEN record wins:
//!
//! 1. member cache (member cards only)
//! 2. direct id `transaction_{identifier}`
//! 3. `by_barcode` view (barcodes only)
//! 4. `by_card_number` view (member cards only); a hit warms the cache
//! 5. `universal_search` over every kind and attribute
//!
//! A CLOSED record met on the way is remembered so an exhausted search can
//! report the ticket as already used rather than unknown.

use std::sync::Arc;

use exitgate_core::{Identifier, IdentifierKind};
use exitgate_storage::{MemberCache, StoreError, StoredRecord, TransactionStore, ViewQuery};
use tracing::{debug, warn};

use crate::result::SearchMethod;

/// An OPEN record and how it was found.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub stored: StoredRecord,
    pub method: SearchMethod,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no open record for {0}")]
    NotFound(String),

    #[error("record {record_id} is already closed")]
    AlreadyClosed { record_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolver over a store and an optional member cache.
#[derive(Debug)]
pub struct Resolver<S> {
    store: Arc<S>,
    cache: Option<Arc<MemberCache>>,
}

impl<S> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
        }
    }
}

/// Search state carried across tiers.
#[derive(Default)]
struct Trail {
    closed_seen: Option<String>,
}

impl Trail {
    /// Pick the newest OPEN hit, remembering closed ones.
    fn pick(&mut self, hits: Vec<StoredRecord>, identifier: &Identifier) -> Option<StoredRecord> {
        let mut open = Vec::new();
        for hit in hits {
            if hit.record.is_open() {
                open.push(hit);
            } else if self.closed_seen.is_none()
                && hit.record.identifier.eq_ignore_ascii_case(identifier.as_str())
            {
                self.closed_seen = Some(hit.record.id.clone());
            }
        }

        if open.len() > 1 {
            warn!(
                identifier = %identifier,
                candidates = open.len(),
                "several open records match, taking the newest"
            );
        }
        // views return the newest entry first
        open.into_iter().next()
    }

    fn note(&mut self, stored: &StoredRecord) {
        if !stored.record.is_open() && self.closed_seen.is_none() {
            self.closed_seen = Some(stored.record.id.clone());
        }
    }
}

impl<S: TransactionStore> Resolver<S> {
    pub fn new(store: Arc<S>, cache: Option<Arc<MemberCache>>) -> Self {
        Self { store, cache }
    }

    /// Find the OPEN record of `identifier`.
    ///
    /// # Errors
    ///
    /// `NotFound` / `AlreadyClosed` when the search is exhausted, `Store` as
    /// soon as the store fails (unreachable store aborts the search).
    pub async fn resolve(&self, identifier: &Identifier) -> Result<Resolved, ResolveError> {
        let mut trail = Trail::default();
        let kind = identifier.kind();

        if kind == IdentifierKind::Member
            && let Some(stored) = self.from_cache(identifier, &mut trail).await?
        {
            return Ok(found(stored, SearchMethod::Cache));
        }

        match self.store.get(&identifier.direct_record_id()).await {
            Ok(stored) if stored.record.is_open() => {
                return Ok(found(stored, SearchMethod::DirectId));
            }
            Ok(stored) => trail.note(&stored),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match kind {
            IdentifierKind::Barcode => {
                let hits = self
                    .store
                    .query(&ViewQuery::ByBarcode(identifier.as_str().to_string()))
                    .await?;
                if let Some(stored) = trail.pick(hits, identifier) {
                    return Ok(found(stored, SearchMethod::ViewBarcode));
                }
            }
            IdentifierKind::Member => {
                let hits = self
                    .store
                    .query(&ViewQuery::ByCardNumber(identifier.as_str().to_string()))
                    .await?;
                if let Some(stored) = trail.pick(hits, identifier) {
                    self.warm_cache(&stored);
                    return Ok(found(stored, SearchMethod::ViewCard));
                }
            }
        }

        let hits = self
            .store
            .query(&ViewQuery::universal(&identifier.search_key()))
            .await?;
        if let Some(stored) = trail.pick(hits, identifier) {
            return Ok(found(stored, SearchMethod::Universal));
        }

        Err(match trail.closed_seen {
            Some(record_id) => ResolveError::AlreadyClosed { record_id },
            None => ResolveError::NotFound(identifier.to_string()),
        })
    }

    async fn from_cache(
        &self,
        identifier: &Identifier,
        trail: &mut Trail,
    ) -> Result<Option<StoredRecord>, ResolveError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(member) = cache.get(identifier.as_str()) else {
            return Ok(None);
        };

        match self.store.get(&member.record_id).await {
            Ok(stored) if stored.record.is_open() => Ok(Some(stored)),
            Ok(stored) => {
                debug!(card = %identifier, "cached member entry is no longer open");
                cache.invalidate(identifier.as_str());
                trail.note(&stored);
                Ok(None)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(card = %identifier, "cached member entry vanished");
                cache.invalidate(identifier.as_str());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn warm_cache(&self, stored: &StoredRecord) {
        if let (Some(cache), Some(member)) = (&self.cache, stored.record.to_member_record()) {
            debug!(card = %member.card_number, "member cache populated from view");
            cache.put(member);
        }
    }
}

fn found(stored: StoredRecord, method: SearchMethod) -> Resolved {
    Resolved { stored, method }
}
