//! Member cache: card number -> open member entry.
//!
//! A bounded LRU map with a sliding TTL. Entries live in a slab-backed
//! doubly-linked list ordered from least to most recently used, indexed by a
//! hash map, so every operation is O(1). One mutex guards the whole structure
//! and is never held across an await point.
//!
//! An entry is valid while `now - last_access < ttl`. A `get` that finds an
//! expired entry removes it and reports a miss.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use exitgate_core::{CacheConfig, MemberRecord};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    /// Hits over lookups, in percent.
    pub hit_rate: f64,
}

#[derive(Debug)]
struct Node {
    key: String,
    value: MemberRecord,
    inserted_at: Instant,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    /// Least recently used.
    head: Option<usize>,
    /// Most recently used.
    tail: Option<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn node(&self, slot: usize) -> &Node {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("linked slot {slot} is empty"))
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked slot {slot} is empty"))
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(slot);
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => self.node_mut(t).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn remove_slot(&mut self, slot: usize) -> Node {
        self.unlink(slot);
        let node = self.slots[slot]
            .take()
            .unwrap_or_else(|| unreachable!("removing empty slot {slot}"));
        self.index.remove(&node.key);
        self.free.push(slot);
        node
    }

    fn insert_new(&mut self, node: Node) -> usize {
        let key = node.key.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_back(slot);
        slot
    }

    fn clear(&mut self) -> usize {
        let removed = self.index.len();
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        removed
    }
}

/// Thread-safe bounded cache of open member entries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use exitgate_core::{MemberRecord, RecordStatus};
/// use exitgate_storage::MemberCache;
///
/// let cache = MemberCache::new(1000, Duration::from_secs(300));
/// cache.put(MemberRecord {
///     card_number: "MCARD42".into(),
///     member_id: "MEM-42".into(),
///     plate: None,
///     entry_time: Utc::now(),
///     record_id: "member_entry_MCARD42_1".into(),
///     status: RecordStatus::Open,
/// });
///
/// assert!(cache.get("MCARD42").is_some());
/// assert_eq!(cache.stats().hits, 1);
/// ```
#[derive(Debug)]
pub struct MemberCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl MemberCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, Duration::from_secs(config.ttl))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // no method panics while holding the lock with the list half-linked
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expired(&self, node: &Node, now: Instant) -> bool {
        now.saturating_duration_since(node.last_access) >= self.ttl
    }

    /// Look up a card; a hit becomes most recently used and refreshes its TTL.
    pub fn get(&self, card_number: &str) -> Option<MemberRecord> {
        let now = Instant::now();
        let mut inner = self.lock();

        let Some(&slot) = inner.index.get(card_number) else {
            inner.misses += 1;
            debug!(card = card_number, "member cache miss");
            return None;
        };

        if self.expired(inner.node(slot), now) {
            inner.remove_slot(slot);
            inner.misses += 1;
            debug!(card = card_number, "member cache entry expired");
            return None;
        }

        inner.hits += 1;
        inner.unlink(slot);
        inner.push_back(slot);
        let node = inner.node_mut(slot);
        node.last_access = now;
        debug!(card = card_number, "member cache hit");
        Some(node.value.clone())
    }

    /// Insert or replace the entry for `record.card_number`.
    ///
    /// At capacity the least recently used entry is evicted first.
    pub fn put(&self, record: MemberRecord) {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(&slot) = inner.index.get(&record.card_number) {
            inner.unlink(slot);
            inner.push_back(slot);
            let node = inner.node_mut(slot);
            node.value = record;
            node.inserted_at = now;
            node.last_access = now;
            return;
        }

        if inner.index.len() >= self.capacity
            && let Some(lru) = inner.head
        {
            let evicted = inner.remove_slot(lru);
            inner.evictions += 1;
            debug!(card = %evicted.key, "member cache eviction");
        }

        inner.insert_new(Node {
            key: record.card_number.clone(),
            value: record,
            inserted_at: now,
            last_access: now,
            prev: None,
            next: None,
        });
    }

    /// Remove one card; returns `true` if it was cached.
    pub fn invalidate(&self, card_number: &str) -> bool {
        let mut inner = self.lock();
        match inner.index.get(card_number).copied() {
            Some(slot) => {
                inner.remove_slot(slot);
                debug!(card = card_number, "member cache invalidated");
                true
            }
            None => false,
        }
    }

    /// Remove every entry; returns how many were cached.
    pub fn invalidate_all(&self) -> usize {
        let removed = self.lock().clear();
        debug!(removed, "member cache cleared");
        removed
    }

    /// Warm the cache; returns the number of records inserted.
    pub fn preload(&self, records: impl IntoIterator<Item = MemberRecord>) -> usize {
        let mut loaded = 0;
        for record in records {
            if record.status.is_open() {
                self.put(record);
                loaded += 1;
            }
        }
        loaded
    }

    /// Drop expired entries; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired: Vec<usize> = inner
            .index
            .values()
            .copied()
            .filter(|&slot| self.expired(inner.node(slot), now))
            .collect();
        for &slot in &expired {
            inner.remove_slot(slot);
        }
        expired.len()
    }

    /// Age of an entry since it was inserted or replaced.
    pub fn age(&self, card_number: &str) -> Option<Duration> {
        let inner = self.lock();
        let slot = *inner.index.get(card_number)?;
        Some(inner.node(slot).inserted_at.elapsed())
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 * 100.0 / lookups as f64
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.index.len(),
            capacity: self.capacity,
            hit_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
