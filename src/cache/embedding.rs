//! Embedding cache with statistics, change events and optional snapshots.
//!
//! [`EmbeddingCache`] wraps a [`BoundedCache`] keyed by `kind:text`. All state
//! lives behind one `std::sync::Mutex` that is held only for in-memory work,
//! never across an `.await`, so each operation is indivisible with respect to
//! the others. Listener callbacks run after the lock is released.
//!
//! When persistence is enabled, [`EmbeddingCache::open`] restores the last
//! snapshot and starts a background flusher that writes a new snapshot every
//! `flush_interval_ms`, but only if something changed since the last write.
//! Snapshot failures are logged and otherwise ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::bounded::{BoundedCache, CacheEntry, Lookup, SetOutcome};
use super::events::{CacheEvent, CacheEventKind, CacheListener};
use super::snapshot::{FileSnapshotStore, Snapshot, SnapshotEntry, SnapshotStore};
use crate::clock::{system_clock, Clock};
use crate::config::CacheConfig;
use crate::embedding::types::{CachedEmbedding, EmbeddingKind};

/// Fixed per-entry cost added to the memory estimate (map node, timestamps, counters).
pub const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    /// Live entries. Expired entries not yet swept are not counted.
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub estimated_memory_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub last_access_at: Option<DateTime<Utc>>,
}

/// A live entry as produced by [`EmbeddingCache::export`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub key: String,
    pub value: CachedEmbedding,
    #[serde(default)]
    pub access_count: u64,
}

struct CacheState {
    entries: BoundedCache<String, CachedEmbedding>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    created_at: DateTime<Utc>,
    last_access_at: Option<DateTime<Utc>>,
    /// Entries changed since the last successful flush.
    dirty: bool,
}

impl CacheState {
    fn record_set(&mut self, key: &str, outcome: SetOutcome<String, CachedEmbedding>, events: &mut Vec<CacheEvent>) {
        if let Some(expired) = outcome.expired {
            self.expirations += 1;
            events.push(CacheEvent::keyed(CacheEventKind::Expire, expired.key));
        }
        for evicted in outcome.evicted {
            self.evictions += 1;
            tracing::debug!(key = %evicted.key, "evicted least recently used embedding");
            events.push(CacheEvent::keyed(CacheEventKind::Evict, evicted.key));
        }
        events.push(CacheEvent::keyed(CacheEventKind::Set, key));
        self.dirty = true;
    }

    fn record_expired(&mut self, key: String, events: &mut Vec<CacheEvent>) {
        self.expirations += 1;
        self.dirty = true;
        events.push(CacheEvent::keyed(CacheEventKind::Expire, key));
    }

    /// Live-key check that accounts for an entry expiring under it.
    fn check_live(&mut self, key: &str, events: &mut Vec<CacheEvent>) -> bool {
        match self.entries.contains(key) {
            Ok(live) => live,
            Err(expired) => {
                self.record_expired(expired.key, events);
                false
            }
        }
    }

    fn prune(&mut self, events: &mut Vec<CacheEvent>) -> usize {
        let removed = self.entries.prune();
        let count = removed.len();
        for entry in removed {
            self.record_expired(entry.key, events);
        }
        count
    }

    fn estimated_memory_bytes(&self) -> usize {
        self.entries
            .iter_live()
            .map(|entry| {
                let chars = entry.key.chars().count() + entry.value.source_text.chars().count();
                2 * chars + 8 * entry.value.dimensions + ENTRY_OVERHEAD_BYTES
            })
            .sum()
    }

    fn snapshot(&self) -> Snapshot {
        let entries = self
            .entries
            .iter_live()
            .map(|entry| SnapshotEntry {
                key: entry.key.clone(),
                value: entry.value.clone(),
                created_at: entry.created_at,
                access_count: entry.access_count,
            })
            .collect();
        Snapshot::new(self.entries.now(), entries)
    }
}

pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    listeners: RwLock<Vec<Arc<dyn CacheListener>>>,
    store: Option<Arc<dyn SnapshotStore>>,
    flush_interval: std::time::Duration,
    flush_lock: tokio::sync::Mutex<()>,
    flusher: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.statistics();
        f.debug_struct("EmbeddingCache")
            .field("size", &stats.size)
            .field("max_size", &stats.max_size)
            .field("hits", &stats.hits)
            .field("misses", &stats.misses)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    /// In-memory cache using the system clock. Persistence settings are ignored.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// In-memory cache with an injected clock.
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, clock, None)
    }

    fn build(
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let created_at = clock.now();
        Self {
            state: Mutex::new(CacheState {
                entries: BoundedCache::new(config.max_size, config.ttl_ms, clock),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
                created_at,
                last_access_at: None,
                dirty: false,
            }),
            listeners: RwLock::new(Vec::new()),
            store,
            flush_interval: std::time::Duration::from_millis(config.flush_interval_ms.max(1)),
            flush_lock: tokio::sync::Mutex::new(()),
            flusher: Mutex::new(None),
        }
    }

    /// Build a cache from config. With `persistent = true` this restores the
    /// snapshot at `snapshot_path` and starts the periodic flusher.
    pub async fn open(config: &CacheConfig) -> Arc<Self> {
        let store: Option<Arc<dyn SnapshotStore>> = if config.persistent {
            Some(Arc::new(FileSnapshotStore::new(config.resolved_snapshot_path())))
        } else {
            None
        };
        Self::open_with(config, store, system_clock()).await
    }

    /// Like [`open`](Self::open) with an explicit store and clock.
    pub async fn open_with(
        config: &CacheConfig,
        store: Option<Arc<dyn SnapshotStore>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let cache = Arc::new(Self::build(config, clock, store));
        if cache.store.is_some() {
            cache.load_snapshot().await;
            cache.start_flusher();
        }
        cache
    }

    /// Compose the cache key for a `(kind, text)` pair.
    pub fn key_for(kind: EmbeddingKind, text: &str) -> String {
        format!("{}:{}", kind.as_str(), text)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the state lock, then deliver the events it produced.
    fn with_state<R>(&self, f: impl FnOnce(&mut CacheState, &mut Vec<CacheEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            f(&mut state, &mut events)
        };
        self.emit(&events);
        result
    }

    fn emit(&self, events: &[CacheEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn CacheListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for event in events {
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CacheListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Register a closure as a listener.
    pub fn on_update<F>(&self, f: F)
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(f));
    }

    pub fn get(&self, key: &str) -> Option<CachedEmbedding> {
        self.with_state(|state, events| {
            state.last_access_at = Some(state.entries.now());
            let (value, expired) = match state.entries.lookup(key) {
                Lookup::Hit(entry) => (Some(entry.value.clone()), None),
                Lookup::Miss => (None, None),
                Lookup::Expired(entry) => (None, Some(entry.key)),
            };
            if let Some(expired_key) = expired {
                state.record_expired(expired_key, events);
            }
            match value {
                Some(value) => {
                    state.hits += 1;
                    events.push(CacheEvent::keyed(CacheEventKind::GetHit, key));
                    Some(value)
                }
                None => {
                    state.misses += 1;
                    events.push(CacheEvent::keyed(CacheEventKind::GetMiss, key));
                    None
                }
            }
        })
    }

    pub fn set(&self, key: impl Into<String>, value: CachedEmbedding) {
        let key = key.into();
        self.with_state(|state, events| {
            let outcome = state.entries.set(key.clone(), value);
            state.record_set(&key, outcome, events);
        })
    }

    /// Existence check with expiry semantics. Does not count as a hit or miss.
    pub fn has(&self, key: &str) -> bool {
        self.with_state(|state, events| state.check_live(key, events))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.with_state(|state, events| {
            let removed = state.entries.delete(key);
            if removed {
                state.dirty = true;
                events.push(CacheEvent::keyed(CacheEventKind::Delete, key));
            }
            removed
        })
    }

    /// Remove all entries and reset the counters.
    pub fn clear(&self) {
        self.with_state(|state, events| {
            state.entries.clear();
            state.hits = 0;
            state.misses = 0;
            state.evictions = 0;
            state.expirations = 0;
            state.dirty = true;
            events.push(CacheEvent::clear());
        })
    }

    /// Sweep expired entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let removed = self.with_state(|state, events| state.prune(events));
        if removed > 0 {
            tracing::debug!(removed, "pruned expired embeddings");
        }
        removed
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.lock().entries.max_size()
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn statistics(&self) -> CacheStatistics {
        let state = self.lock();
        let requests = state.hits + state.misses;
        CacheStatistics {
            size: state.entries.iter_live().count(),
            max_size: state.entries.max_size(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if requests == 0 {
                0.0
            } else {
                state.hits as f64 / requests as f64
            },
            evictions: state.evictions,
            expirations: state.expirations,
            estimated_memory_bytes: state.estimated_memory_bytes(),
            created_at: state.created_at,
            last_access_at: state.last_access_at,
        }
    }

    /// Live entries, least recently used first.
    pub fn export(&self) -> Vec<ExportedEntry> {
        self.lock()
            .entries
            .iter_live()
            .map(|entry| ExportedEntry {
                key: entry.key.clone(),
                value: entry.value.clone(),
                access_count: entry.access_count,
            })
            .collect()
    }

    /// Insert exported entries. Existing keys get the new value but keep their
    /// creation time; new keys are accepted only while there is room. Returns
    /// how many were imported.
    pub fn import(&self, entries: Vec<ExportedEntry>) -> usize {
        self.with_state(|state, events| {
            state.prune(events);
            let mut imported = 0;
            for exported in entries {
                let key = exported.key.clone();
                let outcome = if state.check_live(&key, events) {
                    // Overwrite in place; the entry keeps its created_at.
                    state.entries.set(exported.key, exported.value)
                } else if state.entries.len() >= state.entries.max_size() {
                    continue;
                } else {
                    let now = state.entries.now();
                    state.entries.restore(CacheEntry {
                        key: exported.key,
                        value: exported.value,
                        created_at: now,
                        last_access_at: now,
                        access_count: exported.access_count,
                    })
                };
                state.record_set(&key, outcome, events);
                imported += 1;
            }
            imported
        })
    }

    /// Live entries as a versioned snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    /// Restore entries from `snapshot`, skipping those older than the TTL and
    /// stopping once the cache is full. The most recently used entries win.
    /// Returns the number restored.
    pub fn restore_snapshot(&self, snapshot: Snapshot) -> usize {
        let mut state = self.lock();
        let now = state.entries.now();
        let ttl = state.entries.ttl();
        let room = state.entries.max_size().saturating_sub(state.entries.len());

        // Snapshots are ordered LRU -> MRU; scan from the recent end.
        let total = snapshot.entries.len();
        let mut kept: Vec<SnapshotEntry> = Vec::with_capacity(room.min(total));
        let mut aged_out = 0;
        for entry in snapshot.entries.into_iter().rev() {
            if kept.len() >= room {
                break;
            }
            if ttl.is_some_and(|ttl| now - entry.created_at > ttl) {
                aged_out += 1;
                continue;
            }
            kept.push(entry);
        }

        state.expirations += aged_out;
        // Anything left behind must also leave the stored snapshot.
        if kept.len() < total {
            state.dirty = true;
        }

        let mut restored = 0;
        for entry in kept.into_iter().rev() {
            state.entries.restore(CacheEntry {
                key: entry.key,
                value: entry.value,
                created_at: entry.created_at,
                last_access_at: entry.created_at,
                access_count: entry.access_count,
            });
            restored += 1;
        }
        restored
    }

    async fn load_snapshot(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let location = store.describe();
        let loaded = tokio::task::spawn_blocking(move || store.load()).await;

        match loaded {
            Ok(Ok(Some(snapshot))) => {
                let total = snapshot.entries.len();
                let restored = self.restore_snapshot(snapshot);
                tracing::info!(
                    path = %location,
                    restored,
                    discarded = total - restored,
                    "embedding cache snapshot loaded"
                );
            }
            Ok(Ok(None)) => {
                tracing::info!(path = %location, "no embedding cache snapshot, starting empty");
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %location, error = %e, "failed to load cache snapshot");
            }
            Err(e) => {
                tracing::warn!(path = %location, error = %e, "snapshot load task failed");
            }
        }
    }

    /// Write a snapshot if anything changed since the last flush.
    ///
    /// Returns `true` when a snapshot was written. Failures are logged and
    /// leave the cache dirty so the next flush retries.
    pub async fn flush(&self) -> bool {
        let Some(store) = self.store.clone() else {
            return false;
        };
        let _guard = self.flush_lock.lock().await;

        let snapshot = {
            let mut state = self.lock();
            if !state.dirty {
                return false;
            }
            state.dirty = false;
            state.snapshot()
        };
        let entries = snapshot.entries.len();
        let location = store.describe();

        let saved = tokio::task::spawn_blocking(move || store.save(&snapshot)).await;
        match saved {
            Ok(Ok(())) => {
                tracing::debug!(path = %location, entries, "embedding cache flushed");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %location, error = %e, "failed to write cache snapshot");
                self.lock().dirty = true;
                false
            }
            Err(e) => {
                tracing::warn!(path = %location, error = %e, "snapshot write task failed");
                self.lock().dirty = true;
                false
            }
        }
    }

    fn start_flusher(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.flush_interval;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.flush().await;
            }
        });

        *self.flusher.lock().unwrap_or_else(PoisonError::into_inner) = Some((stop_tx, handle));
    }

    /// Stop the periodic flusher and write a final snapshot if dirty.
    pub async fn shutdown(&self) {
        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((stop_tx, handle)) = flusher {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache flusher task failed");
            }
        }
        self.flush().await;
    }
}

impl Drop for EmbeddingCache {
    fn drop(&mut self) {
        if let Some((stop_tx, _)) = self
            .flusher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = stop_tx.send(true);
        }
    }
}
