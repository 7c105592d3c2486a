//! Generic LRU cache with an entry cap and lazy, creation-anchored TTL expiry.
//!
//! [`BoundedCache`] keeps no statistics. Every mutating call reports what it
//! removed ([`Lookup::Expired`], [`SetOutcome`], the entries returned by
//! [`BoundedCache::prune`]) so the owning layer can count evictions and
//! expirations and emit events.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use crate::clock::Clock;

/// A single cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub access_count: u64,
}

impl<K, V> CacheEntry<K, V> {
    pub fn new(key: K, value: V, now: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            created_at: now,
            last_access_at: now,
            access_count: 0,
        }
    }

    /// An entry is expired once its age is strictly greater than the TTL.
    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            Some(ttl) => now - self.created_at > ttl,
            None => false,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_at = now;
        self.access_count += 1;
    }
}

/// Result of [`BoundedCache::lookup`].
#[derive(Debug)]
pub enum Lookup<'a, K, V> {
    Hit(&'a CacheEntry<K, V>),
    Miss,
    /// The key was present but past its TTL; it has been removed.
    Expired(CacheEntry<K, V>),
}

/// What a [`BoundedCache::set`] displaced.
#[derive(Debug)]
pub struct SetOutcome<K, V> {
    /// `true` when a live entry with the same key was overwritten in place.
    pub replaced: bool,
    /// A same-key entry that had already expired and was dropped before insert.
    pub expired: Option<CacheEntry<K, V>>,
    /// Entries removed for capacity, least recently used first.
    pub evicted: Vec<CacheEntry<K, V>>,
}

impl<K, V> Default for SetOutcome<K, V> {
    fn default() -> Self {
        Self {
            replaced: false,
            expired: None,
            evicted: Vec::new(),
        }
    }
}

pub struct BoundedCache<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<K, V>>,
    max_size: usize,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// `ttl_ms == 0` disables expiry, as does a TTL too large to represent.
    pub fn new(max_size: usize, ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        let ttl = i64::try_from(ttl_ms)
            .ok()
            .filter(|&ms| ms > 0)
            .and_then(Duration::try_milliseconds);
        Self {
            // Capacity is enforced by `set`, not by the lru crate.
            entries: LruCache::unbounded(),
            max_size,
            ttl,
            clock,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn lookup<Q>(&mut self, key: &Q) -> Lookup<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let ttl = self.ttl;

        let expired = match self.entries.peek(key) {
            None => return Lookup::Miss,
            Some(entry) => entry.is_expired(ttl, now),
        };
        if expired {
            return match self.entries.pop(key) {
                Some(entry) => Lookup::Expired(entry),
                None => Lookup::Miss,
            };
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                Lookup::Hit(entry)
            }
            None => Lookup::Miss,
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.lookup(key) {
            Lookup::Hit(entry) => Some(&entry.value),
            Lookup::Miss | Lookup::Expired(_) => None,
        }
    }

    /// Existence check without a recency bump. An expired entry is removed
    /// and returned as `Err` so the caller can account for it.
    pub fn contains<Q>(&mut self, key: &Q) -> Result<bool, CacheEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let expired = match self.entries.peek(key) {
            None => return Ok(false),
            Some(entry) => entry.is_expired(self.ttl, now),
        };
        if expired {
            return match self.entries.pop(key) {
                Some(entry) => Err(entry),
                None => Ok(false),
            };
        }
        Ok(true)
    }

    pub fn has<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.contains(key).unwrap_or(false)
    }

    /// Insert or overwrite `key`.
    ///
    /// A live key keeps its `created_at` and is moved to the MRU end without
    /// evicting anything. A new key first evicts from the LRU end while the
    /// cache is full. With `max_size == 0` the new entry itself is evicted.
    pub fn set(&mut self, key: K, value: V) -> SetOutcome<K, V> {
        let now = self.clock.now();
        let mut outcome = SetOutcome::default();

        match self.contains(&key) {
            Ok(true) => {
                // get_mut also promotes the entry to MRU.
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.value = value;
                    entry.last_access_at = now;
                }
                outcome.replaced = true;
                return outcome;
            }
            Ok(false) => {}
            Err(expired) => outcome.expired = Some(expired),
        }

        self.insert_entry(CacheEntry::new(key, value, now), &mut outcome.evicted);
        outcome
    }

    /// Re-insert a previously exported entry, keeping its timestamps and
    /// access count. Any existing entry for the key is replaced.
    pub fn restore(&mut self, entry: CacheEntry<K, V>) -> SetOutcome<K, V> {
        let mut outcome = SetOutcome::default();
        if self.entries.pop(&entry.key).is_some() {
            outcome.replaced = true;
        }
        self.insert_entry(entry, &mut outcome.evicted);
        outcome
    }

    fn insert_entry(&mut self, entry: CacheEntry<K, V>, evicted: &mut Vec<CacheEntry<K, V>>) {
        while !self.entries.is_empty() && self.entries.len() >= self.max_size {
            match self.entries.pop_lru() {
                Some((_, old)) => evicted.push(old),
                None => break,
            }
        }
        if self.max_size == 0 {
            evicted.push(entry);
            return;
        }
        self.entries.put(entry.key.clone(), entry);
    }

    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.pop(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every expired entry and return them.
    pub fn prune(&mut self) -> Vec<CacheEntry<K, V>> {
        if self.ttl.is_none() {
            return Vec::new();
        }
        let now = self.clock.now();
        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| self.entries.pop(&key))
            .collect()
    }

    /// Live entries as a snapshot, least recently used first.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.live_entries()
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect()
    }

    /// Live entries with bookkeeping, least recently used first.
    pub fn live_entries(&self) -> Vec<CacheEntry<K, V>> {
        self.iter_live().cloned().collect()
    }

    /// Borrowing iterator over live entries, least recently used first.
    pub fn iter_live(&self) -> impl Iterator<Item = &CacheEntry<K, V>> + '_ {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.entries
            .iter()
            .rev()
            .map(|(_, entry)| entry)
            .filter(move |entry| !entry.is_expired(ttl, now))
    }
}
