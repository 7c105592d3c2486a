//! Caching layers.
//!
//! - [`bounded`]: generic LRU + TTL map with no statistics
//! - [`embedding`]: the embedding cache: counters, events, snapshots
//! - [`events`]: change-notification types
//! - [`snapshot`]: versioned snapshot format and atomic file store

pub mod bounded;
pub mod embedding;
pub mod events;
pub mod snapshot;

pub use bounded::{BoundedCache, CacheEntry, Lookup, SetOutcome};
pub use embedding::{CacheStatistics, EmbeddingCache, ExportedEntry};
pub use events::{CacheEvent, CacheEventKind, CacheListener};
pub use snapshot::{FileSnapshotStore, Snapshot, SnapshotEntry, SnapshotStore, SNAPSHOT_VERSION};
