mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as TimeDelta;

use embedcache::cache::{FileSnapshotStore, Snapshot, SnapshotEntry, SnapshotStore};
use embedcache::clock::{system_clock, Clock};
use embedcache::config::CacheConfig;
use embedcache::EmbeddingCache;
use helpers::{embedding, manual_clock, persistent_config, BrokenSnapshotStore, MemorySnapshotStore};
use tempfile::TempDir;

/// Flush interval long enough that only explicit flushes write.
const NO_TICK_MS: u64 = 60_000;

#[tokio::test]
async fn snapshot_survives_restart() {
    let store = Arc::new(MemorySnapshotStore::default());
    let config = persistent_config(10, 0, NO_TICK_MS);

    let cache = EmbeddingCache::open_with(&config, Some(store.clone()), system_clock()).await;
    cache.set("document:a", embedding("a"));
    cache.set("document:b", embedding("b"));
    cache.shutdown().await;
    assert_eq!(store.saves(), 1);

    let reopened = EmbeddingCache::open_with(&config, Some(store.clone()), system_clock()).await;
    assert_eq!(reopened.len(), 2);
    assert_eq!(
        reopened.get("document:a").map(|e| e.source_text),
        Some("a".to_string())
    );
    assert!(!reopened.is_dirty());

    // A load alone does not make the cache dirty.
    let untouched = EmbeddingCache::open_with(&config, Some(store.clone()), system_clock()).await;
    untouched.shutdown().await;
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn entries_past_ttl_are_dropped_on_load() {
    let clock = manual_clock();
    let store = Arc::new(MemorySnapshotStore::default());
    let config = persistent_config(10, 1000, NO_TICK_MS);

    let cache = EmbeddingCache::open_with(&config, Some(store.clone()), clock.clone()).await;
    cache.set("old", embedding("old"));
    clock.advance_ms(600);
    cache.set("new", embedding("new"));
    cache.shutdown().await;

    clock.advance_ms(600);
    let reopened = EmbeddingCache::open_with(&config, Some(store.clone()), clock.clone()).await;
    assert_eq!(reopened.len(), 1);
    assert!(reopened.has("new"));
    assert!(!reopened.has("old"));

    // Restored entries keep their original creation time.
    clock.advance_ms(500);
    assert!(!reopened.has("new"));
}

#[tokio::test]
async fn aged_out_entries_are_purged_from_the_stored_snapshot() {
    let clock = manual_clock();
    let now = clock.now();
    let stored = |key: &str, age_ms: i64| SnapshotEntry {
        key: key.into(),
        value: embedding(key),
        created_at: now - TimeDelta::milliseconds(age_ms),
        access_count: 0,
    };
    let store = MemorySnapshotStore::with_snapshot(Snapshot::new(
        now,
        vec![stored("old", 5000), stored("new", 0)],
    ));

    let cache = EmbeddingCache::open_with(
        &persistent_config(10, 1000, NO_TICK_MS),
        Some(store.clone()),
        clock.clone(),
    )
    .await;
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.statistics().expirations, 1);
    assert!(cache.is_dirty());

    cache.shutdown().await;
    assert_eq!(store.saves(), 1);
    let keys: Vec<String> = store
        .latest()
        .unwrap()
        .entries
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["new"]);
}

#[tokio::test]
async fn oversized_snapshot_keeps_most_recently_used() {
    let store = Arc::new(MemorySnapshotStore::default());

    let big = EmbeddingCache::open_with(&persistent_config(10, 0, NO_TICK_MS), Some(store.clone()), system_clock()).await;
    for key in ["a", "b", "c", "d", "e"] {
        big.set(key, embedding(key));
    }
    big.get("a");
    big.shutdown().await;

    let small = EmbeddingCache::open_with(&persistent_config(2, 0, NO_TICK_MS), Some(store.clone()), system_clock()).await;
    assert_eq!(small.len(), 2);
    assert!(small.has("e"));
    assert!(small.has("a"));
}

#[tokio::test]
async fn flusher_writes_only_when_dirty() {
    let store = Arc::new(MemorySnapshotStore::default());
    let config = persistent_config(10, 0, 20);
    let cache = EmbeddingCache::open_with(&config, Some(store.clone()), system_clock()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.saves(), 0);

    cache.set("k", embedding("k"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    let after_change = store.saves();
    assert_eq!(after_change, 1);
    assert!(!cache.is_dirty());

    // Reads do not dirty the cache.
    cache.get("k");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.saves(), after_change);

    let snapshot = store.latest().unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].key, "k");

    cache.shutdown().await;
    assert_eq!(store.saves(), after_change);
}

#[tokio::test]
async fn shutdown_writes_final_snapshot_once() {
    let store = Arc::new(MemorySnapshotStore::default());
    let cache = EmbeddingCache::open_with(&persistent_config(10, 0, NO_TICK_MS), Some(store.clone()), system_clock()).await;
    cache.set("k", embedding("k"));

    cache.shutdown().await;
    cache.shutdown().await;
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn broken_store_does_not_break_the_cache() {
    let config = persistent_config(10, 0, NO_TICK_MS);
    let cache = EmbeddingCache::open_with(&config, Some(Arc::new(BrokenSnapshotStore)), system_clock()).await;
    assert!(cache.is_empty());

    cache.set("k", embedding("k"));
    assert!(cache.get("k").is_some());

    assert!(!cache.flush().await);
    // Still dirty so the next flush retries.
    assert!(cache.is_dirty());
    cache.shutdown().await;
}

#[tokio::test]
async fn in_memory_cache_never_flushes() {
    let cache = EmbeddingCache::open(&CacheConfig::in_memory(10, 0)).await;
    cache.set("k", embedding("k"));
    assert!(!cache.is_persistent());
    assert!(!cache.flush().await);
}

fn file_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        snapshot_path: dir.path().join("nested").join("embeddings.json").to_string_lossy().into_owned(),
        ..persistent_config(10, 0, NO_TICK_MS)
    }
}

#[tokio::test]
async fn file_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let path = config.resolved_snapshot_path();

    let cache = EmbeddingCache::open(&config).await;
    cache.set("query:hello", embedding("hello"));
    cache.shutdown().await;

    assert!(path.exists());
    assert!(!path.with_file_name("embeddings.json.tmp").exists());

    let on_disk = FileSnapshotStore::new(&path).load().unwrap().unwrap();
    assert_eq!(on_disk.entries.len(), 1);
    assert_eq!(on_disk.entries[0].key, "query:hello");

    let reopened = EmbeddingCache::open(&config).await;
    assert_eq!(reopened.get("query:hello"), Some(embedding("hello")));
}

#[tokio::test]
async fn corrupt_snapshot_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let path = config.resolved_snapshot_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{ not json").unwrap();

    let cache = EmbeddingCache::open(&config).await;
    assert!(cache.is_empty());

    // The next flush replaces the damaged file.
    cache.set("k", embedding("k"));
    cache.shutdown().await;
    assert!(FileSnapshotStore::new(&path).load().unwrap().is_some());
}

#[tokio::test]
async fn unknown_snapshot_version_is_ignored() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let path = config.resolved_snapshot_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{"version":99,"created_at":"2026-01-01T00:00:00Z","entries":[]}"#,
    )
    .unwrap();

    assert!(FileSnapshotStore::new(&path).load().is_err());
    let cache = EmbeddingCache::open(&config).await;
    assert!(cache.is_empty());
}
