mod helpers;

use std::sync::{Arc, Mutex};

use embedcache::cache::{CacheEvent, CacheEventKind};
use helpers::{embedding, manual_clock, test_cache};

fn record_events(cache: &embedcache::EmbeddingCache) -> Arc<Mutex<Vec<CacheEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cache.on_update(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

#[test]
fn hits_plus_misses_equals_get_calls() {
    let cache = test_cache(3, 0, manual_clock());
    cache.set("a", embedding("a"));
    cache.set("b", embedding("b"));

    let keys = ["a", "b", "c", "a", "z", "b", "a"];
    for key in keys {
        cache.get(key);
    }
    // has() is not a lookup
    cache.has("a");
    cache.has("nope");

    let stats = cache.statistics();
    assert_eq!(stats.hits + stats.misses, keys.len() as u64);
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.misses, 2);
    assert!((stats.hit_rate - 5.0 / 7.0).abs() < 1e-9);
    assert!(stats.last_access_at.is_some());
}

#[test]
fn evictions_are_counted_and_announced() {
    let cache = test_cache(2, 0, manual_clock());
    let events = record_events(&cache);

    cache.set("k1", embedding("k1"));
    cache.set("k2", embedding("k2"));
    cache.set("k3", embedding("k3"));

    assert!(!cache.has("k1"));
    assert_eq!(cache.statistics().evictions, 1);
    assert_eq!(cache.len(), 2);

    let events = events.lock().unwrap();
    let kinds: Vec<CacheEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CacheEventKind::Set,
            CacheEventKind::Set,
            CacheEventKind::Evict,
            CacheEventKind::Set,
        ]
    );
    assert_eq!(events[2].key.as_deref(), Some("k1"));
}

#[test]
fn expired_get_is_a_miss_and_an_expiration() {
    let clock = manual_clock();
    let cache = test_cache(10, 1000, Arc::clone(&clock));
    let events = record_events(&cache);
    cache.set("k", embedding("k"));

    clock.advance_ms(999);
    assert!(cache.get("k").is_some());

    clock.advance_ms(2);
    assert!(cache.get("k").is_none());

    let stats = cache.statistics();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.size, 0);

    let kinds: Vec<CacheEventKind> = events.lock().unwrap().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CacheEventKind::Set,
            CacheEventKind::GetHit,
            CacheEventKind::Expire,
            CacheEventKind::GetMiss,
        ]
    );
}

#[test]
fn ttl_is_not_extended_by_access() {
    let clock = manual_clock();
    let cache = test_cache(10, 1000, Arc::clone(&clock));
    cache.set("k", embedding("k"));

    for _ in 0..4 {
        clock.advance_ms(300);
        cache.get("k");
    }
    // 1200 ms since creation despite steady reads
    assert!(!cache.has("k"));
}

#[test]
fn prune_removes_only_expired_entries() {
    let clock = manual_clock();
    let cache = test_cache(10, 1000, Arc::clone(&clock));
    cache.set("old", embedding("old"));
    clock.advance_ms(600);
    cache.set("new", embedding("new"));
    clock.advance_ms(600);

    assert_eq!(cache.prune(), 1);
    assert!(cache.has("new"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.statistics().expirations, 1);
}

#[test]
fn delete_and_clear() {
    let cache = test_cache(10, 0, manual_clock());
    let events = record_events(&cache);
    cache.set("a", embedding("a"));
    cache.set("b", embedding("b"));
    cache.get("a");

    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    cache.clear();

    assert!(cache.is_empty());
    let stats = cache.statistics();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.estimated_memory_bytes, 0);

    let events = events.lock().unwrap();
    let deletes = events
        .iter()
        .filter(|e| e.kind == CacheEventKind::Delete)
        .count();
    assert_eq!(deletes, 1);
    let last = events.last().unwrap();
    assert_eq!(last.kind, CacheEventKind::Clear);
    assert_eq!(last.key, None);
}

#[test]
fn memory_estimate_grows_with_entries() {
    let cache = test_cache(10, 0, manual_clock());
    let empty = cache.statistics().estimated_memory_bytes;
    cache.set("document:hello", embedding("hello"));
    let one = cache.statistics().estimated_memory_bytes;
    cache.set("document:world", embedding("world"));
    let two = cache.statistics().estimated_memory_bytes;

    assert_eq!(empty, 0);
    assert!(one > 0);
    assert_eq!(two, one * 2);
}

#[test]
fn export_clear_import_restores_entries() {
    let cache = test_cache(10, 0, manual_clock());
    for key in ["a", "b", "c"] {
        cache.set(key, embedding(key));
    }
    cache.get("a");

    let exported = cache.export();
    assert_eq!(exported.len(), 3);
    // least recently used first
    let order: Vec<&str> = exported.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(order, vec!["b", "c", "a"]);

    cache.clear();
    assert!(cache.is_empty());

    assert_eq!(cache.import(exported.clone()), 3);
    assert_eq!(cache.len(), 3);
    for entry in &exported {
        assert_eq!(cache.get(&entry.key).as_ref(), Some(&entry.value));
    }
    assert_eq!(cache.export().iter().find(|e| e.key == "a").unwrap().access_count, 2);
}

#[test]
fn import_skips_new_keys_when_full() {
    let source = test_cache(10, 0, manual_clock());
    for key in ["x", "y", "z"] {
        source.set(key, embedding(key));
    }
    let exported = source.export();

    let target = test_cache(2, 0, manual_clock());
    target.set("keep", embedding("keep"));

    assert_eq!(target.import(exported), 1);
    assert_eq!(target.len(), 2);
    assert!(target.has("keep"));
    assert!(target.has("x"));
    assert!(!target.has("z"));
    assert_eq!(target.statistics().evictions, 0);
}

#[test]
fn import_overwrites_existing_keys_even_when_full() {
    let target = test_cache(1, 0, manual_clock());
    target.set("k", embedding("old"));

    let source = test_cache(1, 0, manual_clock());
    source.set("k", embedding("new"));

    assert_eq!(target.import(source.export()), 1);
    assert_eq!(target.get("k").unwrap().source_text, "new");
}

#[test]
fn import_over_live_key_keeps_its_ttl_clock() {
    let clock = manual_clock();
    let target = test_cache(10, 1000, Arc::clone(&clock));
    target.set("k", embedding("old"));
    clock.advance_ms(900);

    let source = test_cache(10, 0, manual_clock());
    source.set("k", embedding("new"));
    assert_eq!(target.import(source.export()), 1);
    assert_eq!(target.get("k").unwrap().source_text, "new");

    // 1100 ms after the original insert
    clock.advance_ms(200);
    assert!(!target.has("k"));
}

#[test]
fn size_counts_only_live_entries() {
    let clock = manual_clock();
    let cache = test_cache(10, 1000, Arc::clone(&clock));
    cache.set("old", embedding("old"));
    clock.advance_ms(600);
    cache.set("new", embedding("new"));
    clock.advance_ms(600);

    // "old" has expired but has not been swept yet.
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.statistics().size, 1);
}
