#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::Utc;

use embedcache::cache::{Snapshot, SnapshotStore};
use embedcache::clock::ManualClock;
use embedcache::config::{CacheConfig, EmbeddingConfig};
use embedcache::{BatchEmbedder, CachedEmbedding, EmbeddingCache, EmbeddingKind, ModelCompute};

pub const DIMS: usize = 8;

/// Deterministic backend that records every call.
pub struct FakeCompute {
    dims: usize,
    calls: Mutex<Vec<Vec<String>>>,
    /// Zero-based call number that fails, if any.
    fail_on_call: Option<usize>,
    /// Return vectors one element too long.
    wrong_dims: bool,
}

impl FakeCompute {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dims: DIMS,
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
            wrong_dims: false,
        })
    }

    pub fn failing_on(call: usize) -> Arc<Self> {
        Arc::new(Self {
            dims: DIMS,
            calls: Mutex::new(Vec::new()),
            fail_on_call: Some(call),
            wrong_dims: false,
        })
    }

    pub fn with_wrong_dims() -> Arc<Self> {
        Arc::new(Self {
            dims: DIMS,
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
            wrong_dims: true,
        })
    }

    /// Inputs of each call, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Every input ever computed, flattened.
    pub fn computed_texts(&self) -> Vec<String> {
        self.calls().into_iter().flatten().collect()
    }
}

impl ModelCompute for FakeCompute {
    fn compute(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(texts.iter().map(|t| t.to_string()).collect());
            calls.len() - 1
        };
        if self.fail_on_call == Some(call) {
            bail!("model crashed on call {call}");
        }
        let dims = if self.wrong_dims { self.dims + 1 } else { self.dims };
        Ok(texts.iter().map(|t| fake_vector(t, dims)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// A vector that depends only on the input text.
pub fn fake_vector(text: &str, dims: usize) -> Vec<f32> {
    let seed = text.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    (0..dims).map(|i| ((seed as usize + i) % 97) as f32 / 97.0).collect()
}

/// Snapshot store kept in memory, counting saves.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<Snapshot>>,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn with_snapshot(snapshot: Snapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        })
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshot.lock().unwrap().clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// Store whose every operation fails.
pub struct BrokenSnapshotStore;

impl SnapshotStore for BrokenSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        bail!("disk on fire")
    }

    fn save(&self, _snapshot: &Snapshot) -> Result<()> {
        bail!("disk on fire")
    }

    fn describe(&self) -> String {
        "broken".into()
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc::now()))
}

/// In-memory embedding cache driven by `clock`.
pub fn test_cache(max_size: usize, ttl_ms: u64, clock: Arc<ManualClock>) -> EmbeddingCache {
    EmbeddingCache::with_clock(&CacheConfig::in_memory(max_size, ttl_ms), clock)
}

pub fn persistent_config(max_size: usize, ttl_ms: u64, flush_interval_ms: u64) -> CacheConfig {
    CacheConfig {
        persistent: true,
        flush_interval_ms,
        ..CacheConfig::in_memory(max_size, ttl_ms)
    }
}

pub fn embedding(text: &str) -> CachedEmbedding {
    CachedEmbedding {
        vector: fake_vector(text, DIMS),
        dimensions: DIMS,
        source_text: text.into(),
        kind: EmbeddingKind::Document,
        estimated_tokens: text.len().div_ceil(4),
        truncated: false,
    }
}

pub fn embedding_config(batch_size: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        dimensions: DIMS,
        batch_size,
        max_sequence_length: 16,
        ..Default::default()
    }
}

/// Initialized embedder over `compute` with a fresh 100-entry cache.
pub async fn ready_embedder(compute: Arc<FakeCompute>, batch_size: usize) -> BatchEmbedder {
    let cache = Arc::new(EmbeddingCache::new(&CacheConfig::in_memory(100, 0)));
    let embedder = BatchEmbedder::with_compute(cache, embedding_config(batch_size), compute);
    embedder.initialize().await.unwrap();
    embedder
}
