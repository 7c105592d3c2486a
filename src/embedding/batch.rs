//! Cache-aware single and batch embedding.
//!
//! [`BatchEmbedder`] turns embedding requests into the fewest possible
//! [`ModelCompute`] calls. A batch is resolved in three passes:
//!
//! 1. **Partition**: Left to right, each text is either served from the
//!    cache, folded into an earlier pending item with the same key, or queued
//!    as pending with its original index.
//! 2. **Dispatch**: Pending items go to the backend in sub-batches of
//!    `batch_size`, in discovery order. Each finished sub-batch is written to
//!    the cache before the next one starts.
//! 3. **Reassemble**: Results land at their original indices, so the output
//!    is index-aligned with the input regardless of where each item came from.
//!
//! A failed sub-batch fails the whole call; sub-batches that already finished
//! stay cached.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use super::tokens::estimate_tokens;
use super::types::{BatchEmbedding, BatchStats, CachedEmbedding, EmbeddingKind, EmbeddingResult};
use super::ModelCompute;
use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::{EmbedError, EmbedResult};

/// Produces the compute backend on `initialize`. Runs on a blocking thread.
pub type ComputeLoader = Arc<dyn Fn() -> anyhow::Result<Arc<dyn ModelCompute>> + Send + Sync>;

/// Lifecycle of a [`BatchEmbedder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderStatus {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

enum EmbedderState {
    Uninitialized,
    Initializing,
    Ready(Arc<dyn ModelCompute>),
    Disposed,
}

/// Reported to the progress callback after every sub-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Items resolved so far, cache hits included.
    pub processed: usize,
    pub total: usize,
}

/// A cache miss waiting for computation.
struct PendingItem {
    key: String,
    text: String,
    index: usize,
    /// Later indices in the same call with the same key.
    duplicates: Vec<usize>,
}

pub struct BatchEmbedder {
    cache: Arc<EmbeddingCache>,
    config: EmbeddingConfig,
    loader: ComputeLoader,
    state: RwLock<EmbedderState>,
    init_lock: tokio::sync::Mutex<()>,
}

impl BatchEmbedder {
    pub fn new(cache: Arc<EmbeddingCache>, config: EmbeddingConfig, loader: ComputeLoader) -> Self {
        Self {
            cache,
            config,
            loader,
            state: RwLock::new(EmbedderState::Uninitialized),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Embedder whose backend is built by [`super::create_compute`] from `config`.
    pub fn from_config(cache: Arc<EmbeddingCache>, config: EmbeddingConfig) -> Self {
        let loader_config = config.clone();
        let loader: ComputeLoader = Arc::new(move || super::create_compute(&loader_config));
        Self::new(cache, config, loader)
    }

    /// Embedder over an already constructed backend.
    pub fn with_compute(
        cache: Arc<EmbeddingCache>,
        config: EmbeddingConfig,
        compute: Arc<dyn ModelCompute>,
    ) -> Self {
        let loader: ComputeLoader = Arc::new(move || Ok(Arc::clone(&compute)));
        Self::new(cache, config, loader)
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn status(&self) -> EmbedderStatus {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            EmbedderState::Uninitialized => EmbedderStatus::Uninitialized,
            EmbedderState::Initializing => EmbedderStatus::Initializing,
            EmbedderState::Ready(_) => EmbedderStatus::Ready,
            EmbedderState::Disposed => EmbedderStatus::Disposed,
        }
    }

    fn set_state(&self, next: EmbedderState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Load the compute backend.
    ///
    /// Concurrent callers queue behind the first; once it finishes they find
    /// the embedder `Ready` and return without loading again. A failed load
    /// leaves the embedder `Uninitialized` so it can be retried.
    pub async fn initialize(&self) -> EmbedResult<()> {
        let _guard = self.init_lock.lock().await;
        match self.status() {
            EmbedderStatus::Ready => return Ok(()),
            EmbedderStatus::Disposed => return Err(EmbedError::Disposed),
            EmbedderStatus::Uninitialized | EmbedderStatus::Initializing => {}
        }

        self.set_state(EmbedderState::Initializing);
        tracing::info!(model = %self.config.model, "loading embedding backend");

        let loader = Arc::clone(&self.loader);
        let loaded = match tokio::task::spawn_blocking(move || loader()).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("loader task failed: {e}")),
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, EmbedderState::Disposed) {
            return Err(EmbedError::Disposed);
        }
        match loaded {
            Ok(compute) => {
                if compute.dimensions() != self.config.dimensions {
                    tracing::warn!(
                        backend = compute.dimensions(),
                        configured = self.config.dimensions,
                        "backend dimensions differ from configuration"
                    );
                }
                *state = EmbedderState::Ready(compute);
                tracing::info!("embedding backend ready");
                Ok(())
            }
            Err(e) => {
                *state = EmbedderState::Uninitialized;
                tracing::warn!(error = %e, "embedding backend failed to load");
                Err(EmbedError::Initialization(e))
            }
        }
    }

    /// Release the backend and flush the cache. The embedder cannot be reused.
    pub async fn dispose(&self) {
        self.set_state(EmbedderState::Disposed);
        self.cache.shutdown().await;
        tracing::info!("embedder disposed");
    }

    fn ready_compute(&self) -> EmbedResult<Arc<dyn ModelCompute>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            EmbedderState::Ready(compute) => Ok(Arc::clone(compute)),
            _ => Err(EmbedError::NotInitialized),
        }
    }

    /// Embed one text, serving it from the cache when possible.
    pub async fn embed_one(&self, text: &str, kind: EmbeddingKind) -> EmbedResult<EmbeddingResult> {
        let compute = self.ready_compute()?;
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let key = EmbeddingCache::key_for(kind, text);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(EmbeddingResult::from_cached(hit));
        }

        let (entries, elapsed_ms) = self
            .compute_sub_batch(compute, kind, vec![text.to_string()])
            .await?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Computation(anyhow::anyhow!("backend returned no output")))?;

        self.cache.set(key, entry.clone());
        Ok(EmbeddingResult::computed(entry, elapsed_ms))
    }

    /// Embed many texts. Results are index-aligned with `texts`.
    pub async fn embed_many<T: AsRef<str>>(
        &self,
        texts: &[T],
        kind: EmbeddingKind,
    ) -> EmbedResult<BatchEmbedding> {
        self.embed_many_with_progress(texts, kind, |_| {}).await
    }

    /// [`embed_many`](Self::embed_many) with a callback after each sub-batch.
    pub async fn embed_many_with_progress<T, F>(
        &self,
        texts: &[T],
        kind: EmbeddingKind,
        mut on_progress: F,
    ) -> EmbedResult<BatchEmbedding>
    where
        T: AsRef<str>,
        F: FnMut(BatchProgress),
    {
        let compute = self.ready_compute()?;
        if texts.iter().any(|t| t.as_ref().trim().is_empty()) {
            return Err(EmbedError::EmptyInput);
        }

        let total = texts.len();
        let mut slots: Vec<Option<EmbeddingResult>> = vec![None; total];
        let mut pending: Vec<PendingItem> = Vec::new();
        let mut pending_by_key: HashMap<String, usize> = HashMap::new();
        let mut cache_hits = 0;

        for (index, text) in texts.iter().enumerate() {
            let text = text.as_ref();
            let key = EmbeddingCache::key_for(kind, text);

            if let Some(&slot) = pending_by_key.get(&key) {
                pending[slot].duplicates.push(index);
                cache_hits += 1;
                continue;
            }

            match self.cache.get(&key) {
                Some(hit) => {
                    slots[index] = Some(EmbeddingResult::from_cached(hit));
                    cache_hits += 1;
                }
                None => {
                    pending_by_key.insert(key.clone(), pending.len());
                    pending.push(PendingItem {
                        key,
                        text: text.to_string(),
                        index,
                        duplicates: Vec::new(),
                    });
                }
            }
        }

        let cache_misses = pending.len();
        let mut processed = total - pending.iter().map(|p| 1 + p.duplicates.len()).sum::<usize>();
        let batch_size = self.config.batch_size.max(1);

        for (n, chunk) in pending.chunks(batch_size).enumerate() {
            let inputs: Vec<String> = chunk.iter().map(|item| item.text.clone()).collect();
            let (entries, elapsed_ms) = self
                .compute_sub_batch(Arc::clone(&compute), kind, inputs)
                .await?;
            let per_item_ms = elapsed_ms / chunk.len() as f64;

            for (item, entry) in chunk.iter().zip(entries) {
                self.cache.set(item.key.clone(), entry.clone());
                for &dup in &item.duplicates {
                    slots[dup] = Some(EmbeddingResult::from_cached(entry.clone()));
                }
                processed += 1 + item.duplicates.len();
                slots[item.index] = Some(EmbeddingResult::computed(entry, per_item_ms));
            }

            tracing::debug!(
                sub_batch = n,
                items = chunk.len(),
                elapsed_ms,
                processed,
                total,
                "sub-batch embedded"
            );
            on_progress(BatchProgress { processed, total });
        }

        let results = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EmbedError::Computation(anyhow::anyhow!("unresolved batch slot")))?;

        let total_duration_ms: f64 = results.iter().map(|r| r.duration_ms).sum();
        let stats = BatchStats {
            total,
            total_duration_ms,
            average_duration_ms: if total == 0 {
                0.0
            } else {
                total_duration_ms / total as f64
            },
            cache_hits,
            cache_misses,
            truncated: results.iter().filter(|r| r.truncated).count(),
        };

        tracing::info!(
            total,
            cache_hits,
            cache_misses,
            truncated = stats.truncated,
            total_ms = total_duration_ms,
            "batch embedded"
        );

        Ok(BatchEmbedding { results, stats })
    }

    /// Run one backend call for raw `texts` and build cache values.
    /// Returns the values in input order and the call's wall time in ms.
    async fn compute_sub_batch(
        &self,
        compute: Arc<dyn ModelCompute>,
        kind: EmbeddingKind,
        texts: Vec<String>,
    ) -> EmbedResult<(Vec<CachedEmbedding>, f64)> {
        let prefix = self.config.prefix_for(kind);
        let inputs: Vec<String> = texts.iter().map(|t| format!("{prefix}{t}")).collect();
        let token_counts: Vec<usize> = inputs.iter().map(|i| estimate_tokens(i)).collect();

        let started = Instant::now();
        let outputs = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
            compute.compute(&refs)
        })
        .await
        .map_err(|e| EmbedError::Computation(anyhow::anyhow!("compute task failed: {e}")))?
        .map_err(EmbedError::Computation)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if outputs.len() != texts.len() {
            return Err(EmbedError::Computation(anyhow::anyhow!(
                "backend returned {} vectors for {} inputs",
                outputs.len(),
                texts.len()
            )));
        }

        let expected = self.config.dimensions;
        if let Some(bad) = outputs.iter().find(|v| v.len() != expected) {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let max_len = self.config.max_sequence_length;
        let entries = texts
            .into_iter()
            .zip(outputs)
            .zip(token_counts)
            .map(|((text, vector), estimated_tokens)| CachedEmbedding {
                dimensions: vector.len(),
                vector,
                source_text: text,
                kind,
                estimated_tokens,
                truncated: estimated_tokens > max_len,
            })
            .collect();

        Ok((entries, elapsed_ms))
    }
}
