//! Embedding cache and batch orchestration in front of an expensive embedding model.
//!
//! `embedcache` avoids recomputing embeddings for `(kind, text)` pairs it has
//! already seen. Entries are bounded by count (LRU eviction) and optionally by
//! age (TTL measured from creation), and the whole cache can be snapshotted to
//! a single JSON file so it survives restarts.
//!
//! # Architecture
//!
//! - **Cache**: [`cache::BoundedCache`] (generic LRU + TTL) wrapped by
//!   [`cache::EmbeddingCache`] (hit/miss/eviction counters, change events,
//!   snapshot persistence with a background flusher)
//! - **Embedding**: [`embedding::batch::BatchEmbedder`] partitions requests into
//!   cache hits and misses, dispatches misses to a [`embedding::ModelCompute`]
//!   backend in sub-batches, and reassembles results in input order
//! - **Backend**: local ONNX Runtime encoder ([`embedding::local`])
//!
//! # Modules
//!
//! - [`cache`]: bounded cache, embedding cache, events, snapshots
//! - [`clock`]: injectable time source
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`embedding`]: compute seam, ONNX backend, batch embedder, token estimate
//! - [`error`]: embedding error taxonomy

pub mod cache;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod error;

pub use cache::{CacheStatistics, EmbeddingCache};
pub use embedding::batch::{BatchEmbedder, BatchProgress, EmbedderStatus};
pub use embedding::types::{BatchEmbedding, BatchStats, CachedEmbedding, EmbeddingKind, EmbeddingResult};
pub use embedding::ModelCompute;
pub use error::{EmbedError, EmbedResult};
