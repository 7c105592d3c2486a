//! Embedding value types shared by the cache and the batch embedder.

use serde::{Deserialize, Serialize};

/// Role of the text being embedded. The model family expects a different
/// input prefix per role, so the same text embeds differently per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Query,
    Document,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Document => "document",
        }
    }
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "document" | "passage" => Ok(Self::Document),
            _ => Err(format!("unknown embedding kind: {s}")),
        }
    }
}

/// The value stored in the embedding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEmbedding {
    pub vector: Vec<f32>,
    pub dimensions: usize,
    /// The raw text, before any kind prefix was applied.
    pub source_text: String,
    pub kind: EmbeddingKind,
    pub estimated_tokens: usize,
    /// Estimated token count exceeded the model's max sequence length.
    pub truncated: bool,
}

/// One embedding returned to a caller, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub dimensions: usize,
    pub text: String,
    pub kind: EmbeddingKind,
    pub estimated_tokens: usize,
    pub truncated: bool,
    /// Served from the cache (or from an earlier duplicate in the same batch).
    pub cached: bool,
    /// Compute time attributed to this item. Zero for cached items; for batch
    /// items it is the sub-batch wall time split evenly.
    pub duration_ms: f64,
}

impl EmbeddingResult {
    pub fn from_cached(entry: CachedEmbedding) -> Self {
        Self {
            vector: entry.vector,
            dimensions: entry.dimensions,
            text: entry.source_text,
            kind: entry.kind,
            estimated_tokens: entry.estimated_tokens,
            truncated: entry.truncated,
            cached: true,
            duration_ms: 0.0,
        }
    }

    pub fn computed(entry: CachedEmbedding, duration_ms: f64) -> Self {
        Self {
            cached: false,
            duration_ms,
            ..Self::from_cached(entry)
        }
    }
}

/// Aggregate numbers for one `embed_many` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub total_duration_ms: f64,
    pub average_duration_ms: f64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub truncated: usize,
}

/// Results of `embed_many`, index-aligned with the input texts.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEmbedding {
    pub results: Vec<EmbeddingResult>,
    pub stats: BatchStats,
}
