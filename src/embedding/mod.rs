//! Text-to-vector embedding pipeline.
//!
//! [`ModelCompute`] is the seam to the inference backend; [`local`] implements
//! it with ONNX Runtime. [`batch::BatchEmbedder`] sits in front of it and
//! serves repeat requests from the [`crate::cache::EmbeddingCache`].

pub mod batch;
pub mod local;
pub mod tokens;
pub mod types;

use std::sync::Arc;

use anyhow::Result;

use crate::config::EmbeddingConfig;

/// An embedding model backend.
///
/// `compute` returns one vector per input, in input order. Methods are
/// synchronous and may be CPU-heavy; the batch embedder calls them from
/// `tokio::task::spawn_blocking`.
pub trait ModelCompute: Send + Sync {
    /// Embed already-prefixed input texts.
    fn compute(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Number of dimensions this backend produces.
    fn dimensions(&self) -> usize;
}

/// Create a compute backend from config.
///
/// Currently only `"local"` is supported (ONNX Runtime). Returns an error if
/// model files are not found. Run `embedcache model download` first.
pub fn create_compute(config: &EmbeddingConfig) -> Result<Arc<dyn ModelCompute>> {
    match config.provider.as_str() {
        "local" => {
            let compute = local::OnnxCompute::new(config)?;
            Ok(Arc::new(compute))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}
