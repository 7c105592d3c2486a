//! Error taxonomy for embedding operations.

use thiserror::Error;

/// Errors returned by [`crate::embedding::batch::BatchEmbedder`].
///
/// Validation errors (`EmptyInput`, `NotInitialized`, `Disposed`) are raised
/// before the cache or the compute backend is touched.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("embedder is not initialized; call initialize() first")]
    NotInitialized,

    #[error("embedder has been disposed")]
    Disposed,

    #[error("failed to load compute backend: {0}")]
    Initialization(#[source] anyhow::Error),

    #[error("embedding computation failed: {0}")]
    Computation(#[source] anyhow::Error),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type EmbedResult<T> = std::result::Result<T, EmbedError>;
