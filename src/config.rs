use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::embedding::types::EmbeddingKind;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EmbedCacheConfig {
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    /// Entry lifetime measured from creation. 0 disables expiry.
    pub ttl_ms: u64,
    pub persistent: bool,
    pub snapshot_path: String,
    pub flush_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub model_dir: String,
    pub dimensions: usize,
    pub max_sequence_length: usize,
    pub batch_size: usize,
    pub query_prefix: String,
    pub document_prefix: String,
}

/// Default entry cap for embedding caches.
pub const DEFAULT_EMBEDDING_CACHE_SIZE: usize = 10_000;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let snapshot_path = default_embedcache_dir()
            .join("embeddings.json")
            .to_string_lossy()
            .into_owned();
        Self {
            max_size: DEFAULT_EMBEDDING_CACHE_SIZE,
            ttl_ms: 0,
            persistent: false,
            snapshot_path,
            flush_interval_ms: 30_000,
        }
    }
}

impl CacheConfig {
    /// Plain in-memory cache of the given size.
    pub fn in_memory(max_size: usize, ttl_ms: u64) -> Self {
        Self {
            max_size,
            ttl_ms,
            persistent: false,
            ..Default::default()
        }
    }

    pub fn resolved_snapshot_path(&self) -> PathBuf {
        expand_tilde(&self.snapshot_path)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let model_dir = default_embedcache_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "multilingual-e5-small".into(),
            model_dir,
            dimensions: 384,
            max_sequence_length: 512,
            batch_size: 32,
            query_prefix: "query: ".into(),
            document_prefix: "passage: ".into(),
        }
    }
}

impl EmbeddingConfig {
    /// Input prefix the model expects for `kind`.
    pub fn prefix_for(&self, kind: EmbeddingKind) -> &str {
        match kind {
            EmbeddingKind::Query => &self.query_prefix,
            EmbeddingKind::Document => &self.document_prefix,
        }
    }
}

/// Returns `~/.embedcache/`
pub fn default_embedcache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".embedcache")
}

/// Returns the default config file path: `~/.embedcache/config.toml`
pub fn default_config_path() -> PathBuf {
    default_embedcache_dir().join("config.toml")
}

impl EmbedCacheConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EmbedCacheConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (EMBEDCACHE_SNAPSHOT,
    /// EMBEDCACHE_MAX_SIZE, EMBEDCACHE_TTL_MS, EMBEDCACHE_MODEL_DIR,
    /// EMBEDCACHE_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EMBEDCACHE_SNAPSHOT") {
            self.cache.snapshot_path = val;
            self.cache.persistent = true;
        }
        if let Some(val) = env_number("EMBEDCACHE_MAX_SIZE") {
            self.cache.max_size = val as usize;
        }
        if let Some(val) = env_number("EMBEDCACHE_TTL_MS") {
            self.cache.ttl_ms = val;
        }
        if let Ok(val) = std::env::var("EMBEDCACHE_MODEL_DIR") {
            self.embedding.model_dir = val;
        }
        if let Ok(val) = std::env::var("EMBEDCACHE_LOG_LEVEL") {
            self.logging.log_level = val;
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.embedding.batch_size > 0, "embedding.batch_size must be positive");
        anyhow::ensure!(self.embedding.dimensions > 0, "embedding.dimensions must be positive");
        anyhow::ensure!(
            self.embedding.max_sequence_length > 0,
            "embedding.max_sequence_length must be positive"
        );
        if self.cache.persistent {
            anyhow::ensure!(
                !self.cache.snapshot_path.is_empty(),
                "cache.snapshot_path is required when cache.persistent is true"
            );
            anyhow::ensure!(
                self.cache.flush_interval_ms > 0,
                "cache.flush_interval_ms must be positive when cache.persistent is true"
            );
        }
        Ok(())
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
