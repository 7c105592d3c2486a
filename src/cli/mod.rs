pub mod clear;
pub mod doctor;
pub mod embed;
pub mod export;
pub mod import;
pub mod prune;
pub mod stats;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use embedcache::config::{EmbedCacheConfig, EmbeddingConfig};
use embedcache::embedding::local::model_files;
use embedcache::EmbeddingCache;

const MODEL_URL: &str =
    "https://huggingface.co/intfloat/multilingual-e5-small/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/intfloat/multilingual-e5-small/resolve/main/tokenizer.json";

/// Open the snapshot-backed cache. CLI commands always operate on the
/// snapshot file, whatever `cache.persistent` says.
pub async fn open_cache(config: &EmbedCacheConfig) -> Arc<EmbeddingCache> {
    let mut cache_config = config.cache.clone();
    cache_config.persistent = true;
    EmbeddingCache::open(&cache_config).await
}

/// Progress bar style; `counter` is the indicatif placeholder pair shown
/// after the bar, e.g. `{pos}/{len}`.
pub fn bar_style(counter: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!("  {{bar:40.cyan/blue}} {counter} ({{eta}})"))
        .expect("valid template")
        .progress_chars("##-")
}

/// Download the ONNX embedding model and tokenizer to the model directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let (model_path, tokenizer_path) = model_files(config);
    if let Some(model_dir) = model_path.parent() {
        std::fs::create_dir_all(model_dir)
            .with_context(|| format!("failed to create model dir: {}", model_dir.display()))?;
    }

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading model.onnx (~470MB)...");
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(bar_style("{bytes}/{total_bytes}"));
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
