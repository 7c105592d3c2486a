//! CLI `embed` command: embed texts through the snapshot-backed cache.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::Path;

use embedcache::config::EmbedCacheConfig;
use embedcache::{BatchEmbedder, BatchStats, EmbeddingKind, EmbeddingResult};

/// Per-item output without the vector.
#[derive(Debug, Serialize)]
struct ItemSummary<'a> {
    text: &'a str,
    kind: EmbeddingKind,
    dimensions: usize,
    estimated_tokens: usize,
    truncated: bool,
    cached: bool,
    duration_ms: f64,
}

#[derive(Debug, Serialize)]
struct EmbedOutput<'a, T: Serialize> {
    results: Vec<T>,
    stats: &'a BatchStats,
}

/// Embed `texts` (plus one text per non-empty line of `file`) and print JSON.
pub async fn embed(
    config: &EmbedCacheConfig,
    kind: &str,
    texts: Vec<String>,
    file: Option<&Path>,
    with_vectors: bool,
) -> Result<()> {
    let kind: EmbeddingKind = kind.parse().map_err(anyhow::Error::msg)?;

    let mut inputs = texts;
    if let Some(file) = file {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read input file: {}", file.display()))?;
        inputs.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    anyhow::ensure!(!inputs.is_empty(), "no input text given");

    let cache = super::open_cache(config).await;
    let embedder = BatchEmbedder::from_config(cache, config.embedding.clone());
    embedder
        .initialize()
        .await
        .context("failed to initialize embedder")?;

    let pb = if file.is_some() {
        let pb = ProgressBar::new(inputs.len() as u64);
        pb.set_style(super::bar_style("{pos}/{len}"));
        pb
    } else {
        ProgressBar::hidden()
    };

    let batch = embedder
        .embed_many_with_progress(&inputs, kind, |p| pb.set_position(p.processed as u64))
        .await;
    pb.finish_and_clear();

    // Flush whatever was computed, even if a later sub-batch failed.
    embedder.dispose().await;
    let batch = batch?;

    let json = if with_vectors {
        serde_json::to_string_pretty(&EmbedOutput {
            results: batch.results.iter().collect::<Vec<&EmbeddingResult>>(),
            stats: &batch.stats,
        })?
    } else {
        serde_json::to_string_pretty(&EmbedOutput {
            results: batch.results.iter().map(summarize).collect(),
            stats: &batch.stats,
        })?
    };
    println!("{json}");

    eprintln!(
        "Embedded {} texts ({} cached, {} computed, {} truncated).",
        batch.stats.total, batch.stats.cache_hits, batch.stats.cache_misses, batch.stats.truncated
    );
    Ok(())
}

fn summarize(result: &EmbeddingResult) -> ItemSummary<'_> {
    ItemSummary {
        text: &result.text,
        kind: result.kind,
        dimensions: result.dimensions,
        estimated_tokens: result.estimated_tokens,
        truncated: result.truncated,
        cached: result.cached,
        duration_ms: result.duration_ms,
    }
}
