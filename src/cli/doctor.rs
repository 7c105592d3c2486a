//! CLI `doctor` command: check model files and snapshot health.

use anyhow::Result;

use embedcache::cache::{FileSnapshotStore, SnapshotStore};
use embedcache::config::EmbedCacheConfig;
use embedcache::embedding::local::model_files;

/// Print a health report for the model files and the cache snapshot.
pub fn doctor(config: &EmbedCacheConfig) -> Result<()> {
    let (model_path, tokenizer_path) = model_files(&config.embedding);
    let snapshot_path = config.cache.resolved_snapshot_path();

    println!("embedcache Health Report");
    println!("========================");
    println!();
    println!("Embedding model:   {}", config.embedding.model);
    println!("  Model file:      {}", file_status(&model_path));
    println!("  Tokenizer:       {}", file_status(&tokenizer_path));
    println!("  Dimensions:      {}", config.embedding.dimensions);
    println!("  Max seq length:  {}", config.embedding.max_sequence_length);
    println!("  Batch size:      {}", config.embedding.batch_size);
    if !model_path.exists() || !tokenizer_path.exists() {
        println!("  Run `embedcache model download` to fetch missing files.");
    }
    println!();

    println!("Snapshot:          {}", snapshot_path.display());
    println!("  File:            {}", file_status(&snapshot_path));
    println!("  Persistent:      {}", config.cache.persistent);
    match FileSnapshotStore::new(&snapshot_path).load() {
        Ok(Some(snapshot)) => {
            println!("  Version:         {}", snapshot.version);
            println!("  Written at:      {}", snapshot.created_at.to_rfc3339());
            println!("  Entries:         {}", snapshot.entries.len());
            let wrong_dims = snapshot
                .entries
                .iter()
                .filter(|e| e.value.vector.len() != config.embedding.dimensions)
                .count();
            if wrong_dims > 0 {
                println!(
                    "  WARNING: {wrong_dims} entries do not match the configured dimensions. \
                     Run `embedcache clear` after changing models."
                );
            } else {
                println!("  Integrity:       PASSED");
            }
        }
        Ok(None) => println!("  No snapshot written yet."),
        Err(e) => {
            println!("  Integrity:       FAILED ({e:#})");
            println!();
            println!("Recovery steps:");
            println!("  1. Move the damaged file aside: mv {0} {0}.bad", snapshot_path.display());
            println!("  2. The cache starts empty and is rebuilt on demand.");
        }
    }

    Ok(())
}

fn file_status(path: &std::path::Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => format!("{} ({})", path.display(), format_bytes(meta.len())),
        Err(_) => format!("{} (missing)", path.display()),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
