use anyhow::{Context, Result};
use std::path::Path;

use embedcache::cache::ExportedEntry;
use embedcache::config::EmbedCacheConfig;

/// Import entries produced by `export` into the snapshot.
///
/// Existing keys are overwritten. New keys are accepted until the cache is
/// full; the rest are reported as skipped.
pub async fn import(config: &EmbedCacheConfig, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read import file: {}", file.display()))?;

    let entries: Vec<ExportedEntry> =
        serde_json::from_str(&json).context("failed to parse import JSON")?;
    let offered = entries.len();

    println!("Importing {offered} entries...");

    let cache = super::open_cache(config).await;
    let imported = cache.import(entries);
    cache.shutdown().await;

    println!("Import complete:");
    println!("  Entries imported: {imported}");
    if imported < offered {
        println!("  Entries skipped:  {} (cache full)", offered - imported);
    }
    Ok(())
}
