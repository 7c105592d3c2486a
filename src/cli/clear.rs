//! CLI `clear` command: empty the cache snapshot after user confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use embedcache::config::EmbedCacheConfig;

pub async fn clear(config: &EmbedCacheConfig) -> Result<()> {
    let snapshot_path = config.cache.resolved_snapshot_path();

    println!("WARNING: This will permanently delete ALL cached embeddings.");
    println!("Snapshot: {}", snapshot_path.display());
    print!("\nType YES to confirm: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if input.trim() != "YES" {
        bail!("clear cancelled");
    }

    let cache = super::open_cache(config).await;
    let removed = cache.len();
    cache.clear();
    cache.shutdown().await;

    println!("Removed {removed} entries. Cache cleared.");
    Ok(())
}
