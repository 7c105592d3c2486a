use anyhow::Result;

use embedcache::config::EmbedCacheConfig;

/// Export all live cache entries as JSON to stdout.
pub async fn export(config: &EmbedCacheConfig) -> Result<()> {
    let cache = super::open_cache(config).await;
    let entries = cache.export();
    cache.shutdown().await;

    let json = serde_json::to_string_pretty(&entries)?;
    println!("{json}");

    eprintln!("Exported {} entries.", entries.len());
    Ok(())
}
