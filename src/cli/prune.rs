//! CLI `prune` command: drop expired entries from the snapshot.

use anyhow::Result;

use embedcache::config::EmbedCacheConfig;

pub async fn prune(config: &EmbedCacheConfig) -> Result<()> {
    if config.cache.ttl_ms == 0 {
        println!("No TTL configured; nothing can expire.");
        return Ok(());
    }

    let cache = super::open_cache(config).await;
    cache.prune();
    // Entries already past their TTL at load time are counted too.
    let removed = cache.statistics().expirations;
    cache.shutdown().await;

    println!("Pruned {removed} expired entries. {} remain.", cache.len());
    Ok(())
}
