use anyhow::Result;

use embedcache::config::EmbedCacheConfig;
use embedcache::EmbeddingKind;

/// Display cache statistics in the terminal.
pub async fn stats(config: &EmbedCacheConfig) -> Result<()> {
    let cache = super::open_cache(config).await;
    let stats = cache.statistics();
    let entries = cache.export();
    cache.shutdown().await;

    let count_kind = |kind: EmbeddingKind| entries.iter().filter(|e| e.value.kind == kind).count();
    let truncated = entries.iter().filter(|e| e.value.truncated).count();

    println!("Embedding Cache Statistics");
    println!("{}", "=".repeat(40));
    println!("  Snapshot:            {}", config.cache.resolved_snapshot_path().display());
    println!("  Entries:             {} / {}", stats.size, stats.max_size);
    println!("  Live entries:        {}", entries.len());
    println!("  Estimated memory:    {} bytes", stats.estimated_memory_bytes);
    if config.cache.ttl_ms > 0 {
        println!("  TTL:                 {} ms", config.cache.ttl_ms);
    } else {
        println!("  TTL:                 none");
    }
    println!();

    println!("By Kind:");
    for kind in [EmbeddingKind::Query, EmbeddingKind::Document] {
        println!("  {:<12} {}", kind.as_str(), count_kind(kind));
    }
    println!();

    println!("Truncated entries:     {truncated}");
    Ok(())
}
