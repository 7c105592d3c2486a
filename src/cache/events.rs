//! Change notification for [`super::embedding::EmbeddingCache`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheEventKind {
    Set,
    GetHit,
    GetMiss,
    Delete,
    Evict,
    Expire,
    Clear,
}

impl CacheEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::GetHit => "get-hit",
            Self::GetMiss => "get-miss",
            Self::Delete => "delete",
            Self::Evict => "evict",
            Self::Expire => "expire",
            Self::Clear => "clear",
        }
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cache change. `key` is `None` only for [`CacheEventKind::Clear`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub key: Option<String>,
}

impl CacheEvent {
    pub fn keyed(kind: CacheEventKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: Some(key.into()),
        }
    }

    pub fn clear() -> Self {
        Self {
            kind: CacheEventKind::Clear,
            key: None,
        }
    }
}

/// Receives cache events synchronously, in the order they happened, from
/// inside the operation that caused them. The cache lock is not held during
/// delivery, so listeners may call back into the cache.
pub trait CacheListener: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheListener for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event)
    }
}
