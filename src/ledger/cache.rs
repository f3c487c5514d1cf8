//! Cache-invalidation side channel
//!
//! The engine never caches reads itself; it only signals pattern-based
//! invalidation to whatever cache the consuming service runs. Failures
//! here are logged and swallowed - they must never fail a financial
//! operation.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Cache invalidation failed: {0}")]
pub struct CacheError(pub String);

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Delete all cache entries matching the pattern (`*` wildcard)
    async fn invalidate(&self, pattern: &str) -> Result<(), CacheError>;
}

/// Invalidation patterns touched by a wallet mutation
pub fn wallet_patterns(tenant_id: &str, user_id: i64) -> Vec<String> {
    vec![
        format!("wallet:{tenant_id}:{user_id}:*"),
        format!("wallets:{tenant_id}:*"),
    ]
}

/// Default invalidator for services that run no wallet cache
pub struct NoopCache;

#[async_trait]
impl CacheInvalidator for NoopCache {
    async fn invalidate(&self, _pattern: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Records invalidated patterns; lets tests assert on the side channel
/// without a real cache
#[derive(Default)]
pub struct MemoryCache {
    invalidated: Mutex<Vec<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().expect("cache mutex poisoned").clone()
    }
}

#[async_trait]
impl CacheInvalidator for MemoryCache {
    async fn invalidate(&self, pattern: &str) -> Result<(), CacheError> {
        self.invalidated
            .lock()
            .map_err(|e| CacheError(e.to_string()))?
            .push(pattern.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_patterns_scope_tenant_and_user() {
        let patterns = wallet_patterns("brand-a", 1001);
        assert_eq!(
            patterns,
            vec!["wallet:brand-a:1001:*".to_string(), "wallets:brand-a:*".to_string()]
        );
    }

    #[tokio::test]
    async fn test_memory_cache_records_patterns() {
        let cache = MemoryCache::new();
        cache.invalidate("wallet:default:1:*").await.unwrap();
        cache.invalidate("wallets:default:*").await.unwrap();
        assert_eq!(cache.invalidated().len(), 2);
    }
}
