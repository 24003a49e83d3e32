//! Quote Cache - short-TTL store for repeated chain reads
//!
//! Shields the snapshot pipeline from redundant RPC traffic within one
//! decision cycle and across nearby cycles. This is a latency layer, not a
//! source of truth: a miss or an expired entry is `None` and every caller
//! has a live-read fallback.

use alloy_primitives::U256;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::trace;

/// Default number of entries the cache will hold (the pipeline uses a
/// handful of well-known keys).
pub const DEFAULT_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: U256,
    expires_at: Instant,
}

/// Bounded key → value store with per-entry TTL.
///
/// Safe for concurrent readers and writers within the same snapshot
/// fan-out. When full, expired entries are dropped first, then the entry
/// closest to expiry.
pub struct QuoteCache {
    entries: RwLock<HashMap<&'static str, CacheEntry>>,
    capacity: usize,
}

impl QuoteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Look up a live (non-expired) entry.
    pub async fn get(&self, key: &'static str) -> Option<U256> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                trace!(key, "quote cache hit");
                Some(entry.value)
            }
            _ => None,
        }
    }

    /// Store a value under `key` for `ttl`.
    pub async fn insert(&self, key: &'static str, value: U256, ttl: Duration) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| *k)
                {
                    entries.remove(oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_after_insert() {
        let cache = QuoteCache::default();
        cache
            .insert("base_fee", U256::from(42u64), Duration::from_secs(5))
            .await;
        assert_eq!(cache.get("base_fee").await, Some(U256::from(42u64)));
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let cache = QuoteCache::default();
        assert_eq!(cache.get("never_set").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = QuoteCache::default();
        cache
            .insert("gas_limit", U256::from(7u64), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get("gas_limit").await, None);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_value() {
        let cache = QuoteCache::default();
        cache
            .insert("tip", U256::from(1u64), Duration::from_secs(5))
            .await;
        cache
            .insert("tip", U256::from(2u64), Duration::from_secs(5))
            .await;
        assert_eq!(cache.get("tip").await, Some(U256::from(2u64)));
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = QuoteCache::new(2);
        cache
            .insert("a", U256::from(1u64), Duration::from_secs(1))
            .await;
        cache
            .insert("b", U256::from(2u64), Duration::from_secs(2))
            .await;
        cache
            .insert("c", U256::from(3u64), Duration::from_secs(3))
            .await;

        assert_eq!(cache.len().await, 2);
        // "a" had the earliest expiry and was evicted
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("c").await, Some(U256::from(3u64)));
    }
}
