// Ephemeral key-value cache shared by the token manager and the price lookup service.
// Values are opaque bytes; callers decide how to encode them.

use crate::error::CacheError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

// Live counters for the cache
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub eviction_count: AtomicUsize,
    pub expired_count: AtomicUsize,
}

// Point-in-time copy of the counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub eviction_count: usize,
    pub expired_count: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_seconds: 300,
            cleanup_interval_seconds: 60,
        }
    }
}

/// Any store supporting get and set-with-TTL.
///
/// Implementations give no cross-key or read-then-write atomicity: two writers
/// racing on the same key leave whichever value landed last.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores or overwrites `key`. `None` uses the store's default TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    /// Removes `key`, returning whether it was present.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process [`CacheStore`] backed by a sharded concurrent map.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    stats: CacheStats,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            items_count: self.entries.len(),
            hit_count: self.stats.hit_count.load(Ordering::Relaxed),
            miss_count: self.stats.miss_count.load(Ordering::Relaxed),
            eviction_count: self.stats.eviction_count.load(Ordering::Relaxed),
            expired_count: self.stats.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats.expired_count.fetch_add(removed, Ordering::Relaxed);
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    // Makes room for one more key: expired entries go first, then the entry closest to expiry.
    fn make_room(&self) {
        if self.entries.len() < self.config.max_entries {
            return;
        }
        if self.purge_expired() > 0 && self.entries.len() < self.config.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                self.stats.eviction_count.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted cache entry {} to stay within capacity", key);
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();

        // Look up and release the shard guard before any removal.
        let lookup = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.data.clone())
            }
        });

        match lookup {
            Some(Some(data)) => {
                self.stats.hit_count.fetch_add(1, Ordering::Relaxed);
                Ok(Some(data))
            }
            Some(None) => {
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
                {
                    self.stats.expired_count.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.miss_count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or_else(|| Duration::from_secs(self.config.default_ttl_seconds));

        if !self.entries.contains_key(key) {
            self.make_room();
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                data: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }
}
