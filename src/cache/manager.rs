//! Two-tier response cache.

use super::local::{CacheEntry, LocalTier, Lookup};
use crate::store::{store_key, Store, CACHE_NAMESPACE};
use crate::utils::{duration_ms, now_ms};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    /// Mirror entries into the shared store tier.
    pub distributed: bool,
    /// Entries whose serialized form exceeds this are kept local only.
    pub max_entry_bytes: usize,
    /// Added to the TTL of store-tier keys; reads still honor the entry's own expiry.
    pub expiry_buffer: Duration,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            distributed: true,
            max_entry_bytes: 512 * 1024,
            expiry_buffer: Duration::from_secs(1),
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }
    pub fn with_max_entry_bytes(mut self, max: usize) -> Self {
        self.max_entry_bytes = max;
        self
    }
    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }
    pub fn with_key_prefix(mut self, prefix: Option<String>) -> Self {
        self.key_prefix = prefix;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub local_misses: u64,
    pub store_hits: u64,
    pub store_misses: u64,
    pub store_errors: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expired: u64,
    pub size: usize,
    pub max_size: usize,
}

impl CacheStats {
    /// Share of lookups answered by either tier.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.local_hits + self.store_hits;
        let total = self.local_hits + self.local_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    store_hits: AtomicU64,
    store_misses: AtomicU64,
    store_errors: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry<V> {
    value: V,
    inserted_at_ms: u64,
    expires_at_ms: u64,
}

/// TTL + LRU cache from request fingerprint to a previously computed response.
///
/// Lookups try the local tier first, then the shared store (repopulating the
/// local tier on a store hit). Writes go to both. Store failures only cost a
/// miss; they are counted and never returned.
///
/// There is no single-flight: concurrent misses for one fingerprint may all
/// reach upstream and all write back, last write wins.
pub struct ResponseCache<V = serde_json::Value> {
    config: CacheConfig,
    local: Mutex<LocalTier<V>>,
    store: Option<Arc<dyn Store>>,
    stats: AtomicStats,
}

impl<V> ResponseCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Local tier only.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            local: Mutex::new(LocalTier::new(config.max_size)),
            config,
            store: None,
            stats: AtomicStats::default(),
        }
    }

    /// Local tier plus the shared store tier.
    ///
    /// The store tier is only attached when `config.distributed` is set and the
    /// store is visible to other instances. With a process-local store the cache
    /// stays single-tier and bounded by `max_size`.
    pub fn with_store(config: CacheConfig, store: Arc<dyn Store>) -> Self {
        let store = if config.distributed && store.is_distributed() {
            Some(store)
        } else {
            if config.distributed {
                debug!(store = store.name(), "store is process-local; cache stays single-tier");
            }
            None
        };
        Self {
            local: Mutex::new(LocalTier::new(config.max_size)),
            config,
            store,
            stats: AtomicStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn store_key(&self, fingerprint: &str) -> String {
        store_key(self.config.key_prefix.as_deref(), CACHE_NAMESPACE, fingerprint)
    }

    fn put_local(&self, fingerprint: &str, entry: CacheEntry<V>) {
        if let Ok(mut local) = self.local.lock() {
            let evicted = local.insert(fingerprint.to_string(), entry);
            if evicted > 0 {
                self.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                debug!(evicted, size = local.len(), "cache batch eviction");
            }
        }
    }

    pub async fn get(&self, fingerprint: &str) -> Option<V> {
        let now = now_ms();
        let lookup = match self.local.lock() {
            Ok(mut local) => local.get(fingerprint, now),
            Err(_) => Lookup::Miss,
        };
        match lookup {
            Lookup::Hit(v) => {
                self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                return Some(v);
            }
            Lookup::Expired => {
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
                self.stats.local_misses.fetch_add(1, Ordering::Relaxed);
            }
            Lookup::Miss => {
                self.stats.local_misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        let store = self.store.as_ref()?;
        let raw = match store.get(&self.store_key(fingerprint)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.store_misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "cache store read failed; treating as miss");
                return None;
            }
        };

        let stored: StoredEntry<V> = match serde_json::from_slice(&raw) {
            Ok(s) => s,
            Err(e) => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "cache store entry undecodable; treating as miss");
                return None;
            }
        };
        if stored.expires_at_ms <= now {
            self.stats.store_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.store_hits.fetch_add(1, Ordering::Relaxed);
        let value = stored.value.clone();
        self.put_local(
            fingerprint,
            CacheEntry::new(stored.value, stored.inserted_at_ms, stored.expires_at_ms),
        );
        Some(value)
    }

    /// Write both tiers. `ttl = None` uses the configured default.
    pub async fn set(&self, fingerprint: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = now_ms();
        let expires_at_ms = now.saturating_add(duration_ms(ttl));
        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(store) = self.store.as_ref() {
            let stored = StoredEntry {
                value: value.clone(),
                inserted_at_ms: now,
                expires_at_ms,
            };
            match serde_json::to_vec(&stored) {
                Ok(raw) if raw.len() <= self.config.max_entry_bytes => {
                    let store_ttl = ttl.saturating_add(self.config.expiry_buffer);
                    if let Err(e) = store.set(&self.store_key(fingerprint), &raw, store_ttl).await {
                        self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                        debug!(error = %e, "cache store write failed; kept local only");
                    }
                }
                Ok(raw) => {
                    debug!(bytes = raw.len(), "cache entry too large for store tier");
                }
                Err(e) => {
                    self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "cache entry not serializable for store tier");
                }
            }
        }

        self.put_local(fingerprint, CacheEntry::new(value, now, expires_at_ms));
    }

    /// Remove from both tiers. Returns whether either tier held the entry.
    pub async fn delete(&self, fingerprint: &str) -> bool {
        let local = self
            .local
            .lock()
            .map(|mut l| l.remove(fingerprint))
            .unwrap_or(false);
        let remote = match self.store.as_ref() {
            Some(store) => match store.delete(&self.store_key(fingerprint)).await {
                Ok(d) => d,
                Err(e) => {
                    self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "cache store delete failed");
                    false
                }
            },
            None => false,
        };
        if local || remote {
            self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        }
        local || remote
    }

    /// Whether the local tier holds a live entry. Does not touch recency.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.local
            .lock()
            .map(|l| l.contains_live(fingerprint, now_ms()))
            .unwrap_or(false)
    }

    /// Purge expired local entries that were never re-read.
    pub fn sweep_expired(&self) -> usize {
        let purged = self
            .local
            .lock()
            .map(|mut l| l.sweep(now_ms()))
            .unwrap_or(0);
        if purged > 0 {
            self.stats.expired.fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged, "cache sweep");
        }
        purged
    }

    /// Drop the local tier. Store entries age out on their own TTL.
    pub fn clear(&self) {
        if let Ok(mut l) = self.local.lock() {
            l.clear();
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        let (size, max_size) = self
            .local
            .lock()
            .map(|l| (l.len(), l.max_size()))
            .unwrap_or((0, self.config.max_size));
        CacheStats {
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            local_misses: self.stats.local_misses.load(Ordering::Relaxed),
            store_hits: self.stats.store_hits.load(Ordering::Relaxed),
            store_misses: self.stats.store_misses.load(Ordering::Relaxed),
            store_errors: self.stats.store_errors.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            size,
            max_size,
        }
    }
}
