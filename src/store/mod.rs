//! 存储抽象模块：为限流器和响应缓存提供共享（Redis）或进程内的键值/有序集合后端。
//!
//! # Store Abstraction
//!
//! The rate limiter and the response cache keep their shared state behind the
//! [`Store`] trait. Two implementations exist:
//!
//! | Implementation | Scope | Use |
//! |----------------|-------|-----|
//! | [`RedisStore`] | shared by every gateway instance | multi-instance deployments |
//! | [`MemoryStore`] | this process only | single instance, tests, Redis unavailable |
//!
//! The implementation is chosen once, at startup, by [`connect_store`]: if a
//! Redis URL is configured and answers `PING`, it is used; otherwise the
//! gateway runs in local mode. Nothing downstream needs to know which.
//!
//! ## Key layout
//!
//! - `rate_limit:<key>`: sorted set of request timestamps (score = ms)
//! - `cache:<fingerprint>`: serialized cache entry (distributed stores only)
//!
//! Every key is written with an expiry (window or TTL plus a small buffer).

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Namespace for rate-limit windows.
pub const RATE_LIMIT_NAMESPACE: &str = "rate_limit";
/// Namespace for mirrored cache entries.
pub const CACHE_NAMESPACE: &str = "cache";

#[async_trait]
pub trait Store: Send + Sync {
    /// Record one hit in a sliding-window log as a single atomic unit:
    /// drop members scored at or below `now_ms - window_ms`, count what remains,
    /// add `member` at `now_ms`, and (re)set the key expiry to `expire_ms`.
    ///
    /// Returns the number of hits in the window including this one.
    async fn sliding_window_hit(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window_ms: u64,
        expire_ms: u64,
    ) -> Result<u64>;

    /// Drop a sliding-window log entirely.
    async fn window_clear(&self, key: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Cheap liveness check used by the startup probe.
    async fn ping(&self) -> Result<()>;

    fn name(&self) -> &'static str;

    /// Whether the data is visible to other gateway instances.
    fn is_distributed(&self) -> bool;

    /// Free expired keys the backend does not expire on its own. Returns how many went.
    fn purge_expired(&self) -> usize {
        0
    }
}

/// Which kind of store the startup probe selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    Distributed,
    Local,
}

impl StoreMode {
    pub fn of(store: &dyn Store) -> Self {
        if store.is_distributed() {
            StoreMode::Distributed
        } else {
            StoreMode::Local
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: Option<String>,
    /// Upper bound for a single store round-trip.
    pub op_timeout: Duration,
    /// Prepended to every key as `<prefix>:` when set.
    pub key_prefix: Option<String>,
    /// Added to window/TTL expiries so keys outlive their logical lifetime slightly.
    pub expiry_buffer: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            op_timeout: Duration::from_millis(100),
            key_prefix: None,
            expiry_buffer: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Build a namespaced store key, e.g. `cache:abc123` or `tenant1:rate_limit:user:42`.
pub fn store_key(prefix: Option<&str>, namespace: &str, key: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}:{}:{}", p, namespace, key),
        _ => format!("{}:{}", namespace, key),
    }
}

/// Startup capability probe.
///
/// Returns a Redis-backed store when one is configured and reachable,
/// otherwise an in-process [`MemoryStore`]. Never fails: an unreachable Redis
/// only downgrades the gateway to local mode.
pub async fn connect_store(cfg: &StoreConfig) -> Arc<dyn Store> {
    let Some(url) = cfg.redis_url.as_deref() else {
        info!("no redis url configured; using in-process store");
        return Arc::new(MemoryStore::new());
    };

    match RedisStore::connect(url, cfg.op_timeout).await {
        Ok(store) => match store.ping().await {
            Ok(()) => {
                info!(store = store.name(), "shared store reachable; running distributed");
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "redis ping failed; falling back to in-process store");
                Arc::new(MemoryStore::new())
            }
        },
        Err(e) => {
            warn!(error = %e, "redis connect failed; falling back to in-process store");
            Arc::new(MemoryStore::new())
        }
    }
}
