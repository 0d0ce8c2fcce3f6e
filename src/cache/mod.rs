//! 响应缓存模块：本地 LRU + 共享存储两级缓存，减少重复的上游 AI 调用。
//!
//! # Response Caching Module
//!
//! Two-tier TTL + LRU cache keyed by request [`Fingerprint`].
//!
//! ## Overview
//!
//! | Tier | Scope | Eviction |
//! |------|-------|----------|
//! | local | this process | LRU, batch of ~10% when over capacity; lazy + periodic expiry |
//! | store | every instance sharing a distributed [`Store`](crate::store::Store) (Redis) | key TTL plus expiry buffer |
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | Two-tier cache with hit/miss/eviction statistics |
//! | [`CacheConfig`] | Capacity, default TTL, sweep interval, store mirroring |
//! | [`Fingerprint`] | Deterministic cache key built from semantic request inputs |
//!
//! ## Example
//!
//! ```rust
//! use ai_gateway_rust::cache::{CacheConfig, Fingerprint, ResponseCache};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let cache: ResponseCache = ResponseCache::new(CacheConfig::new().with_max_size(500));
//! let fp = Fingerprint::builder("greeting").time_of_day(9).part("open_deals", 4).build();
//! cache
//!     .set(fp.as_str(), serde_json::json!({"greeting": "Morning!"}), Some(Duration::from_secs(900)))
//!     .await;
//! assert!(cache.get(fp.as_str()).await.is_some());
//! # }
//! ```

mod key;
mod local;
mod manager;

pub use key::{time_of_day, Fingerprint, FingerprintBuilder};
pub use local::CacheEntry;
pub use manager::{CacheConfig, CacheStats, ResponseCache};
