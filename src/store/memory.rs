//! In-process store.

use super::Store;
use crate::utils::now_ms;
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Window {
    /// (score_ms, member) kept ordered so pruning is a range split.
    hits: BTreeSet<(u64, String)>,
    expires_at_ms: u64,
}

struct Value {
    data: Vec<u8>,
    expires_at_ms: u64,
}

#[derive(Default)]
struct Inner {
    windows: HashMap<String, Window>,
    values: HashMap<String, Value>,
}

/// Local-mode store: the same contract as Redis, held in this process.
///
/// Every operation completes under one lock, which gives the sliding-window
/// hit the same atomicity the Redis `MULTI` pipeline has.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| {
            crate::Error::store_with_context(
                "memory store poisoned",
                crate::ErrorContext::new().with_source("memory_store"),
            )
        })
    }

    /// Drop expired keys. Lazy expiry already hides them; this just frees memory.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        match self.inner.lock() {
            Ok(mut inner) => {
                let before = inner.windows.len() + inner.values.len();
                inner.windows.retain(|_, w| w.expires_at_ms > now);
                inner.values.retain(|_, v| v.expires_at_ms > now);
                before - (inner.windows.len() + inner.values.len())
            }
            Err(_) => 0,
        }
    }

    pub fn key_count(&self) -> usize {
        self.inner
            .lock()
            .map(|i| i.windows.len() + i.values.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn sliding_window_hit(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window_ms: u64,
        expire_ms: u64,
    ) -> Result<u64> {
        let mut inner = self.lock()?;
        let window = inner.windows.entry(key.to_string()).or_default();
        if window.expires_at_ms != 0 && window.expires_at_ms <= now_ms {
            window.hits.clear();
        }
        let cutoff = now_ms.saturating_sub(window_ms);
        // keep scores strictly greater than the cutoff
        window.hits = window.hits.split_off(&(cutoff + 1, String::new()));
        window.hits.insert((now_ms, member.to_string()));
        window.expires_at_ms = now_ms.saturating_add(expire_ms);
        Ok(window.hits.len() as u64)
    }

    async fn window_clear(&self, key: &str) -> Result<()> {
        self.lock()?.windows.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.lock()?;
        let now = now_ms();
        let expired = match inner.values.get(key) {
            Some(v) if v.expires_at_ms > now => return Ok(Some(v.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at_ms = now_ms().saturating_add(crate::utils::duration_ms(ttl));
        self.lock()?.values.insert(
            key.to_string(),
            Value {
                data: value.to_vec(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.values.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }

    fn purge_expired(&self) -> usize {
        MemoryStore::purge_expired(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sliding_window_counts_and_prunes() {
        let store = MemoryStore::new();
        let t0 = 1_000_000;
        assert_eq!(store.sliding_window_hit("k", "a", t0, 1_000, 2_000).await.unwrap(), 1);
        assert_eq!(store.sliding_window_hit("k", "b", t0 + 10, 1_000, 2_000).await.unwrap(), 2);
        assert_eq!(store.sliding_window_hit("k", "c", t0 + 500, 1_000, 2_000).await.unwrap(), 3);
        // t0 is exactly one window old now and falls out
        assert_eq!(store.sliding_window_hit("k", "d", t0 + 1_000, 1_000, 2_000).await.unwrap(), 3);
        assert_eq!(store.sliding_window_hit("k", "e", t0 + 5_000, 1_000, 2_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_window_keys_are_independent() {
        let store = MemoryStore::new();
        store.sliding_window_hit("a", "1", 10, 100, 200).await.unwrap();
        store.sliding_window_hit("a", "2", 11, 100, 200).await.unwrap();
        assert_eq!(store.sliding_window_hit("b", "1", 12, 100, 200).await.unwrap(), 1);
        store.window_clear("a").await.unwrap();
        assert_eq!(store.sliding_window_hit("a", "3", 13, 100, 200).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_value_ttl() {
        let store = MemoryStore::new();
        store.set("cache:x", b"hello", Duration::from_millis(30)).await.unwrap();
        assert_eq!(store.get("cache:x").await.unwrap(), Some(b"hello".to_vec()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("cache:x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let store = MemoryStore::new();
        store.set("a", b"1", Duration::from_secs(60)).await.unwrap();
        store.set("b", b"2", Duration::from_millis(1)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.key_count(), 0);
    }
}
