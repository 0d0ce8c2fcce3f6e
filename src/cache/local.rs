//! Bounded in-process tier.

use lru::LruCache;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at_ms: u64,
    pub expires_at_ms: u64,
    pub access_count: u64,
    pub last_accessed_at_ms: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, inserted_at_ms: u64, expires_at_ms: u64) -> Self {
        Self {
            value,
            inserted_at_ms,
            expires_at_ms,
            access_count: 0,
            last_accessed_at_ms: inserted_at_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Result of a local lookup.
pub(crate) enum Lookup<V> {
    Hit(V),
    Expired,
    Miss,
}

/// LRU map that never holds more than `max_size` entries.
///
/// The recency order lives in the `LruCache`; capacity is enforced here so
/// overflow is handled in batches of roughly a tenth of the capacity instead
/// of one entry per insert.
pub(crate) struct LocalTier<V> {
    entries: LruCache<String, CacheEntry<V>>,
    max_size: usize,
}

impl<V: Clone> LocalTier<V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_size: max_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up and promote. Expired entries are removed instead of returned.
    pub fn get(&mut self, key: &str, now: u64) -> Lookup<V> {
        let expired = match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                entry.last_accessed_at_ms = now;
                return Lookup::Hit(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
            Lookup::Expired
        } else {
            Lookup::Miss
        }
    }

    pub fn contains_live(&self, key: &str, now: u64) -> bool {
        self.entries
            .peek(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    /// Insert as most recent. Returns how many entries were evicted to make room.
    pub fn insert(&mut self, key: String, entry: CacheEntry<V>) -> usize {
        self.entries.put(key, entry);
        if self.entries.len() <= self.max_size {
            return 0;
        }
        let overflow = self.entries.len() - self.max_size;
        let batch = (self.max_size / 10).max(1).max(overflow);
        let mut evicted = 0;
        for _ in 0..batch {
            if self.entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    /// Purge every expired entry, touched or not. Returns how many were removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.entries.pop(k);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn entry(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.peek(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_ms;

    fn entry(v: u32, ttl_ms: u64) -> CacheEntry<u32> {
        let now = now_ms();
        CacheEntry::new(v, now, now + ttl_ms)
    }

    #[test]
    fn test_batch_eviction_keeps_size_bounded() {
        let mut tier = LocalTier::new(20);
        let mut evicted = 0;
        for i in 0..21 {
            evicted += tier.insert(format!("k{}", i), entry(i, 60_000));
        }
        // one overflow evicts a tenth of the capacity at once
        assert_eq!(evicted, 2);
        assert_eq!(tier.len(), 19);
        assert!(tier.len() <= tier.max_size());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut tier = LocalTier::new(3);
        tier.insert("a".into(), entry(1, 60_000));
        tier.insert("b".into(), entry(2, 60_000));
        tier.insert("c".into(), entry(3, 60_000));
        // touch "a" so "b" becomes the oldest
        assert!(matches!(tier.get("a", now_ms()), Lookup::Hit(1)));
        tier.insert("d".into(), entry(4, 60_000));
        assert!(matches!(tier.get("b", now_ms()), Lookup::Miss));
        assert!(matches!(tier.get("a", now_ms()), Lookup::Hit(1)));
    }

    #[test]
    fn test_expired_entries_are_removed_on_get() {
        let mut tier = LocalTier::new(10);
        let now = now_ms();
        tier.insert("old".into(), CacheEntry::new(1, now - 10, now - 1));
        assert!(matches!(tier.get("old", now), Lookup::Expired));
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_access_tracking() {
        let mut tier = LocalTier::new(10);
        tier.insert("k".into(), entry(7, 60_000));
        let now = now_ms();
        let _ = tier.get("k", now);
        let _ = tier.get("k", now + 5);
        let e = tier.entry("k").unwrap();
        assert_eq!(e.access_count, 2);
        assert_eq!(e.last_accessed_at_ms, now + 5);
    }

    #[test]
    fn test_sweep() {
        let mut tier = LocalTier::new(10);
        let now = now_ms();
        tier.insert("live".into(), CacheEntry::new(1, now, now + 60_000));
        tier.insert("dead1".into(), CacheEntry::new(2, now - 10, now - 1));
        tier.insert("dead2".into(), CacheEntry::new(3, now - 10, now - 1));
        assert_eq!(tier.sweep(now), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains_live("live", now));
    }
}
