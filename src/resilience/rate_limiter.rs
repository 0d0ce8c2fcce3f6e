use crate::store::{store_key, Store, RATE_LIMIT_NAMESPACE};
use crate::utils::{duration_ms, now_ms};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a single `check_limit` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Wall-clock time (ms) at which the current window is guaranteed to have rolled over.
    pub reset_time_ms: u64,
    /// Requests counted in the window, including this one.
    pub total_requests: u64,
    pub limit: u64,
    /// True when the shared store was unreachable and the per-instance counter decided.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1 when rejected.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let wait = self.reset_time_ms.saturating_sub(now_ms);
        let secs = wait.div_ceil(1000);
        if self.allowed {
            secs
        } else {
            secs.max(1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    /// 10 requests per minute, the AI endpoint default.
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn with_max_requests(mut self, max: u64) -> Self {
        self.max_requests = max;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimiterStats {
    pub checks: u64,
    pub rejections: u64,
    pub store_fallbacks: u64,
    pub fallback_keys: usize,
}

#[derive(Debug)]
struct LocalWindow {
    count: u64,
    started_at_ms: u64,
    window_ms: u64,
}

#[derive(Default)]
struct Counters {
    checks: AtomicU64,
    rejections: AtomicU64,
    store_fallbacks: AtomicU64,
}

/// Sliding-window-log rate limiter keyed by user or client address.
///
/// The log lives in the [`Store`] under `rate_limit:<key>` and is updated with
/// one atomic prune/count/add/expire unit per check, so concurrent callers on
/// any instance never lose updates. Rejected attempts are logged too: a caller
/// that keeps retrying inside the window stays limited.
///
/// If the store call fails the check is decided by a per-instance fixed-window
/// counter with the same numeric limit. That path never errors.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    key_prefix: Option<String>,
    expiry_buffer: Duration,
    fallback: Mutex<HashMap<String, LocalWindow>>,
    counters: Counters,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            key_prefix: None,
            expiry_buffer: Duration::from_secs(1),
            fallback: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: Option<String>) -> Self {
        self.key_prefix = prefix;
        self
    }

    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    fn window_key(&self, key: &str) -> String {
        store_key(self.key_prefix.as_deref(), RATE_LIMIT_NAMESPACE, key)
    }

    fn decide(total: u64, max_requests: u64, reset_time_ms: u64, degraded: bool) -> RateLimitDecision {
        RateLimitDecision {
            allowed: total <= max_requests,
            remaining: (max_requests + 1).saturating_sub(total),
            reset_time_ms,
            total_requests: total,
            limit: max_requests,
            degraded,
        }
    }

    /// Count one request for `key` against `max_requests` per `window`.
    ///
    /// `identifier` tags the log entry (request id, route) and keeps members
    /// unique together with a random suffix.
    pub async fn check_limit(
        &self,
        key: &str,
        max_requests: u64,
        window: Duration,
        identifier: &str,
    ) -> RateLimitDecision {
        self.counters.checks.fetch_add(1, Ordering::Relaxed);
        let now = now_ms();
        let window_ms = duration_ms(window);
        let member = format!("{}-{}-{}", now, identifier, uuid::Uuid::new_v4().simple());
        let expire_ms = window_ms + duration_ms(self.expiry_buffer);

        let decision = match self
            .store
            .sliding_window_hit(&self.window_key(key), &member, now, window_ms, expire_ms)
            .await
        {
            Ok(total) => Self::decide(total, max_requests, now + window_ms, false),
            Err(e) => {
                self.counters.store_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "rate limit store unavailable; using local counter");
                self.check_local(key, max_requests, window_ms, now)
            }
        };

        if !decision.allowed {
            self.counters.rejections.fetch_add(1, Ordering::Relaxed);
            debug!(
                key,
                total = decision.total_requests,
                limit = max_requests,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// Convenience wrapper taking a [`RateLimitPolicy`].
    pub async fn check(&self, key: &str, policy: &RateLimitPolicy, identifier: &str) -> RateLimitDecision {
        self.check_limit(key, policy.max_requests, policy.window, identifier)
            .await
    }

    fn check_local(&self, key: &str, max_requests: u64, window_ms: u64, now: u64) -> RateLimitDecision {
        let Ok(mut windows) = self.fallback.lock() else {
            // poisoned map: decide as a first hit
            return Self::decide(1, max_requests, now + window_ms, true);
        };
        let w = windows.entry(key.to_string()).or_insert(LocalWindow {
            count: 0,
            started_at_ms: now,
            window_ms,
        });
        if now.saturating_sub(w.started_at_ms) >= window_ms || w.window_ms != window_ms {
            w.count = 0;
            w.started_at_ms = now;
            w.window_ms = window_ms;
        }
        w.count += 1;
        Self::decide(w.count, max_requests, w.started_at_ms + window_ms, true)
    }

    /// Administrative override: forget every counted request for `key`.
    pub async fn reset_limit(&self, key: &str) -> Result<()> {
        if let Ok(mut windows) = self.fallback.lock() {
            windows.remove(key);
        }
        self.store.window_clear(&self.window_key(key)).await
    }

    /// Drop local fallback windows that have fully elapsed. Returns how many were removed.
    pub fn prune_fallback(&self) -> usize {
        let now = now_ms();
        match self.fallback.lock() {
            Ok(mut windows) => {
                let before = windows.len();
                windows.retain(|_, w| now.saturating_sub(w.started_at_ms) < w.window_ms);
                before - windows.len()
            }
            Err(_) => 0,
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            checks: self.counters.checks.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
            store_fallbacks: self.counters.store_fallbacks.load(Ordering::Relaxed),
            fallback_keys: self.fallback.lock().map(|w| w.len()).unwrap_or(0),
        }
    }
}
