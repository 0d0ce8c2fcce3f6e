//! 网关编排模块：按 限流 → 预算 → 缓存 → 熔断/上游 的顺序处理每个 AI 请求。
//!
//! # Gateway Orchestrator
//!
//! [`Gateway`] owns one instance of every guard and runs each
//! [`GatewayRequest`] through them in a fixed order:
//!
//! 1. rate limiter: over the limit → 429 with `retryAfter` and `remaining`
//! 2. budget: trailing 24h spend ≥ daily limit → 402 `budget_limit_fallback`
//! 3. cache (fingerprinted requests only): hit → 200 `cache`
//! 4. circuit breaker + upstream: success → 200 tagged with the model name,
//!    failure → 503/504 `circuit_breaker_fallback`
//!
//! Every outcome is a [`GatewayResponse`] with the request's domain fields and
//! a `source` tag. Malformed requests are rejected with 400 before any guard
//! runs and are not accounted anywhere.

mod identity;
mod request;
mod response;

pub use identity::{IdentityKind, RequestIdentity, MAX_IDENTITY_LEN, USER_ID_HEADER};
pub use request::GatewayRequest;
pub use response::{GatewayResponse, ResponseSource};

use crate::cache::{CacheConfig, ResponseCache};
use crate::config::GatewayConfig;
use crate::provider::{HttpProvider, UpstreamProvider};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimitPolicy, RateLimiter};
use crate::store::{connect_store, Store, StoreConfig, StoreMode};
use crate::telemetry::GatewayStatus;
use crate::usage::{format_usd, ModelPricing, UsageConfig, UsageRecord, UsageTracker};
use crate::utils::now_ms;
use crate::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Assembles a [`Gateway`] from component configs.
#[derive(Default)]
pub struct GatewayBuilder {
    breaker: CircuitBreakerConfig,
    rate_limit: RateLimitPolicy,
    cache: CacheConfig,
    usage: UsageConfig,
    store_config: StoreConfig,
    store: Option<Arc<dyn Store>>,
    provider: Option<Arc<dyn UpstreamProvider>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded from a validated [`GatewayConfig`], including the
    /// HTTP provider when one is configured.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        cfg.validate()?;
        let mut builder = Self::new()
            .with_breaker_config(cfg.breaker_config())
            .with_rate_limit(cfg.rate_limit_policy())
            .with_cache_config(cfg.cache_config())
            .with_usage_config(cfg.usage_config())
            .with_store_config(cfg.store_config());
        if let Some(provider_cfg) = cfg.provider_config() {
            builder = builder.with_provider(Arc::new(HttpProvider::new(provider_cfg)?));
        }
        Ok(builder)
    }

    pub fn with_breaker_config(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.breaker = cfg;
        self
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    pub fn with_cache_config(mut self, cfg: CacheConfig) -> Self {
        self.cache = cfg;
        self
    }

    pub fn with_usage_config(mut self, cfg: UsageConfig) -> Self {
        self.usage = cfg;
        self
    }

    /// Store settings used by the startup probe. Ignored if [`with_store`](Self::with_store) is set.
    pub fn with_store_config(mut self, cfg: StoreConfig) -> Self {
        self.store_config = cfg;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn UpstreamProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub async fn build(self) -> Gateway {
        let store = match self.store {
            Some(store) => store,
            None => connect_store(&self.store_config).await,
        };
        let prefix = self.store_config.key_prefix.clone();
        let limiter = RateLimiter::new(store.clone())
            .with_key_prefix(prefix.clone())
            .with_expiry_buffer(self.store_config.expiry_buffer);
        let mut cache_cfg = self.cache;
        if cache_cfg.key_prefix.is_none() {
            cache_cfg.key_prefix = prefix;
        }
        cache_cfg.expiry_buffer = self.store_config.expiry_buffer;

        info!(
            store = store.name(),
            provider = self.provider.as_ref().map(|p| p.name()).unwrap_or("none"),
            max_requests = self.rate_limit.max_requests,
            window_ms = self.rate_limit.window.as_millis() as u64,
            daily_limit_usd = self.usage.daily_limit_usd,
            "gateway ready"
        );

        Gateway {
            breaker: Arc::new(CircuitBreaker::new(self.breaker)),
            limiter: Arc::new(limiter),
            cache: Arc::new(ResponseCache::with_store(cache_cfg, store.clone())),
            usage: Arc::new(UsageTracker::new(self.usage)),
            policy: self.rate_limit,
            store,
            provider: self.provider,
            maintenance: Mutex::new(None),
        }
    }
}

/// Per-process request pipeline. Construct once at startup and share.
pub struct Gateway {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    usage: Arc<UsageTracker>,
    policy: RateLimitPolicy,
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn UpstreamProvider>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn store_mode(&self) -> StoreMode {
        StoreMode::of(&*self.store)
    }

    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        if let Err(e) = request.validate() {
            debug!(error = %e, "rejecting malformed request");
            return GatewayResponse::validation_error(&e.to_string());
        }
        let user_id = request.identity.id().to_string();
        let endpoint = request.endpoint.as_str();

        let decision = self
            .limiter
            .check(&request.identity.limiter_key(), &self.policy, &user_id)
            .await;
        if !decision.allowed {
            let retry_after = decision.retry_after_secs(now_ms());
            debug!(user_id = %user_id, endpoint, retry_after, "rate limited");
            return GatewayResponse::rate_limited(request.fallback_fields(), retry_after, decision.remaining);
        }

        let budget = self.usage.check_budget(&user_id);
        if budget.exceeded {
            warn!(
                user_id = %user_id,
                spent = %format_usd(budget.spent_usd),
                limit = %format_usd(budget.limit_usd),
                "daily AI budget exceeded"
            );
            return GatewayResponse::budget_exceeded(request.fallback_fields(), &budget);
        }

        if let Some(fp) = &request.fingerprint {
            if let Some(Value::Object(content)) = self.cache.get(fp.as_str()).await {
                self.usage
                    .track_usage(UsageRecord::now(&user_id, endpoint, "cache", 0, 0.0, true));
                return GatewayResponse::cached(content);
            }
        }

        let Some(provider) = self.provider.clone() else {
            return GatewayResponse::intelligent_fallback(request.fallback_fields());
        };

        let upstream = request.to_upstream();
        match self.breaker.execute(|| provider.generate(&upstream)).await {
            Ok(resp) => {
                let cost = resp
                    .cost_usd
                    .unwrap_or_else(|| ModelPricing::cost_for(&resp.model, resp.usage));
                if let Some(fp) = &request.fingerprint {
                    let mut cached = resp.content.clone();
                    cached.insert("model".into(), Value::String(resp.model.clone()));
                    self.cache
                        .set(fp.as_str(), Value::Object(cached), request.cache_ttl)
                        .await;
                }
                self.usage.track_usage(UsageRecord::now(
                    &user_id,
                    endpoint,
                    &resp.model,
                    resp.usage.total(),
                    cost,
                    true,
                ));
                GatewayResponse::model(resp.content, &resp.model, resp.usage, cost)
            }
            Err(e) => {
                warn!(user_id = %user_id, endpoint, error = %e, "upstream call failed; serving fallback");
                self.usage
                    .track_usage(UsageRecord::now(&user_id, endpoint, provider.name(), 0, 0.0, false));
                GatewayResponse::upstream_unavailable(e.http_status(), request.fallback_fields(), &e.to_string())
            }
        }
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            store_mode: self.store_mode(),
            store: self.store.name().to_string(),
            provider: self.provider.as_ref().map(|p| p.name().to_string()),
            circuit_breaker: self.breaker.get_status(),
            rate_limiter: self.limiter.stats(),
            cache: self.cache.get_stats(),
            usage: self.usage.get_usage_stats(),
            generated_at_ms: now_ms(),
        }
    }

    /// Start the periodic cache sweep, fallback-counter pruning and local
    /// store purge.
    ///
    /// Must be called inside a tokio runtime. Calling it again while the task
    /// is alive is a no-op.
    pub fn start_maintenance(&self) {
        let Ok(mut slot) = self.maintenance.lock() else {
            return;
        };
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let cache = self.cache.clone();
        let limiter = self.limiter.clone();
        let store = self.store.clone();
        let period = cache.config().sweep_interval.max(Duration::from_millis(10));
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let expired = cache.sweep_expired();
                let pruned = limiter.prune_fallback();
                let purged = store.purge_expired();
                if expired > 0 || pruned > 0 || purged > 0 {
                    debug!(expired, pruned, purged, "maintenance sweep");
                }
            }
        }));
        debug!(period_ms = period.as_millis() as u64, "maintenance task started");
    }

    pub fn maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .map(|slot| slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Stop background maintenance.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                info!("gateway maintenance stopped");
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
