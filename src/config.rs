//! 网关配置：默认值 < YAML 文件 < 环境变量，加载后统一校验。
//!
//! Gateway configuration.
//!
//! The file format is YAML with one section per component. Every field is
//! optional and falls back to the defaults below; durations are plain
//! integers with a `_ms` or `_secs` suffix.
//!
//! ```yaml
//! breaker:
//!   failure_threshold: 5
//!   open_timeout_ms: 60000
//!   half_open_max_probes: 3
//! rate_limit:
//!   max_requests: 10
//!   window_ms: 60000
//! cache:
//!   max_size: 1000
//!   default_ttl_secs: 3600
//! usage:
//!   daily_limit_usd: 5.0
//! store:
//!   redis_url: redis://127.0.0.1:6379
//! provider:
//!   base_url: https://api.openai.com/v1
//!   model: gpt-4o-mini
//! ```

use crate::cache::CacheConfig;
use crate::provider::ProviderConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimitPolicy};
use crate::store::StoreConfig;
use crate::usage::UsageConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const ENV_REDIS_URL: &str = "AI_GATEWAY_REDIS_URL";
pub const ENV_DAILY_LIMIT_USD: &str = "AI_GATEWAY_DAILY_LIMIT_USD";
pub const ENV_RATE_LIMIT_MAX: &str = "AI_GATEWAY_RATE_LIMIT_MAX";
pub const ENV_RATE_LIMIT_WINDOW_MS: &str = "AI_GATEWAY_RATE_LIMIT_WINDOW_MS";
pub const ENV_PROVIDER_BASE_URL: &str = "AI_GATEWAY_PROVIDER_BASE_URL";
pub const ENV_PROVIDER_MODEL: &str = "AI_GATEWAY_PROVIDER_MODEL";
pub const ENV_PROVIDER_API_KEY: &str = "AI_GATEWAY_PROVIDER_API_KEY";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "AI_GATEWAY_HTTP_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub open_timeout_ms: u64,
    pub half_open_max_probes: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
            half_open_max_probes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_requests: u64,
    pub window_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_size: usize,
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub distributed: bool,
    pub max_entry_bytes: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_secs: 3600,
            sweep_interval_secs: 300,
            distributed: true,
            max_entry_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSection {
    pub max_records: usize,
    pub daily_limit_usd: f64,
    pub expensive_call_threshold_usd: f64,
}

impl Default for UsageSection {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            daily_limit_usd: 5.0,
            expensive_call_threshold_usd: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub redis_url: Option<String>,
    pub op_timeout_ms: u64,
    pub key_prefix: Option<String>,
    pub expiry_buffer_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            redis_url: None,
            op_timeout_ms: 100,
            key_prefix: None,
            expiry_buffer_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub breaker: BreakerSection,
    pub rate_limit: RateLimitSection,
    pub cache: CacheSection,
    pub usage: UsageSection,
    pub store: StoreSection,
    /// No provider means every admitted request gets the deterministic fallback.
    pub provider: Option<ProviderSection>,
}

impl GatewayConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded gateway config file");
        Self::from_yaml_str(&raw)
    }

    /// Defaults, then the optional file, then `AI_GATEWAY_*` variables; validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_REDIS_URL) {
            self.store.redis_url = Some(url);
        }
        if let Some(v) = get(ENV_DAILY_LIMIT_USD) {
            self.usage.daily_limit_usd = parse_env(ENV_DAILY_LIMIT_USD, &v)?;
        }
        if let Some(v) = get(ENV_RATE_LIMIT_MAX) {
            self.rate_limit.max_requests = parse_env(ENV_RATE_LIMIT_MAX, &v)?;
        }
        if let Some(v) = get(ENV_RATE_LIMIT_WINDOW_MS) {
            self.rate_limit.window_ms = parse_env(ENV_RATE_LIMIT_WINDOW_MS, &v)?;
        }

        let base_url = get(ENV_PROVIDER_BASE_URL);
        if base_url.is_some() && self.provider.is_none() {
            self.provider = Some(ProviderSection::default());
        }
        if let Some(provider) = self.provider.as_mut() {
            if let Some(url) = base_url {
                provider.base_url = url;
            }
            if let Some(model) = get(ENV_PROVIDER_MODEL) {
                provider.model = model;
            }
            if let Some(key) = get(ENV_PROVIDER_API_KEY) {
                provider.api_key = Some(key);
            }
            if let Some(v) = get(ENV_HTTP_TIMEOUT_SECS) {
                provider.timeout_secs = parse_env(ENV_HTTP_TIMEOUT_SECS, &v)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("must be at least 1", "breaker.failure_threshold"));
        }
        if self.breaker.open_timeout_ms == 0 {
            return Err(invalid("must be positive", "breaker.open_timeout_ms"));
        }
        if self.breaker.half_open_max_probes == 0 {
            return Err(invalid("must be at least 1", "breaker.half_open_max_probes"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(invalid("must be at least 1", "rate_limit.max_requests"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(invalid("must be positive", "rate_limit.window_ms"));
        }
        if self.cache.max_size == 0 {
            return Err(invalid("must be at least 1", "cache.max_size"));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(invalid("must be positive", "cache.default_ttl_secs"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(invalid("must be positive", "cache.sweep_interval_secs"));
        }
        if self.usage.max_records == 0 {
            return Err(invalid("must be at least 1", "usage.max_records"));
        }
        if !self.usage.daily_limit_usd.is_finite() || self.usage.daily_limit_usd < 0.0 {
            return Err(invalid("must be a non-negative number", "usage.daily_limit_usd"));
        }
        let threshold = self.usage.expensive_call_threshold_usd;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(invalid(
                "must be a non-negative number",
                "usage.expensive_call_threshold_usd",
            ));
        }
        if self.store.op_timeout_ms == 0 {
            return Err(invalid("must be positive", "store.op_timeout_ms"));
        }
        if let Some(url) = &self.store.redis_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| invalid_with_details("is not a valid URL", "store.redis_url", e))?;
            if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(invalid("must use a redis:// or rediss:// scheme", "store.redis_url"));
            }
        }
        if let Some(p) = &self.provider {
            let parsed = url::Url::parse(&p.base_url)
                .map_err(|e| invalid_with_details("is not a valid URL", "provider.base_url", e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid("must be an http(s) URL", "provider.base_url"));
            }
            if p.model.trim().is_empty() {
                return Err(invalid("must not be empty", "provider.model"));
            }
            if p.timeout_secs == 0 {
                return Err(invalid("must be positive", "provider.timeout_secs"));
            }
        }
        Ok(())
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.breaker.failure_threshold)
            .with_open_timeout(Duration::from_millis(self.breaker.open_timeout_ms))
            .with_half_open_max_probes(self.breaker.half_open_max_probes)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.rate_limit.max_requests,
            Duration::from_millis(self.rate_limit.window_ms),
        )
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_max_size(self.cache.max_size)
            .with_ttl(Duration::from_secs(self.cache.default_ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs))
            .with_distributed(self.cache.distributed)
            .with_max_entry_bytes(self.cache.max_entry_bytes)
    }

    pub fn usage_config(&self) -> UsageConfig {
        UsageConfig::new()
            .with_max_records(self.usage.max_records)
            .with_daily_limit_usd(self.usage.daily_limit_usd)
            .with_expensive_call_threshold_usd(self.usage.expensive_call_threshold_usd)
    }

    pub fn store_config(&self) -> StoreConfig {
        let mut cfg = StoreConfig::new().with_op_timeout(Duration::from_millis(self.store.op_timeout_ms));
        if let Some(url) = &self.store.redis_url {
            cfg = cfg.with_redis_url(url.clone());
        }
        if let Some(prefix) = &self.store.key_prefix {
            cfg = cfg.with_key_prefix(prefix.clone());
        }
        cfg.expiry_buffer = Duration::from_millis(self.store.expiry_buffer_ms);
        cfg
    }

    pub fn provider_config(&self) -> Option<ProviderConfig> {
        self.provider.as_ref().map(|p| {
            let mut cfg = ProviderConfig::new(p.base_url.clone(), p.model.clone())
                .with_timeout(Duration::from_secs(p.timeout_secs))
                .with_temperature(p.temperature)
                .with_max_tokens(p.max_tokens);
            if let Some(key) = &p.api_key {
                cfg = cfg.with_api_key(key.clone());
            }
            cfg
        })
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| invalid_with_details(format!("cannot parse '{}'", value), name, e))
}

fn invalid(message: impl Into<String>, field: &str) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new().with_field_path(field).with_source("gateway_config"),
    )
}

fn invalid_with_details(message: impl Into<String>, field: &str, details: impl std::fmt::Display) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details.to_string())
            .with_source("gateway_config"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = GatewayConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.breaker_config().failure_threshold, 5);
        assert_eq!(cfg.rate_limit_policy().window, Duration::from_secs(60));
        assert_eq!(cfg.cache_config().max_size, 1000);
        assert_eq!(cfg.usage_config().daily_limit_usd, 5.0);
        assert_eq!(cfg.store_config().op_timeout, Duration::from_millis(100));
        assert!(cfg.provider_config().is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = GatewayConfig::from_yaml_str("rate_limit:\n  max_requests: 3\n").unwrap();
        assert_eq!(cfg.rate_limit.max_requests, 3);
        assert_eq!(cfg.rate_limit.window_ms, 60_000);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(GatewayConfig::from_yaml_str("").unwrap(), GatewayConfig::default());
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let mut cfg = GatewayConfig::from_yaml_str("usage:\n  daily_limit_usd: 2.5\n").unwrap();
        cfg.apply_overrides_from(lookup(&[
            (ENV_DAILY_LIMIT_USD, "7.5"),
            (ENV_RATE_LIMIT_MAX, "20"),
            (ENV_PROVIDER_BASE_URL, "http://localhost:9000/v1"),
            (ENV_PROVIDER_API_KEY, "sk-test"),
            (ENV_REDIS_URL, "  "),
        ]))
        .unwrap();
        assert_eq!(cfg.usage.daily_limit_usd, 7.5);
        assert_eq!(cfg.rate_limit.max_requests, 20);
        assert_eq!(cfg.store.redis_url, None);
        let provider = cfg.provider_config().unwrap();
        assert_eq!(provider.base_url, "http://localhost:9000/v1");
        assert_eq!(provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(provider.model, "gpt-4o-mini");
    }

    #[test]
    fn test_bad_env_value_names_the_variable() {
        let mut cfg = GatewayConfig::default();
        let err = cfg
            .apply_overrides_from(lookup(&[(ENV_RATE_LIMIT_MAX, "lots")]))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some(ENV_RATE_LIMIT_MAX)
        );
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut cfg = GatewayConfig::default();
        cfg.rate_limit.window_ms = 0;
        assert!(matches!(cfg.validate(), Err(Error::Configuration { .. })));

        let mut cfg = GatewayConfig::default();
        cfg.usage.daily_limit_usd = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = GatewayConfig::default();
        cfg.store.redis_url = Some("not a url".into());
        assert!(cfg.validate().is_err());

        let mut cfg = GatewayConfig::default();
        cfg.provider = Some(ProviderSection {
            base_url: "ftp://example.com".into(),
            ..Default::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut cfg = GatewayConfig::default();
        cfg.provider = Some(ProviderSection {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        });
        let yaml = cfg.to_yaml_string().unwrap();
        assert!(!yaml.contains("sk-secret"));
        assert!(yaml.contains("gpt-4o-mini"));
    }
}
