//! 遥测模块：日志初始化与网关运行状态快照。
//!
//! Telemetry Module.
//!
//! Logging goes through `tracing`. Applications that embed the gateway usually
//! install their own subscriber; [`init_tracing`] is a convenience for
//! binaries and tests. [`GatewayStatus`] aggregates the per-component
//! snapshots for health endpoints and the `probe` command.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`init_tracing`] | fmt subscriber filtered by `RUST_LOG` or a default directive |
//! | [`GatewayStatus`] | Point-in-time view of breaker, limiter, cache, usage and store |

use crate::cache::CacheStats;
use crate::resilience::{CircuitBreakerSnapshot, RateLimiterStats};
use crate::store::StoreMode;
use crate::usage::UsageStats;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` if a
/// global subscriber was already set, which is not an error.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub store_mode: StoreMode,
    pub store: String,
    pub provider: Option<String>,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub rate_limiter: RateLimiterStats,
    pub cache: CacheStats,
    pub usage: UsageStats,
    pub generated_at_ms: u64,
}

impl GatewayStatus {
    /// Healthy when upstream calls are being admitted.
    pub fn is_healthy(&self) -> bool {
        self.circuit_breaker.state != crate::resilience::CircuitState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let _ = init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
