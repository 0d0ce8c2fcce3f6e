//! 弹性模式模块：提供熔断器和滑动窗口限流器等可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! Admission control and failure isolation for calls to the upstream AI provider.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Process-local breaker with half-open probing |
//! | [`rate_limiter`] | Sliding-window-log limiter over the shared store |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: failure threshold reached, calls fail fast without reaching upstream
//! - **Half-Open**: cooldown elapsed, a bounded number of probes decide recovery
//!
//! ```rust
//! use ai_gateway_rust::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> ai_gateway_rust::Result<()> {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_open_timeout(Duration::from_secs(60)),
//! );
//! let answer = breaker.execute(|| async { Ok(42) }).await?;
//! # Ok(()) }
//! ```
//!
//! ## Rate Limiter
//!
//! ```rust
//! use ai_gateway_rust::resilience::rate_limiter::RateLimiter;
//! use ai_gateway_rust::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
//! let decision = limiter
//!     .check_limit("user:42", 10, Duration::from_secs(60), "greeting")
//!     .await;
//! if !decision.allowed {
//!     // respond 429
//! }
//! # }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use rate_limiter::{RateLimitDecision, RateLimitPolicy, RateLimiter, RateLimiterStats};
