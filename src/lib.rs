//! # ai-gateway-rust
//!
//! 面向生成式 AI 上游的弹性请求网关：限流、预算、缓存与熔断的统一编排。
//!
//! Resilient request gateway for calls to a third-party generative-AI
//! provider. It sits between application handlers and the provider and gives
//! admission control, fault isolation, response caching and per-user cost
//! governance under concurrent, multi-instance load.
//!
//! ## Request Pipeline
//!
//! ```text
//! Gateway::handle
//!   -> RateLimiter      (429 + retryAfter)
//!   -> UsageTracker     (402 budget_limit_fallback)
//!   -> ResponseCache    (200 cache)
//!   -> CircuitBreaker -> UpstreamProvider
//!        ok   -> cache write + usage record, 200 <model>
//!        fail -> usage record, 503 circuit_breaker_fallback
//! ```
//!
//! Every response keeps the caller's domain fields and carries a `source`
//! tag, so degraded output never changes the response shape.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_gateway_rust::{Gateway, GatewayConfig, GatewayRequest, RequestIdentity};
//! use ai_gateway_rust::gateway::GatewayBuilder;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ai_gateway_rust::Result<()> {
//!     let config = GatewayConfig::load(None)?;
//!     let gateway = GatewayBuilder::from_config(&config)?.build().await;
//!     gateway.start_maintenance();
//!
//!     let request = GatewayRequest::new(
//!         RequestIdentity::user("user-42"),
//!         "/api/ai/greeting",
//!         "Write a one-line greeting for a sales rep with 4 open deals.",
//!     )
//!     .with_fallback(json!({"greeting": "Welcome back! You have 4 open deals."}));
//!
//!     let response = gateway.handle(request).await;
//!     println!("{} {}", response.status, response.to_json_string());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`gateway`] | Orchestrator, request/response types, caller identity |
//! | [`resilience`] | Circuit breaker and sliding-window rate limiter |
//! | [`cache`] | Two-tier TTL + LRU response cache and fingerprints |
//! | [`usage`] | Usage ledger, pricing and budget checks |
//! | [`store`] | Shared (Redis) or in-process backing store |
//! | [`provider`] | Upstream provider trait and OpenAI-compatible client |
//! | [`config`] | YAML + environment configuration |
//! | [`telemetry`] | Logging setup and status snapshots |

pub mod cache;
pub mod config;
pub mod gateway;
pub mod provider;
pub mod resilience;
pub mod store;
pub mod telemetry;
pub mod usage;
pub mod utils;

pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayRequest, GatewayResponse, RequestIdentity, ResponseSource};
pub use telemetry::GatewayStatus;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
