//! 上游模型提供方抽象：网关只通过 [`UpstreamProvider`] 调用生成式 AI。
//!
//! # Upstream Provider Module
//!
//! The gateway never talks to a model vendor directly. It calls an
//! [`UpstreamProvider`], which turns an [`UpstreamRequest`] into an
//! [`UpstreamResponse`] whose content is a JSON object of domain fields
//! (`greeting`, `insight`, ...). Errors must be classified with
//! [`Error::Upstream`](crate::Error::Upstream) or
//! [`Error::UpstreamTimeout`](crate::Error::UpstreamTimeout) so the circuit
//! breaker counts them.
//!
//! [`HttpProvider`] speaks the OpenAI-compatible chat completions API.
//! Tests and embedders can supply any other implementation.

mod http;

pub use http::{HttpProvider, ProviderConfig};

use crate::usage::TokenUsage;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRequest {
    /// Logical endpoint, e.g. `/api/ai/greeting`.
    pub endpoint: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

impl UpstreamRequest {
    pub fn new(endpoint: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    /// Domain fields produced by the model.
    pub content: Map<String, Value>,
    /// Model name as reported by the provider.
    pub model: String,
    pub usage: TokenUsage,
    /// Cost reported by the provider, if any. Otherwise it is estimated from pricing.
    pub cost_usd: Option<f64>,
}

impl UpstreamResponse {
    pub fn new(content: Map<String, Value>, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content,
            model: model.into(),
            usage,
            cost_usd: None,
        }
    }

    pub fn with_cost_usd(mut self, cost: f64) -> Self {
        self.cost_usd = Some(cost);
        self
    }
}

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Stable name used in logs and status output.
    fn name(&self) -> &str;

    async fn generate(&self, request: &UpstreamRequest) -> Result<UpstreamResponse>;
}

/// Interpret model output as domain fields.
///
/// A JSON object is taken as is; anything else is wrapped as `{"text": ...}`.
pub fn parse_content(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("text".to_string(), Value::String(raw.to_string()));
            map
        }
    }
}
