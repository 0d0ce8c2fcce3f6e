use crate::usage::{BudgetStatus, TokenUsage};
use crate::Error;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;

/// Where the content of a response came from.
///
/// Serialized as the plain `source` string consumers switch on: the model
/// name for genuine output, otherwise one of the fixed tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    Model(String),
    Cache,
    IntelligentFallback,
    CircuitBreakerFallback,
    BudgetLimitFallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &str {
        match self {
            ResponseSource::Model(m) => m,
            ResponseSource::Cache => "cache",
            ResponseSource::IntelligentFallback => "intelligent_fallback",
            ResponseSource::CircuitBreakerFallback => "circuit_breaker_fallback",
            ResponseSource::BudgetLimitFallback => "budget_limit_fallback",
        }
    }

    /// True for every source except real model output.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, ResponseSource::Model(_))
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResponseSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// HTTP status plus JSON body, ready for whatever server embeds the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Map<String, Value>,
}

impl GatewayResponse {
    fn tagged(status: u16, mut body: Map<String, Value>, source: &ResponseSource) -> Self {
        body.insert("source".into(), Value::String(source.as_str().to_string()));
        Self { status, body }
    }

    pub fn model(content: Map<String, Value>, model: &str, usage: TokenUsage, cost_usd: f64) -> Self {
        let mut resp = Self::tagged(200, content, &ResponseSource::Model(model.to_string()));
        resp.body.insert("model".into(), Value::String(model.to_string()));
        resp.body.insert(
            "usage".into(),
            json!({
                "inputTokens": usage.input_tokens,
                "outputTokens": usage.output_tokens,
                "totalTokens": usage.total(),
                "costUsd": cost_usd,
            }),
        );
        resp
    }

    pub fn cached(content: Map<String, Value>) -> Self {
        Self::tagged(200, content, &ResponseSource::Cache)
    }

    /// Deterministic content served when no model call is made.
    pub fn intelligent_fallback(fallback: Map<String, Value>) -> Self {
        Self::tagged(200, fallback, &ResponseSource::IntelligentFallback)
    }

    pub fn budget_exceeded(fallback: Map<String, Value>, budget: &BudgetStatus) -> Self {
        let err = Error::BudgetExceeded {
            user_id: budget.user_id.clone(),
            spent_usd: budget.spent_usd,
            limit_usd: budget.limit_usd,
        };
        let mut resp = Self::tagged(err.http_status(), fallback, &ResponseSource::BudgetLimitFallback);
        resp.body.insert("error".into(), Value::String(err.to_string()));
        resp.body.insert(
            "budget".into(),
            json!({
                "spentUsd": budget.spent_usd,
                "limitUsd": budget.limit_usd,
                "remainingUsd": budget.remaining_usd,
            }),
        );
        resp
    }

    pub fn rate_limited(fallback: Map<String, Value>, retry_after_secs: u64, remaining: u64) -> Self {
        let err = Error::RateLimited {
            retry_after_secs,
            remaining,
        };
        let mut resp = Self::tagged(err.http_status(), fallback, &ResponseSource::IntelligentFallback);
        resp.body.insert("retryAfter".into(), json!(retry_after_secs));
        resp.body.insert("remaining".into(), json!(remaining));
        resp
    }

    /// Breaker open or upstream failed. Timeouts answer 504, everything else 503.
    pub fn upstream_unavailable(status: u16, fallback: Map<String, Value>, error: &str) -> Self {
        let status = if status == 504 { 504 } else { 503 };
        let mut resp = Self::tagged(status, fallback, &ResponseSource::CircuitBreakerFallback);
        resp.body.insert("error".into(), Value::String(error.to_string()));
        resp
    }

    /// Malformed request. Carries no `source`: nothing was served.
    pub fn validation_error(message: &str) -> Self {
        let mut body = Map::new();
        body.insert("error".into(), Value::String("validation_error".into()));
        body.insert("message".into(), Value::String(message.to_string()));
        Self { status: 400, body }
    }

    pub fn source(&self) -> Option<&str> {
        self.body.get("source").and_then(Value::as_str)
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.body.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("greeting".into(), json!("Hello!"));
        m
    }

    #[test]
    fn test_source_strings() {
        assert_eq!(ResponseSource::Model("gpt-4o-mini".into()).as_str(), "gpt-4o-mini");
        assert_eq!(
            serde_json::to_value(ResponseSource::BudgetLimitFallback).unwrap(),
            json!("budget_limit_fallback")
        );
        assert!(ResponseSource::Cache.is_degraded());
        assert!(!ResponseSource::Model("m".into()).is_degraded());
    }

    #[test]
    fn test_rate_limited_body() {
        let resp = GatewayResponse::rate_limited(fields(), 42, 0);
        assert_eq!(resp.status, 429);
        assert_eq!(resp.source(), Some("intelligent_fallback"));
        assert_eq!(resp.get("retryAfter"), Some(&json!(42)));
        assert_eq!(resp.get("greeting"), Some(&json!("Hello!")));
    }

    #[test]
    fn test_budget_body_names_the_limit() {
        let budget = BudgetStatus {
            user_id: "bob".into(),
            spent_usd: 5.25,
            limit_usd: 5.0,
            remaining_usd: 0.0,
            exceeded: true,
        };
        let resp = GatewayResponse::budget_exceeded(fields(), &budget);
        assert_eq!(resp.status, 402);
        assert_eq!(resp.source(), Some("budget_limit_fallback"));
        assert_eq!(resp.body["budget"]["limitUsd"], 5.0);
        let error = resp.body["error"].as_str().unwrap();
        assert!(error.contains("bob"));
        assert!(error.contains("$5.2500 of $5.00"));
    }

    #[test]
    fn test_upstream_status_is_503_or_504() {
        assert_eq!(GatewayResponse::upstream_unavailable(500, fields(), "bad body").status, 503);
        assert_eq!(GatewayResponse::upstream_unavailable(504, fields(), "slow").status, 504);
    }

    #[test]
    fn test_model_body_has_usage() {
        let resp = GatewayResponse::model(fields(), "gpt-4o-mini", TokenUsage::new(10, 5), 0.001);
        assert_eq!(resp.source(), Some("gpt-4o-mini"));
        assert_eq!(resp.body["usage"]["totalTokens"], 15);
        let s = resp.to_json_string();
        assert!(s.contains("\"model\":\"gpt-4o-mini\""));
    }

    #[test]
    fn test_validation_error_has_no_source() {
        let resp = GatewayResponse::validation_error("prompt must not be empty");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.source(), None);
        assert_eq!(resp.body["error"], "validation_error");
    }
}
