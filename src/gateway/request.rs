use super::identity::{RequestIdentity, MAX_IDENTITY_LEN};
use crate::cache::Fingerprint;
use crate::provider::UpstreamRequest;
use crate::{Error, ErrorContext, Result};
use serde_json::{Map, Value};
use std::time::Duration;

/// One inbound AI request as the gateway sees it.
///
/// `fallback` is the deterministic, non-AI payload (a JSON object of the same
/// domain fields the model would produce) returned whenever the real call is
/// skipped or fails. Only requests given a [`Fingerprint`] are cached.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub identity: RequestIdentity,
    pub endpoint: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub fingerprint: Option<Fingerprint>,
    pub cache_ttl: Option<Duration>,
    pub fallback: Value,
}

impl GatewayRequest {
    pub fn new(identity: RequestIdentity, endpoint: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            identity,
            endpoint: endpoint.into(),
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: None,
            fingerprint: None,
            cache_ttl: None,
            fallback: Value::Object(Map::new()),
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

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(invalid("endpoint must not be empty", "request.endpoint"));
        }
        if self.prompt.trim().is_empty() {
            return Err(invalid("prompt must not be empty", "request.prompt"));
        }
        match &self.fallback {
            Value::Object(map) if !map.is_empty() => {}
            Value::Object(_) => {
                return Err(invalid(
                    "fallback must contain at least one domain field",
                    "request.fallback",
                ))
            }
            _ => return Err(invalid("fallback must be a JSON object", "request.fallback")),
        }
        if self.identity.id().chars().count() > MAX_IDENTITY_LEN {
            return Err(invalid(
                format!("identity longer than {} characters", MAX_IDENTITY_LEN),
                "request.identity",
            ));
        }
        if self.cache_ttl == Some(Duration::ZERO) {
            return Err(invalid("cache ttl must be positive", "request.cache_ttl"));
        }
        Ok(())
    }

    /// Fallback fields as a map; empty when the fallback is not an object.
    pub fn fallback_fields(&self) -> Map<String, Value> {
        match &self.fallback {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }

    pub(crate) fn to_upstream(&self) -> UpstreamRequest {
        UpstreamRequest {
            endpoint: self.endpoint.clone(),
            prompt: self.prompt.clone(),
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
        }
    }
}

fn invalid(message: impl Into<String>, field: &str) -> Error {
    Error::validation_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("request_validator"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> GatewayRequest {
        GatewayRequest::new(RequestIdentity::user("u1"), "/api/ai/greeting", "Say hi")
            .with_fallback(json!({"greeting": "Hello!"}))
    }

    #[test]
    fn test_valid_request() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_prompt_and_endpoint() {
        let mut req = valid();
        req.prompt = "  ".into();
        let err = req.validate().unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("request.prompt")
        );

        let mut req = valid();
        req.endpoint = String::new();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_fallback() {
        assert!(valid().with_fallback(json!("text")).validate().is_err());
        assert!(valid().with_fallback(json!({})).validate().is_err());
    }

    #[test]
    fn test_rejects_long_identity() {
        let mut req = valid();
        req.identity = RequestIdentity::user("x".repeat(MAX_IDENTITY_LEN + 1));
        assert!(matches!(req.validate(), Err(Error::Validation { .. })));
    }
}
