use super::{parse_content, UpstreamProvider, UpstreamRequest, UpstreamResponse};
use crate::usage::TokenUsage;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL up to, not including, `/chat/completions` (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible chat completions client.
pub struct HttpProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("http_provider"),
                )
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &UpstreamRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));
        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "response_format": {"type": "json_object"},
        })
    }
}

#[async_trait]
impl UpstreamProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let started = Instant::now();
        debug!(endpoint = %request.endpoint, model = %self.config.model, "calling upstream");

        let mut req = self.client.post(self.completions_url()).json(&self.request_body(request));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::UpstreamTimeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                Error::upstream(None, format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), endpoint = %request.endpoint, "upstream returned error status");
            let mut message: String = body.chars().take(512).collect();
            if message.is_empty() {
                message = status.to_string();
            }
            return Err(Error::upstream(Some(status.as_u16()), message));
        }

        let raw = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::UpstreamTimeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                Error::upstream(Some(status.as_u16()), format!("failed to read body: {}", e))
            }
        })?;
        let parsed: CompletionResponse = serde_json::from_str(&raw).map_err(|e| {
            Error::upstream(Some(status.as_u16()), format!("undecodable completion body: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::upstream(Some(status.as_u16()), "completion has no content"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(UpstreamResponse::new(
            parse_content(&content),
            parsed.model.unwrap_or_else(|| self.config.model.clone()),
            usage,
        ))
    }
}
