//! OpenAI-compatible provider against a mock HTTP server.

use ai_gateway_rust::cache::Fingerprint;
use ai_gateway_rust::gateway::{GatewayBuilder, RequestIdentity};
use ai_gateway_rust::provider::{HttpProvider, ProviderConfig, UpstreamProvider, UpstreamRequest};
use ai_gateway_rust::store::MemoryStore;
use ai_gateway_rust::{Error, GatewayConfig, GatewayRequest};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn completion(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o-mini-2024-07-18",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
    })
    .to_string()
}

fn provider(base_url: &str) -> HttpProvider {
    HttpProvider::new(
        ProviderConfig::new(format!("{}/v1", base_url), "gpt-4o-mini")
            .with_api_key("sk-test")
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_generate_parses_json_content_and_usage() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "response_format": {"type": "json_object"}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(r#"{"greeting": "Morning, Sam!"}"#))
        .create_async()
        .await;

    let resp = provider(&server.url())
        .generate(&UpstreamRequest::new("/api/ai/greeting", "Greet Sam"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(resp.content["greeting"], "Morning, Sam!");
    assert_eq!(resp.model, "gpt-4o-mini-2024-07-18");
    assert_eq!(resp.usage.input_tokens, 120);
    assert_eq!(resp.usage.output_tokens, 30);
}

#[tokio::test]
async fn test_plain_text_content_is_wrapped() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("Deals are trending up."))
        .create_async()
        .await;

    let resp = provider(&server.url())
        .generate(&UpstreamRequest::new("/api/ai/insight", "Summarize"))
        .await
        .unwrap();
    assert_eq!(resp.content["text"], "Deals are trending up.");
}

#[tokio::test]
async fn test_error_status_is_an_upstream_failure() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body(r#"{"error": {"message": "overloaded"}}"#)
        .create_async()
        .await;

    let err = provider(&server.url())
        .generate(&UpstreamRequest::new("/api/ai/greeting", "hi"))
        .await
        .unwrap_err();
    assert!(err.is_upstream_failure());
    assert!(matches!(err, Error::Upstream { status: Some(500), .. }));
    assert_eq!(err.http_status(), 503);
}

#[tokio::test]
async fn test_malformed_body_is_an_upstream_failure() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body("<html>gateway error</html>")
        .create_async()
        .await;

    let err = provider(&server.url())
        .generate(&UpstreamRequest::new("/api/ai/greeting", "hi"))
        .await
        .unwrap_err();
    assert!(err.is_upstream_failure());
    assert_eq!(err.http_status(), 503);
    assert!(matches!(err, Error::Upstream { status: Some(200), .. }));
}

#[tokio::test]
async fn test_gateway_serves_503_fallback_for_garbage_body() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>gateway error</html>")
        .create_async()
        .await;

    let gw = GatewayBuilder::new()
        .with_provider(Arc::new(provider(&server.url())))
        .with_store(Arc::new(MemoryStore::new()))
        .build()
        .await;
    let resp = gw
        .handle(
            GatewayRequest::new(RequestIdentity::user("una"), "/api/ai/greeting", "hi")
                .with_fallback(json!({"greeting": "Hello!"})),
        )
        .await;
    assert_eq!(resp.status, 503);
    assert_eq!(resp.source(), Some("circuit_breaker_fallback"));
    assert_eq!(resp.body["greeting"], "Hello!");
    assert_eq!(gw.circuit_breaker().get_status().failure_count, 1);
}

#[tokio::test]
async fn test_gateway_over_http_caches_second_call() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(r#"{"insight": "Close rate improved 4%."}"#))
        .expect(1)
        .create_async()
        .await;

    let mut cfg = GatewayConfig::default();
    cfg.apply_overrides_from(|name| match name {
        "AI_GATEWAY_PROVIDER_BASE_URL" => Some(format!("{}/v1", server.url())),
        "AI_GATEWAY_PROVIDER_API_KEY" => Some("sk-test".to_string()),
        _ => None,
    })
    .unwrap();
    let gw = GatewayBuilder::from_config(&cfg)
        .unwrap()
        .with_store(Arc::new(MemoryStore::new()))
        .build()
        .await;

    let request = || {
        GatewayRequest::new(RequestIdentity::user("sam"), "/api/ai/insight", "Weekly insight")
            .with_fingerprint(Fingerprint::builder("insight").bucketed("deals", 37, 10).build())
            .with_fallback(json!({"insight": "Keep following up on open deals."}))
    };

    let first = gw.handle(request()).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.source(), Some("gpt-4o-mini-2024-07-18"));
    assert_eq!(first.body["insight"], "Close rate improved 4%.");

    let second = gw.handle(request()).await;
    assert_eq!(second.source(), Some("cache"));
    assert_eq!(second.body["insight"], "Close rate improved 4%.");

    mock.assert_async().await;
    assert!(gw.usage().get_total_cost(Some("sam")) > 0.0);
}
