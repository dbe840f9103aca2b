#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use docintel::config::{ProviderConfig, RetryConfig};
use docintel::model::{
    GeminiGateway, ModelError, ModelGateway, ModelInvocationRequest, OpenAiGateway, RetryPolicy,
    RetryingGateway,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEMINI_PATH: &str = "/models/chat-model:generateContent";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::from(&RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        multiplier: 1.0,
        max_backoff_ms: 1,
    })
}

fn gemini(server: &MockServer) -> RetryingGateway {
    let config = ProviderConfig {
        base_url: server.uri(),
        model: "chat-model".to_string(),
        ..ProviderConfig::default_chat()
    };
    RetryingGateway::new(
        Arc::new(GeminiGateway::with_api_key(&config, "gemini-key")),
        fast_retry(),
    )
}

fn openai(server: &MockServer) -> RetryingGateway {
    let config = ProviderConfig {
        base_url: server.uri(),
        model: "judge-model".to_string(),
        ..ProviderConfig::default_judge()
    };
    RetryingGateway::new(
        Arc::new(OpenAiGateway::with_api_key(&config, "openai-key")),
        fast_retry(),
    )
}

fn gemini_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }],
        "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15 }
    }))
}

#[tokio::test]
async fn gemini_recovers_from_a_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "gemini-key"))
        .respond_with(gemini_reply("30 days"))
        .expect(1)
        .mount(&server)
        .await;

    let result = gemini(&server)
        .invoke(&ModelInvocationRequest::new("What is the refund window?"))
        .await
        .expect("second attempt should succeed");

    assert_eq!(result.text(), "30 days");
    assert_eq!(result.usage.and_then(|usage| usage.total), Some(15));
}

#[tokio::test]
async fn rate_limits_are_retried_until_the_cap() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let error = gemini(&server)
        .invoke(&ModelInvocationRequest::new("What is the refund window?"))
        .await
        .expect_err("every attempt is rate limited");

    assert!(matches!(
        error,
        ModelError::UpstreamUnavailable { attempts: 3, .. }
    ));
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer openai-key"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let error = openai(&server)
        .invoke(&ModelInvocationRequest::new("Is this grounded?"))
        .await
        .expect_err("401 is fatal");

    assert!(matches!(error, ModelError::Fatal { .. }));
    assert!(error.to_string().contains("401"));
}

#[tokio::test]
async fn openai_structured_output_is_parsed() {
    let server = MockServer::start().await;
    let verdict = json!({ "grounded_score": 0.9, "relevance_score": 0.8 });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": verdict.to_string() } }],
            "usage": { "prompt_tokens": 40, "completion_tokens": 9, "total_tokens": 49 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let schema = json!({
        "type": "object",
        "properties": {
            "grounded_score": { "type": "number" },
            "relevance_score": { "type": "number" }
        },
        "required": ["grounded_score", "relevance_score"]
    });
    let result = openai(&server)
        .invoke(&ModelInvocationRequest::new("Grade this").with_output_schema(schema))
        .await
        .expect("should parse");

    assert_eq!(result.structured, Some(verdict));
    assert_eq!(result.usage.and_then(|usage| usage.total), Some(49));
}
