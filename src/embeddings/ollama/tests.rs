use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, batch_size: u32, dimension: u32) -> OllamaConfig {
    let address = server.address();
    OllamaConfig {
        protocol: "http".to_string(),
        host: address.ip().to_string(),
        port: address.port(),
        model: "test-model".to_string(),
        batch_size,
        embedding_dimension: dimension,
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
    };
    let client = OllamaClient::new(&config).expect("should create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.dimension(), 384);
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn retry_attempts_never_drop_below_one() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("should create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(0);

    assert_eq!(client.retry_attempts, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_batch_splits_by_batch_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["a", "b"] })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["c"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.5, 0.5]] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 2, 2)).expect("should create client");
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let embeddings = tokio::task::spawn_blocking(move || client.embed_batch(&texts))
        .await
        .expect("task should join")
        .expect("should embed");

    assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_dimension_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0]] })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 4, 3)).expect("should create client");
    let error = tokio::task::spawn_blocking(move || client.embed_batch(&["hello".to_string()]))
        .await
        .expect("task should join")
        .expect_err("dimension mismatch should fail");

    assert!(format!("{error:#}").contains("expected 3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 4, 2)).expect("should create client");
    let error = tokio::task::spawn_blocking(move || client.embed_batch(&["hello".to_string()]))
        .await
        .expect("task should join")
        .expect_err("404 should fail");

    assert!(format!("{error:#}").contains("HTTP 404"));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_the_configured_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "models": [{ "name": "other" }] })),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 4, 2)).expect("should create client");
    let error = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join")
        .expect_err("missing model should fail");

    assert!(error.to_string().contains("test-model"));
}
