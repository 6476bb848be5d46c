#![allow(clippy::unwrap_used, clippy::expect_used)]

use folio_agent::{
    build_generator, Generator, GeneratorConfig, GeneratorKind, MessagesBackend, PromptContext,
};
use folio_core::{FolioError, TaskId};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> GeneratorConfig {
    GeneratorConfig {
        kind: GeneratorKind::Messages,
        endpoint: Some(server.uri()),
        model_id: "test-model".into(),
        api_key: "test-key".into(),
        max_tokens: 512,
        temperature: 0.2,
        timeout_secs: 5,
    }
}

fn context() -> PromptContext {
    PromptContext {
        project_id: Uuid::new_v4(),
        task_id: TaskId::from("concept"),
        task_name: "Concept".into(),
        purpose: "Find the hook".into(),
        layer: 1,
        attempt: 1,
        max_attempts: 3,
        constraints: json!({"genre": "mystery"}),
        dependency_outputs: BTreeMap::new(),
        inputs: BTreeMap::new(),
        expected_outputs: vec!["hook".into()],
        previous_failure: None,
        repair: None,
    }
}

// ---------------------------------------------------------------------------
// 1. Successful response is parsed into structured output
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_response_yields_output() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "```json\n{\"hook\": \"a lighthouse that lies\"}\n```"}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = MessagesBackend::new(config_for(&server)).unwrap();
    let out = backend.generate(&context()).await.unwrap();
    assert_eq!(out, json!({"hook": "a lighthouse that lies"}));
}

// ---------------------------------------------------------------------------
// 2. A well-formed but off-schema payload is still returned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn off_schema_payload_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "{\"unexpected\": true}"}],
            "stop_reason": "end_turn"
        })))
        .mount(&server)
        .await;

    let backend = MessagesBackend::new(config_for(&server)).unwrap();
    let out = backend.generate(&context()).await.unwrap();
    assert_eq!(out["unexpected"], true);
}

// ---------------------------------------------------------------------------
// 3. Server errors and truncation are transient
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let backend = MessagesBackend::new(config_for(&server)).unwrap();
    let err = backend.generate(&context()).await.unwrap_err();
    assert!(matches!(err, FolioError::TransientGeneration(_)));
    assert!(err.to_string().contains("529"));
}

#[tokio::test]
async fn truncated_response_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "{\"hook\": \"a light"}],
            "stop_reason": "max_tokens"
        })))
        .mount(&server)
        .await;

    let backend = MessagesBackend::new(config_for(&server)).unwrap();
    let err = backend.generate(&context()).await.unwrap_err();
    assert_eq!(err.code(), "TRANSIENT_GENERATION_ERROR");
}

#[tokio::test]
async fn unreachable_endpoint_is_transient() {
    let server = MockServer::start().await;
    let mut config = config_for(&server);
    config.endpoint = Some("http://127.0.0.1:1".into());
    config.timeout_secs = 1;
    let backend = MessagesBackend::new(config).unwrap();
    let err = backend.generate(&context()).await.unwrap_err();
    assert!(matches!(err, FolioError::TransientGeneration(_)));
}

// ---------------------------------------------------------------------------
// 4. Config parsing and factory
// ---------------------------------------------------------------------------

#[test]
fn config_defaults_from_toml() {
    let config: GeneratorConfig = toml::from_str("kind = \"placeholder\"").unwrap();
    assert_eq!(config.kind, GeneratorKind::Placeholder);
    assert_eq!(config.max_tokens, 8000);
    assert_eq!(config.timeout_secs, 300);
    assert_eq!(config.base_url(), "https://api.anthropic.com");
}

#[tokio::test]
async fn factory_builds_placeholder() {
    let generator = build_generator(&GeneratorConfig::placeholder()).unwrap();
    assert_eq!(generator.name(), "placeholder");
    let out = generator.generate(&context()).await.unwrap();
    assert_eq!(out, json!({"hook": "[Generated hook]"}));
}
