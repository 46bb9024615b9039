//! Wire-level adapter tests against a local mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use ragmill::providers::{GeminiAdapter, OpenAiAdapter, ProviderFamily, ProviderSettings};
use ragmill::{ChatMessage, ModelDescriptor, ProviderAdapter, ProviderError};

fn settings(family: ProviderFamily, endpoint: String, model: &str, dimension: usize) -> ProviderSettings {
    ProviderSettings {
        family,
        endpoint,
        api_key: Some("test-key".into()),
        api_key_env: None,
        model: ModelDescriptor {
            name: model.into(),
            price_per_1k_tokens: 0.0,
            max_input_tokens: 8192,
            max_output_tokens: 1024,
            embedding_dimension: dimension,
        },
        max_retries: 3,
        // Keep retry sleeps negligible in tests.
        retry_backoff_ms: 1,
    }
}

#[tokio::test]
async fn openai_embedding_round_trip() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .header("authorization", "Bearer test-key")
                .json_body_partial(r#"{"model": "text-embedding-3-small", "input": "hello"}"#);
            then.status(200).json_body(json!({
                "data": [{"embedding": [0.6, 0.8], "index": 0}],
                "usage": {"prompt_tokens": 2, "total_tokens": 2}
            }));
        })
        .await;

    let adapter = OpenAiAdapter::new(&settings(
        ProviderFamily::OpenAi,
        server.base_url(),
        "text-embedding-3-small",
        2,
    ))
    .unwrap();

    let vector = adapter.embedding("hello").await.unwrap();
    assert_eq!(vector, vec![0.6, 0.8]);

    let usage = adapter.usage();
    assert_eq!(usage.request_count, 1);
    assert_eq!(usage.tokens_in, 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn openai_answer_reports_output_tokens() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "four"}}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 1}
            }));
        })
        .await;

    let adapter = OpenAiAdapter::new(&settings(
        ProviderFamily::OpenAi,
        server.base_url(),
        "gpt-test",
        2,
    ))
    .unwrap();

    let reply = adapter
        .answer(&[ChatMessage::user("what is 2+2")])
        .await
        .unwrap();
    assert_eq!(reply, "four");

    let usage = adapter.usage();
    assert_eq!(usage.tokens_in, 9);
    assert_eq!(usage.tokens_out, 1);
}

#[tokio::test]
async fn upstream_errors_exhaust_the_retry_budget() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(429).json_body(json!({
                "error": {"message": "rate limited", "code": "rate_limit_exceeded"}
            }));
        })
        .await;

    let adapter = OpenAiAdapter::new(&settings(
        ProviderFamily::OpenAi,
        server.base_url(),
        "text-embedding-3-small",
        2,
    ))
    .unwrap();

    let err = adapter.embedding("hello").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Upstream { ref code, .. } if code == "rate_limit_exceeded"
    ));

    // First attempt plus three retries.
    assert_eq!(mock.hits_async().await, 4);
    assert_eq!(adapter.usage().request_count, 4);
}

#[tokio::test]
async fn transient_failures_recover_within_the_retry_budget() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(500).json_body(json!({
                "error": {"message": "upstream hiccup", "code": "server_error"}
            }));
        })
        .await;

    let mut settings = settings(
        ProviderFamily::OpenAi,
        server.base_url(),
        "text-embedding-3-small",
        2,
    );
    // Leave room to swap the mock out while the runner backs off.
    settings.retry_backoff_ms = 500;
    let adapter = Arc::new(OpenAiAdapter::new(&settings).unwrap());

    let request = tokio::spawn({
        let adapter = Arc::clone(&adapter);
        async move { adapter.embedding("hello").await }
    });

    // After the first attempt fails, replace the failing mock with a
    // healthy one so the retry succeeds.
    while failing.hits_async().await < 1 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    failing.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [{"embedding": [0.0, 1.0], "index": 0}],
                "usage": {"prompt_tokens": 1, "total_tokens": 1}
            }));
        })
        .await;

    let vector = request.await.unwrap().unwrap();
    assert_eq!(vector, vec![0.0, 1.0]);
    // One failed attempt plus the successful retry.
    assert_eq!(adapter.usage().request_count, 2);
}

#[tokio::test]
async fn non_json_bodies_surface_as_protocol_errors() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).body("<html>gateway timeout</html>");
        })
        .await;

    let adapter = OpenAiAdapter::new(&settings(
        ProviderFamily::OpenAi,
        server.base_url(),
        "text-embedding-3-small",
        2,
    ))
    .unwrap();

    let err = adapter.embedding("hello").await.unwrap_err();
    assert!(matches!(err, ProviderError::Protocol(_)));
    assert_eq!(mock.hits_async().await, 4);
}

#[tokio::test]
async fn gemini_embedding_uses_family_wire_shape() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/models/gemini-embed:embedContent")
                .header("x-goog-api-key", "test-key")
                .json_body_partial(r#"{"content": {"parts": [{"text": "hello"}]}}"#);
            then.status(200).json_body(json!({
                "embedding": {"values": [1.0, 0.0, 0.0]}
            }));
        })
        .await;

    let adapter = GeminiAdapter::new(&settings(
        ProviderFamily::Gemini,
        server.base_url(),
        "gemini-embed",
        3,
    ))
    .unwrap();

    let vector = adapter.embedding("hello").await.unwrap();
    assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    mock.assert_async().await;
}

#[tokio::test]
async fn gemini_answer_lifts_system_messages() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/models/gemini-chat:generateContent")
                .json_body_partial(
                    r#"{"systemInstruction": {"parts": [{"text": "be terse"}]}}"#,
                );
            then.status(200).json_body(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}], "role": "model"}}],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 1}
            }));
        })
        .await;

    let adapter = GeminiAdapter::new(&settings(
        ProviderFamily::Gemini,
        server.base_url(),
        "gemini-chat",
        3,
    ))
    .unwrap();

    let reply = adapter
        .answer(&[ChatMessage::system("be terse"), ChatMessage::user("hi")])
        .await
        .unwrap();
    assert_eq!(reply, "ok");
    assert_eq!(adapter.usage().tokens_out, 1);
    mock.assert_async().await;
}
