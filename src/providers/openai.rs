//! Adapter for the OpenAI-shaped protocol family.
//!
//! Covers any endpoint speaking `/chat/completions` + `/embeddings` with
//! bearer-token auth, which includes several compatible vendors.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::providers::transport::{HttpRunner, ParsedResponse, error_envelope};
use crate::providers::{
    ChatMessage, ModelDescriptor, ProviderAdapter, ProviderSettings, UsageStats,
};
use crate::types::ProviderError;

pub struct OpenAiAdapter {
    runner: HttpRunner,
    chat_url: String,
    embeddings_url: String,
    descriptor: ModelDescriptor,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

impl OpenAiAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = settings
            .resolve_api_key()?
            .ok_or_else(|| ProviderError::Config("OpenAI adapter requires an API key".into()))?;

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| ProviderError::Config("API key is not a valid header value".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let base = settings.endpoint_base()?;
        Ok(Self {
            runner: HttpRunner::new(headers, settings.max_retries, settings.backoff())?,
            chat_url: format!("{base}/chat/completions"),
            embeddings_url: format!("{base}/embeddings"),
            descriptor: settings.model.clone(),
        })
    }
}

fn parse_embedding(value: &serde_json::Value) -> Result<ParsedResponse<Vec<f32>>, ProviderError> {
    if let Some(err) = error_envelope(value) {
        return Err(err);
    }
    let embedding = value
        .pointer("/data/0/embedding")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ProviderError::Protocol("embedding response missing /data/0/embedding".into()))?
        .iter()
        .map(|entry| {
            entry
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| ProviderError::Protocol("non-numeric embedding component".into()))
        })
        .collect::<Result<Vec<f32>, _>>()?;

    Ok(ParsedResponse {
        value: embedding,
        tokens_in: value
            .pointer("/usage/prompt_tokens")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        tokens_out: 0,
    })
}

fn parse_answer(value: &serde_json::Value) -> Result<ParsedResponse<String>, ProviderError> {
    if let Some(err) = error_envelope(value) {
        return Err(err);
    }
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            ProviderError::Protocol("completion response missing /choices/0/message/content".into())
        })?
        .to_string();

    Ok(ParsedResponse {
        value: content,
        tokens_in: value
            .pointer("/usage/prompt_tokens")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        tokens_out: value
            .pointer("/usage/completion_tokens")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let payload = serde_json::to_value(EmbeddingRequest {
            model: &self.descriptor.name,
            input: text,
        })?;
        self.runner
            .post_json(&self.embeddings_url, &payload, parse_embedding)
            .await
    }

    async fn answer(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let payload = serde_json::to_value(ChatRequest {
            model: &self.descriptor.name,
            messages,
        })?;
        self.runner
            .post_json(&self.chat_url, &payload, parse_answer)
            .await
    }

    fn model_name(&self) -> &str {
        &self.descriptor.name
    }

    fn price_per_1k_tokens(&self) -> f64 {
        self.descriptor.price_per_1k_tokens
    }

    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn usage(&self) -> UsageStats {
        self.runner.usage()
    }

    fn reset_usage(&self) {
        self.runner.reset_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedding_parse_extracts_vector_and_usage() {
        let value = json!({
            "data": [{"embedding": [0.25, -0.5], "index": 0}],
            "usage": {"prompt_tokens": 7, "total_tokens": 7}
        });
        let parsed = parse_embedding(&value).unwrap();
        assert_eq!(parsed.value, vec![0.25, -0.5]);
        assert_eq!(parsed.tokens_in, 7);
    }

    #[test]
    fn error_envelope_takes_priority() {
        let value = json!({"error": {"message": "rate limited", "code": "rate_limit"}});
        let err = parse_embedding(&value).unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { ref code, .. } if code == "rate_limit"));
    }

    #[test]
    fn missing_choices_is_a_protocol_error() {
        let value = json!({"choices": []});
        assert!(matches!(
            parse_answer(&value),
            Err(ProviderError::Protocol(_))
        ));
    }
}
