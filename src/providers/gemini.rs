//! Adapter for the Gemini-shaped protocol family.
//!
//! The canonical chat model is reshaped on the way out: system messages are
//! lifted into the dedicated `systemInstruction` field and the `assistant`
//! role is renamed `model`. Embeddings are wrapped in the family's
//! `content.parts` envelope and unwrapped from `embedding.values`.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::providers::transport::{HttpRunner, ParsedResponse, error_envelope};
use crate::providers::{
    ChatMessage, ChatRole, ModelDescriptor, ProviderAdapter, ProviderSettings, UsageStats,
};
use crate::types::ProviderError;

pub struct GeminiAdapter {
    runner: HttpRunner,
    generate_url: String,
    embed_url: String,
    descriptor: ModelDescriptor,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Serialize)]
struct EmbedRequest {
    content: EmbedContent,
}

#[derive(Serialize)]
struct EmbedContent {
    parts: Vec<Part>,
}

impl GeminiAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = settings
            .resolve_api_key()?
            .ok_or_else(|| ProviderError::Config("Gemini adapter requires an API key".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| ProviderError::Config("API key is not a valid header value".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let base = settings.endpoint_base()?;
        let model = &settings.model.name;
        Ok(Self {
            runner: HttpRunner::new(headers, settings.max_retries, settings.backoff())?,
            generate_url: format!("{base}/models/{model}:generateContent"),
            embed_url: format!("{base}/models/{model}:embedContent"),
            descriptor: settings.model.clone(),
        })
    }

    /// Reshapes canonical messages into `contents` + `systemInstruction`.
    fn reshape(messages: &[ChatMessage]) -> GenerateRequest {
        let mut contents = Vec::new();
        let mut system_text = String::new();

        for message in messages {
            match message.role {
                ChatRole::System => {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(&message.content);
                }
                ChatRole::User => contents.push(Content {
                    role: "user",
                    parts: vec![Part {
                        text: message.content.clone(),
                    }],
                }),
                ChatRole::Assistant => contents.push(Content {
                    role: "model",
                    parts: vec![Part {
                        text: message.content.clone(),
                    }],
                }),
            }
        }

        GenerateRequest {
            contents,
            system_instruction: (!system_text.is_empty()).then(|| SystemInstruction {
                parts: vec![Part { text: system_text }],
            }),
        }
    }
}

fn parse_embedding(value: &serde_json::Value) -> Result<ParsedResponse<Vec<f32>>, ProviderError> {
    if let Some(err) = error_envelope(value) {
        return Err(err);
    }
    let embedding = value
        .pointer("/embedding/values")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ProviderError::Protocol("embedding response missing /embedding/values".into()))?
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
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        tokens_out: 0,
    })
}

fn parse_answer(value: &serde_json::Value) -> Result<ParsedResponse<String>, ProviderError> {
    if let Some(err) = error_envelope(value) {
        return Err(err);
    }
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            ProviderError::Protocol("completion response missing /candidates/0/content/parts".into())
        })?;

    let mut content = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(serde_json::Value::as_str) {
            content.push_str(text);
        }
    }

    Ok(ParsedResponse {
        value: content,
        tokens_in: value
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        tokens_out: value
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
    })
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let payload = serde_json::to_value(EmbedRequest {
            content: EmbedContent {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        })?;
        self.runner
            .post_json(&self.embed_url, &payload, parse_embedding)
            .await
    }

    async fn answer(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let payload = serde_json::to_value(Self::reshape(messages))?;
        self.runner
            .post_json(&self.generate_url, &payload, parse_answer)
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
    fn system_messages_are_lifted_and_assistant_renamed() {
        let messages = vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi"),
            ChatMessage::system("Stay polite."),
        ];
        let request = GeminiAdapter::reshape(&messages);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"].as_array().unwrap().len(), 2);
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "You are terse.\nStay polite."
        );
    }

    #[test]
    fn no_system_instruction_when_absent() {
        let request = GeminiAdapter::reshape(&[ChatMessage::user("hi")]);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn embedding_parse_unwraps_values() {
        let value = json!({"embedding": {"values": [1.0, 0.0, -1.0]}});
        let parsed = parse_embedding(&value).unwrap();
        assert_eq!(parsed.value, vec![1.0, 0.0, -1.0]);
    }

    #[test]
    fn numeric_error_codes_are_stringified() {
        let value = json!({"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}});
        let err = parse_answer(&value).unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { ref code, .. } if code == "429"));
    }

    #[test]
    fn answer_parse_concatenates_parts() {
        let value = json!({
            "candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "world"}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        });
        let parsed = parse_answer(&value).unwrap();
        assert_eq!(parsed.value, "Hello world");
        assert_eq!(parsed.tokens_in, 4);
        assert_eq!(parsed.tokens_out, 2);
    }
}
