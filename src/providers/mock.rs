//! Deterministic in-process provider for tests and offline runs.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::providers::{ChatMessage, ChatRole, ModelDescriptor, ProviderAdapter, UsageStats};
use crate::types::ProviderError;

/// Hash-seeded embeddings and echo completions, no network involved.
///
/// The same text always maps to the same unit vector, so similarity-based
/// assertions stay deterministic across runs.
pub struct MockProvider {
    descriptor: ModelDescriptor,
    usage: Mutex<UsageStats>,
    fail_on: Option<String>,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            descriptor: ModelDescriptor {
                name: "mock-embedder".into(),
                price_per_1k_tokens: 0.0,
                max_input_tokens: 8192,
                max_output_tokens: 1024,
                embedding_dimension: dimension,
            },
            usage: Mutex::new(UsageStats::default()),
            fail_on: None,
        }
    }

    /// Makes `embedding` fail for any text containing `needle`, to exercise
    /// per-chunk failure tolerance in pipelines.
    #[must_use]
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        let mut vector: Vec<f32> = (0..self.descriptor.embedding_dimension)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for component in &mut vector {
                *component /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    async fn embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut usage = self.usage.lock();
        usage.request_count += 1;
        usage.tokens_in += (text.len() / 4) as u64;
        usage.elapsed += Duration::from_micros(1);
        drop(usage);

        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(ProviderError::Transport(format!(
                    "mock failure on '{needle}'"
                )));
            }
        }
        Ok(self.vector_for(text))
    }

    async fn answer(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let mut usage = self.usage.lock();
        usage.request_count += 1;
        usage.tokens_in += messages
            .iter()
            .map(|message| (message.content.len() / 4) as u64)
            .sum::<u64>();
        drop(usage);

        let last_user = messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        Ok(format!("echo: {last_user}"))
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
        self.usage.lock().clone()
    }

    fn reset_usage(&self) {
        *self.usage.lock() = UsageStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic_and_unit_length() {
        let provider = MockProvider::new(32);
        let first = provider.embedding("hello world").await.unwrap();
        let second = provider.embedding("hello world").await.unwrap();
        let other = provider.embedding("goodbye world").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn failure_needle_trips_only_matching_texts() {
        let provider = MockProvider::new(8).failing_on("poison");
        assert!(provider.embedding("fine text").await.is_ok());
        assert!(provider.embedding("poison pill").await.is_err());
    }

    #[tokio::test]
    async fn usage_accumulates_and_resets() {
        let provider = MockProvider::new(8);
        provider.embedding("some text here").await.unwrap();
        provider
            .answer(&[ChatMessage::user("question")])
            .await
            .unwrap();

        let usage = provider.usage();
        assert_eq!(usage.request_count, 2);
        assert!(usage.tokens_in > 0);

        provider.reset_usage();
        assert_eq!(provider.usage(), UsageStats::default());
    }

    #[tokio::test]
    async fn answer_echoes_last_user_message() {
        let provider = MockProvider::new(8);
        let reply = provider
            .answer(&[
                ChatMessage::system("be brief"),
                ChatMessage::user("first"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("second"),
            ])
            .await
            .unwrap();
        assert_eq!(reply, "echo: second");
    }
}
