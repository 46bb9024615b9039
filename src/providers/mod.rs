//! Provider adapters: one canonical chat/embedding contract, one concrete
//! adapter per upstream protocol family.
//!
//! ```text
//! canonical request ──► ProviderAdapter ──► upstream wire shape
//!                            │
//!                            ├─ HttpRunner (retry, usage accounting)
//!                            └─ UsageStats (per-instance, resettable)
//! ```
//!
//! Adapters are composed around a shared [`transport::HttpRunner`] rather
//! than layered over a common base: the wire shapes differ enough that each
//! family owns its own request/response translation.

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod selector;
pub(crate) mod transport;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ProviderError;

pub use gemini::GeminiAdapter;
pub use mock::MockProvider;
pub use openai::OpenAiAdapter;
pub use selector::{ModelSelector, ProviderFamily, ProviderSettings};

/// Role of a message in the canonical chat model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the canonical chat model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Static description of a provider/model pairing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model name as the upstream knows it.
    pub name: String,
    /// Price per 1k tokens, in the operator's billing currency.
    #[serde(default)]
    pub price_per_1k_tokens: f64,
    /// Upstream input token ceiling.
    pub max_input_tokens: usize,
    /// Upstream output token ceiling.
    pub max_output_tokens: usize,
    /// Dimension of the embedding vectors this model produces.
    pub embedding_dimension: usize,
}

/// Usage counters accumulated across an adapter instance's calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageStats {
    /// Input tokens reported by the upstream.
    pub tokens_in: u64,
    /// Output tokens reported by the upstream.
    pub tokens_out: u64,
    /// Wall-clock time spent in requests, including retries and backoff.
    pub elapsed: Duration,
    /// Attempts made, retries included.
    pub request_count: u64,
}

/// Contract every upstream adapter implements.
///
/// Implementations own their usage counters; callers read and reset them
/// through the trait, never through process-wide state.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Embeds `text`, returning the raw (not yet normalized) vector.
    async fn embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Runs a chat completion over the canonical message sequence.
    async fn answer(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;

    /// Model name as configured.
    fn model_name(&self) -> &str;

    /// Price per 1k tokens from the model descriptor.
    fn price_per_1k_tokens(&self) -> f64;

    /// The full static descriptor.
    fn descriptor(&self) -> &ModelDescriptor;

    /// Snapshot of the accumulated usage counters.
    fn usage(&self) -> UsageStats;

    /// Resets the usage counters to zero.
    fn reset_usage(&self);
}
