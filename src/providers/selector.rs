//! Configuration-keyed resolution and caching of provider adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::providers::gemini::GeminiAdapter;
use crate::providers::mock::MockProvider;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::transport::{DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES};
use crate::providers::{ModelDescriptor, ProviderAdapter};
use crate::types::ProviderError;

/// Upstream protocol family a configured model speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Gemini,
    Mock,
}

/// Configuration for one named provider/model pairing.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderSettings {
    pub family: ProviderFamily,
    /// Base URL of the upstream API.
    pub endpoint: String,
    /// Credential given inline; prefer `api_key_env` outside tests.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of the environment variable holding the credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub model: ModelDescriptor,
    /// Extra attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base of the linear backoff in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF.as_millis() as u64
}

impl ProviderSettings {
    /// Resolves the credential, consulting the environment (and any `.env`
    /// file) when only a variable name is configured.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ProviderError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(name) => dotenvy::var(name)
                .map(Some)
                .map_err(|_| ProviderError::Config(format!("credential variable {name} not set"))),
            None => Ok(None),
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Validated endpoint base with any trailing slash removed.
    pub fn endpoint_base(&self) -> Result<String, ProviderError> {
        let url = Url::parse(&self.endpoint).map_err(|err| {
            ProviderError::Config(format!("invalid endpoint '{}': {err}", self.endpoint))
        })?;
        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}

/// Resolves configured adapters by name, constructing each at most once.
pub struct ModelSelector {
    settings: HashMap<String, ProviderSettings>,
    cache: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl ModelSelector {
    pub fn new(settings: HashMap<String, ProviderSettings>) -> Self {
        Self {
            settings,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Names this selector can resolve.
    pub fn configured_models(&self) -> Vec<&str> {
        self.settings.keys().map(String::as_str).collect()
    }

    /// Returns the adapter configured under `name`, building it on first use.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        if let Some(adapter) = self.cache.read().get(name) {
            return Ok(Arc::clone(adapter));
        }

        let settings = self
            .settings
            .get(name)
            .ok_or_else(|| ProviderError::Config(format!("unknown model '{name}'")))?;

        let adapter: Arc<dyn ProviderAdapter> = match settings.family {
            ProviderFamily::OpenAi => Arc::new(OpenAiAdapter::new(settings)?),
            ProviderFamily::Gemini => Arc::new(GeminiAdapter::new(settings)?),
            ProviderFamily::Mock => {
                Arc::new(MockProvider::new(settings.model.embedding_dimension))
            }
        };
        debug!(name, "constructed provider adapter");

        let mut cache = self.cache.write();
        let entry = cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&adapter));
        Ok(Arc::clone(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_settings(dimension: usize) -> ProviderSettings {
        ProviderSettings {
            family: ProviderFamily::Mock,
            endpoint: String::new(),
            api_key: None,
            api_key_env: None,
            model: ModelDescriptor {
                name: "mock-embedder".into(),
                price_per_1k_tokens: 0.0,
                max_input_tokens: 8192,
                max_output_tokens: 1024,
                embedding_dimension: dimension,
            },
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: 1000,
        }
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        let selector = ModelSelector::new(HashMap::new());
        assert!(matches!(
            selector.get("nope"),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn adapters_are_cached_per_name() {
        let selector =
            ModelSelector::new(HashMap::from([("embed".to_string(), mock_settings(16))]));
        let first = selector.get("embed").unwrap();
        let second = selector.get("embed").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn openai_without_credentials_is_rejected() {
        let mut settings = mock_settings(16);
        settings.family = ProviderFamily::OpenAi;
        settings.endpoint = "https://api.openai.example/v1".into();
        let selector = ModelSelector::new(HashMap::from([("chat".to_string(), settings)]));
        assert!(matches!(
            selector.get("chat"),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let mut settings = mock_settings(16);
        settings.family = ProviderFamily::OpenAi;
        settings.api_key = Some("key".into());
        settings.endpoint = "not a url".into();
        let selector = ModelSelector::new(HashMap::from([("chat".to_string(), settings)]));
        assert!(matches!(
            selector.get("chat"),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: ProviderSettings = serde_json::from_value(serde_json::json!({
            "family": "openai",
            "endpoint": "https://api.openai.example/v1",
            "model": {
                "name": "text-embedding-3-small",
                "max_input_tokens": 8192,
                "max_output_tokens": 0,
                "embedding_dimension": 1536
            }
        }))
        .unwrap();
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.retry_backoff_ms, 1000);
    }
}
