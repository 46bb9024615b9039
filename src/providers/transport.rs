//! Shared request execution: JSON POST, outcome categorization, linear
//! backoff retries, and usage accounting.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::providers::UsageStats;
use crate::types::ProviderError;

/// Extra attempts after the first failed one.
pub(crate) const DEFAULT_MAX_RETRIES: usize = 3;

/// Base unit of the linear backoff (`retry_number * base` before each retry).
pub(crate) const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// A successfully parsed upstream response plus its usage counters.
#[derive(Debug)]
pub(crate) struct ParsedResponse<T> {
    pub value: T,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Executes JSON requests for one adapter instance.
///
/// Outcomes are categorized per attempt: transport failures, unparseable
/// bodies, and explicit upstream error envelopes are retried up to the
/// budget; anything else is surfaced immediately. Every attempt counts
/// toward `request_count`.
pub(crate) struct HttpRunner {
    client: Client,
    max_retries: usize,
    backoff: Duration,
    usage: Mutex<UsageStats>,
}

impl HttpRunner {
    pub fn new(
        default_headers: HeaderMap,
        max_retries: usize,
        backoff: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .default_headers(default_headers)
            .build()
            .map_err(|err| ProviderError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            max_retries,
            backoff,
            usage: Mutex::new(UsageStats::default()),
        })
    }

    pub fn usage(&self) -> UsageStats {
        self.usage.lock().clone()
    }

    pub fn reset_usage(&self) {
        *self.usage.lock() = UsageStats::default();
    }

    /// POSTs `payload` to `url` and parses the response with `parse`.
    ///
    /// `parse` runs inside the retry loop so that upstream error envelopes
    /// detected during parsing are retried like any other request failure.
    pub async fn post_json<T, F>(
        &self,
        url: &str,
        payload: &serde_json::Value,
        parse: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn(&serde_json::Value) -> Result<ParsedResponse<T>, ProviderError>,
    {
        let started = Instant::now();
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff * attempt as u32;
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "retrying provider request"
                );
                tokio::time::sleep(delay).await;
            }
            self.usage.lock().request_count += 1;

            match self.attempt(url, payload, &parse).await {
                Ok(parsed) => {
                    let mut usage = self.usage.lock();
                    usage.tokens_in += parsed.tokens_in;
                    usage.tokens_out += parsed.tokens_out;
                    usage.elapsed += started.elapsed();
                    debug!(url, attempt, "provider request succeeded");
                    return Ok(parsed.value);
                }
                Err(err) if err.is_retryable() => last_error = Some(err),
                Err(err) => {
                    self.usage.lock().elapsed += started.elapsed();
                    return Err(err);
                }
            }
        }

        self.usage.lock().elapsed += started.elapsed();
        Err(last_error
            .unwrap_or_else(|| ProviderError::Transport("request never attempted".into())))
    }

    async fn attempt<T, F>(
        &self,
        url: &str,
        payload: &serde_json::Value,
        parse: &F,
    ) -> Result<ParsedResponse<T>, ProviderError>
    where
        F: Fn(&serde_json::Value) -> Result<ParsedResponse<T>, ProviderError>,
    {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|err| {
            ProviderError::Protocol(format!("response is not valid JSON ({status}): {err}"))
        })?;

        if !status.is_success() {
            // Prefer the adapter's envelope translation when it recognizes one.
            return Err(match parse(&value) {
                Err(err @ ProviderError::Upstream { .. }) => err,
                _ => ProviderError::Upstream {
                    code: status.as_u16().to_string(),
                    message: truncate_for_log(&body),
                },
            });
        }

        parse(&value)
    }
}

/// Translates a `{"error": {...}}` envelope into an upstream error.
///
/// Both supported families wrap failures this way; only the `code` field's
/// type differs (string for OpenAI-shaped, number for Gemini-shaped).
pub(crate) fn error_envelope(value: &serde_json::Value) -> Option<ProviderError> {
    let envelope = value.get("error")?;
    if envelope.is_null() {
        return None;
    }
    let message = envelope
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unspecified provider error")
        .to_string();
    let code = match envelope.get("code") {
        Some(serde_json::Value::String(code)) => code.clone(),
        Some(serde_json::Value::Number(code)) => code.to_string(),
        _ => "unknown".to_string(),
    };
    Some(ProviderError::Upstream { code, message })
}

fn truncate_for_log(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let mut end = LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
