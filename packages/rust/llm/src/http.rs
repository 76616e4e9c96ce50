//! HTTP plumbing shared by the vendor adapters.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use docharvest_shared::{AiConfig, DocHarvestError, ProviderError, Result};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("docharvest/", env!("CARGO_PKG_VERSION"));

/// Longest vendor error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Connection settings for an HTTP-backed provider.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// API root, without a trailing slash (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    /// Bearer token, if the API needs one.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Used when the request does not override it.
    pub max_tokens: u32,
    /// Used when the request does not override it.
    pub temperature: f32,
}

impl HttpConfig {
    /// Resolve settings from `[ai]`, reading the API key from its env var.
    pub fn from_ai_config(config: &AiConfig, default_base_url: &str) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Build the reqwest client used by an adapter.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| DocHarvestError::Network(format!("failed to build HTTP client: {e}")))
}

/// POST a JSON body and decode a JSON response, racing the cancellation token.
///
/// Non-2xx statuses become [`ProviderError`]s classified by status code; a
/// reqwest timeout becomes a provider error caused by
/// [`DocHarvestError::Timeout`].
pub(crate) async fn post_json<B, R>(
    provider: &str,
    client: &Client,
    cancel: &CancellationToken,
    url: &str,
    api_key: Option<&str>,
    body: &B,
) -> Result<R>
where
    B: Serialize + Sync,
    R: DeserializeOwned + Send,
{
    let mut request = client.post(url).json(body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let exchange = async {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(provider, %status, "provider returned error status");
            return Err(
                ProviderError::from_status(provider, status.as_u16(), error_message(&text)).into(),
            );
        }

        response.json::<R>().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(provider, e)
            } else {
                ProviderError::caused_by(
                    provider,
                    DocHarvestError::parse(format!("invalid response body: {e}")),
                )
                .into()
            }
        })
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DocHarvestError::Cancelled),
        result = exchange => result,
    }
}

fn transport_error(provider: &str, err: reqwest::Error) -> DocHarvestError {
    let cause = if err.is_timeout() {
        DocHarvestError::Timeout(err.to_string())
    } else {
        DocHarvestError::Network(err.to_string())
    };
    ProviderError::caused_by(provider, cause).into()
}

/// Pull a readable message out of a vendor error body.
///
/// Handles `{"error": {"message": ...}}` (OpenAI-style) and
/// `{"error": "..."}` (Ollama-style); anything else is returned truncated.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = &value["error"];
        if let Some(message) = error["message"].as_str().or_else(|| error.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
