//! Provider construction from configuration.

use std::sync::Arc;

use tracing::info;

use docharvest_shared::{AiConfig, ProviderKind, Result, validate_api_key};

use crate::http::HttpConfig;
use crate::ollama::{self, OllamaProvider};
use crate::openai::{self, OpenAiProvider};
use crate::provider::Provider;
use crate::resilient::ResilientProvider;

/// Build the configured vendor adapter, wrapped in [`ResilientProvider`].
///
/// Fails with a config error when the selected provider needs an API key
/// and its environment variable is unset.
pub fn build_provider(config: &AiConfig) -> Result<Arc<dyn Provider>> {
    validate_api_key(config)?;

    let inner: Arc<dyn Provider> = match config.provider {
        ProviderKind::Openai => Arc::new(OpenAiProvider::new(HttpConfig::from_ai_config(
            config,
            openai::DEFAULT_BASE_URL,
        ))?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(HttpConfig::from_ai_config(
            config,
            ollama::DEFAULT_BASE_URL,
        ))?),
    };

    info!(
        provider = inner.name(),
        model = %config.model,
        rate_limit = config.rate_limit.enabled,
        circuit_breaker = config.circuit_breaker.enabled,
        max_retries = config.retry.max_retries,
        "completion provider ready"
    );

    Ok(Arc::new(ResilientProvider::new(inner, config)))
}
