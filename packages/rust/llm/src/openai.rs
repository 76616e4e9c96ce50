//! OpenAI-compatible chat completions adapter.
//!
//! Also serves OpenRouter and other endpoints that speak the same
//! `/chat/completions` wire format; point `base_url` at them.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use docharvest_shared::{DocHarvestError, ProviderError, Result};

use crate::http::{HttpConfig, build_client, post_json};
use crate::provider::Provider;
use crate::types::{CompletionRequest, CompletionResponse, Message, Usage};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const NAME: &str = "openai";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Chat completions over the OpenAI wire format.
#[derive(Debug)]
pub struct OpenAiProvider {
    config: HttpConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create the adapter. An API key is required.
    pub fn new(config: HttpConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(DocHarvestError::config("openai provider requires an API key"));
        }
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: request.temperature.unwrap_or(self.config.temperature),
        };
        let url = format!("{}/chat/completions", self.config.base_url);

        let response: ChatResponse = post_json(
            NAME,
            &self.client,
            cancel,
            &url,
            self.config.api_key.as_deref(),
            &body,
        )
        .await?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ProviderError::caused_by(NAME, DocHarvestError::parse("response has no choices"))
        })?;
        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: response.model,
            finish_reason: choice.finish_reason.unwrap_or_default(),
            usage,
        })
    }

    fn name(&self) -> &str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use docharvest_shared::ProviderErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, timeout: Duration) -> OpenAiProvider {
        OpenAiProvider::new(HttpConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".into()),
            model: "gpt-test".into(),
            timeout,
            max_tokens: 256,
            temperature: 0.2,
        })
        .unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::system("be brief"), Message::user("hello")])
    }

    #[test]
    fn requires_api_key() {
        let result = OpenAiProvider::new(HttpConfig {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            model: "gpt-test".into(),
            timeout: Duration::from_secs(5),
            max_tokens: 256,
            temperature: 0.2,
        });
        assert!(matches!(result, Err(DocHarvestError::Config { .. })));
    }

    #[tokio::test]
    async fn maps_chat_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-test",
                "max_tokens": 64,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-test-0613",
                "choices": [{
                    "message": {"role": "assistant", "content": "hi"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server, Duration::from_secs(5))
            .complete(&CancellationToken::new(), &request().with_max_tokens(64))
            .await
            .unwrap();

        assert_eq!(response.content, "hi");
        assert_eq!(response.model, "gpt-test-0613");
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 13);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server, Duration::from_secs(5))
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap_err();

        match err {
            DocHarvestError::Provider(e) => {
                assert_eq!(e.kind, ProviderErrorKind::Auth);
                assert_eq!(e.status_code, Some(401));
                assert_eq!(e.message, "Incorrect API key provided");
                assert_eq!(e.provider, "openai");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = provider(&server, Duration::from_secs(5))
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DocHarvestError::Provider(ProviderError { kind: ProviderErrorKind::RateLimited, .. })
        ));
        assert!(docharvest_resilience::is_retryable(&err));
    }

    #[tokio::test]
    async fn slow_response_is_a_retryable_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = provider(&server, Duration::from_millis(50))
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap_err();

        assert!(err.chain().any(|e| matches!(e, DocHarvestError::Timeout(_))));
        assert!(docharvest_resilience::is_retryable(&err));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = provider(&server, Duration::from_secs(5))
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no choices"));
        assert!(!docharvest_resilience::is_retryable(&err));
    }

    #[tokio::test]
    async fn cancellation_interrupts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = provider(&server, Duration::from_secs(30))
            .complete(&cancel, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, DocHarvestError::Cancelled));
    }
}
