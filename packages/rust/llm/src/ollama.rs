//! Ollama local chat adapter (`/api/chat`, non-streaming).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use docharvest_shared::Result;

use crate::http::{HttpConfig, build_client, post_json};
use crate::provider::Provider;
use crate::types::{CompletionRequest, CompletionResponse, Message, Usage};

/// Default API root of a local Ollama daemon.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const NAME: &str = "ollama";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: ResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Chat completions against a local Ollama daemon. No API key needed.
#[derive(Debug)]
pub struct OllamaProvider {
    config: HttpConfig,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: &request.messages,
            stream: false,
            options: Options {
                num_predict: request.max_tokens.unwrap_or(self.config.max_tokens),
                temperature: request.temperature.unwrap_or(self.config.temperature),
            },
        };
        let url = format!("{}/api/chat", self.config.base_url);

        let response: ChatResponse =
            post_json(NAME, &self.client, cancel, &url, None, &body).await?;

        Ok(CompletionResponse {
            content: response.message.content,
            model: response.model,
            finish_reason: response.done_reason.unwrap_or_else(|| "stop".into()),
            usage: Usage {
                prompt_tokens: response.prompt_eval_count,
                completion_tokens: response.eval_count,
                total_tokens: response.prompt_eval_count.saturating_add(response.eval_count),
            },
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

    use docharvest_shared::{DocHarvestError, ProviderErrorKind};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OllamaProvider {
        OllamaProvider::new(HttpConfig {
            base_url: server.uri(),
            api_key: None,
            model: "llama3.2".into(),
            timeout: Duration::from_secs(5),
            max_tokens: 512,
            temperature: 0.1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn maps_chat_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.2",
                "stream": false,
                "options": {"num_predict": 512}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.2",
                "message": {"role": "assistant", "content": "{\"summary\":\"s\"}"},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 40,
                "eval_count": 8
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = CompletionRequest::new(vec![Message::user("describe")]);
        let response = provider(&server)
            .complete(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(response.content, r#"{"summary":"s"}"#);
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.prompt_tokens, 40);
        assert_eq!(response.usage.total_tokens, 48);
    }

    #[tokio::test]
    async fn missing_model_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "model \"llama3.2\" not found, try pulling it first"
            })))
            .mount(&server)
            .await;

        let request = CompletionRequest::new(vec![Message::user("describe")]);
        let err = provider(&server)
            .complete(&CancellationToken::new(), &request)
            .await
            .unwrap_err();

        match err {
            DocHarvestError::Provider(e) => {
                assert_eq!(e.kind, ProviderErrorKind::Api);
                assert_eq!(e.status_code, Some(404));
                assert!(e.message.contains("not found"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_total_saturates_instead_of_overflowing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.2",
                "message": {"role": "assistant", "content": "{}"},
                "done": true,
                "prompt_eval_count": u32::MAX,
                "eval_count": 5
            })))
            .mount(&server)
            .await;

        let request = CompletionRequest::new(vec![Message::user("describe")]);
        let response = provider(&server)
            .complete(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(response.usage.prompt_tokens, u32::MAX);
        assert_eq!(response.usage.completion_tokens, 5);
        assert_eq!(response.usage.total_tokens, u32::MAX);
    }
}
