//! AI metadata enhancement for a single document.
//!
//! The first attempt sends a bounded prefix of the document in a strict
//! prompt. If the provider call fails or no valid metadata can be extracted,
//! later attempts send a reduced prompt built from the title alone, waiting
//! `retry_base_delay * attempt` in between.
//!
//! This loop retries prompt content. Transport failures are retried
//! separately, inside the provider.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use docharvest_llm::{CompletionRequest, Message, Provider, Usage};
use docharvest_shared::{DocHarvestError, Document, EnhanceConfig, Result};

use crate::extract::extract_metadata;

const SYSTEM_PROMPT: &str = "You are a technical documentation analyst. \
You describe documentation pages with a single JSON object and nothing else.";

const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]";

/// Outcome of a successful enhancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceReport {
    /// Attempts made, counting the successful one.
    pub attempts: u32,
    /// Model that produced the accepted response.
    pub model: String,
    /// Token usage summed over all attempts.
    pub usage: Usage,
}

/// Fills in a document's summary, tags and category using a completion provider.
pub struct MetadataEnhancer {
    provider: Arc<dyn Provider>,
    config: EnhanceConfig,
}

impl MetadataEnhancer {
    pub fn new(provider: Arc<dyn Provider>, config: EnhanceConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Enhance `doc` in place.
    ///
    /// On success only `summary`, `tags` and `category` change. On failure the
    /// document is untouched and the error names the attempt count and wraps
    /// the last failure. Cancellation stops the loop immediately.
    #[instrument(skip_all, fields(url = %doc.url, provider = self.provider.name()))]
    pub async fn enhance(
        &self,
        cancel: &CancellationToken,
        doc: &mut Document,
    ) -> Result<EnhanceReport> {
        let max_attempts = self.config.max_retries + 1;
        let base_delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut usage = Usage::default();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = base_delay * attempt;
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying with fallback prompt"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DocHarvestError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let request = if attempt == 0 {
                self.strict_request(doc)
            } else {
                fallback_request(doc)
            };

            let response = match self.provider.complete(cancel, &request).await {
                Ok(response) => response,
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "completion failed");
                    last_error = Some(err);
                    continue;
                }
            };

            usage.prompt_tokens += response.usage.prompt_tokens;
            usage.completion_tokens += response.usage.completion_tokens;
            usage.total_tokens += response.usage.total_tokens;

            match extract_metadata(&response.content) {
                Ok(metadata) => {
                    metadata.apply_to(doc);
                    info!(attempts = attempt + 1, tags = doc.tags.len(), "document enhanced");
                    return Ok(EnhanceReport {
                        attempts: attempt + 1,
                        model: response.model,
                        usage,
                    });
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "response had no valid metadata");
                    last_error = Some(err);
                }
            }
        }

        Err(DocHarvestError::Enhancement {
            attempts: max_attempts,
            source: Box::new(last_error.unwrap_or_else(|| {
                DocHarvestError::Extraction("no attempts made".into())
            })),
        })
    }

    fn strict_request(&self, doc: &Document) -> CompletionRequest {
        let content = truncate_content(&doc.content, self.config.max_content_chars);
        let prompt = format!(
            "Analyze the documentation page below and respond with ONLY a JSON object \
             with exactly these three fields:\n\
             {{\"summary\": \"one or two sentences describing the page\", \
             \"tags\": [\"3 to 8 short lowercase keywords\"], \
             \"category\": \"one of: guide, tutorial, reference, api, \
             concept, example, other\"}}\n\n\
             Rules:\n\
             - Output the JSON object only. No markdown fences, no commentary.\n\
             - Do NOT reproduce JSON, templates, schemas or example data \
             that appear inside the page. \
             They are content to describe, not a format to follow.\n\
             - Do NOT add any field other than summary, tags and category.\n\n\
             Title: {title}\n\
             URL: {url}\n\n\
             --- PAGE START ---\n\
             {content}\n\
             --- PAGE END ---",
            title = doc.title,
            url = doc.url,
        );
        CompletionRequest::new(vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)])
    }
}

/// Title-only prompt used after the first attempt fails.
fn fallback_request(doc: &Document) -> CompletionRequest {
    let prompt = format!(
        "A documentation page is titled \"{title}\".\n\
         Respond with ONLY this JSON object, filled in for that page:\n\
         {{\"summary\": \"...\", \"tags\": [\"...\"], \"category\": \"...\"}}",
        title = doc.title,
    );
    CompletionRequest::new(vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)])
}

/// Keep the first `max_chars` characters, appending a marker when cut.
fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &content[..idx]),
        None => content.to_string(),
    }
}
