//! Metadata extraction from raw model responses.
//!
//! Models wrap JSON in code fences, prepend prose, or echo unrelated JSON
//! found in the document. Candidates are tried in order and the first one
//! that matches the metadata schema wins:
//!
//! 1. the trimmed response, if it starts with `{` and parses
//! 2. the response with markdown code fences stripped
//! 3. the first balanced `{...}` in the fence-stripped text
//! 4. the first balanced `{...}` in the original text

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use docharvest_shared::{DocHarvestError, Document, Result};

/// The three fields a model must produce for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedMetadata {
    pub summary: String,
    pub tags: Vec<String>,
    pub category: String,
}

impl ExtractedMetadata {
    /// Overwrite the document's summary, tags and category. Nothing else changes.
    pub fn apply_to(self, doc: &mut Document) {
        doc.summary = self.summary;
        doc.tags = self.tags;
        doc.category = self.category;
    }
}

/// Extract metadata from a raw completion.
///
/// A syntactically valid object without the right shape (missing keys, or
/// `tags` not an array) is rejected rather than accepted.
pub fn extract_metadata(raw: &str) -> Result<ExtractedMetadata> {
    let trimmed = raw.trim();
    let stripped = strip_code_fences(trimmed);

    let candidates = [
        trimmed.starts_with('{').then_some(trimmed),
        Some(stripped),
        first_balanced_object(stripped),
        first_balanced_object(raw),
    ];

    for (strategy, candidate) in candidates.into_iter().enumerate() {
        let Some(candidate) = candidate else { continue };
        if let Some(metadata) = validate(candidate) {
            debug!(strategy, "extracted metadata");
            return Ok(metadata);
        }
    }

    Err(DocHarvestError::Extraction(format!(
        "no valid metadata object in response: {}",
        preview(trimmed)
    )))
}

/// Parse a candidate and check it has `summary: string`, `tags: array`,
/// `category: string`. Non-string tag entries are dropped.
fn validate(candidate: &str) -> Option<ExtractedMetadata> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;

    let summary = object.get("summary")?.as_str()?;
    let tags = object.get("tags")?.as_array()?;
    let category = object.get("category")?.as_str()?;

    Some(ExtractedMetadata {
        summary: summary.trim().to_string(),
        tags: tags
            .iter()
            .filter_map(Value::as_str)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        category: category.trim().to_string(),
    })
}

/// Return the body of the first fenced block (```` ```json ````, ```` ```JSON ````,
/// ```` ``` json ````, or a bare fence), or the input unchanged if there is none.
fn strip_code_fences(text: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[ \t]*(?i:json)?[ \t]*\r?\n?(.*?)```").expect("valid regex")
    });

    FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(text)
}

/// Find the object that starts at the first `{` and ends at its matching `}`.
///
/// Braces inside string literals are ignored and backslash escapes are honored.
/// Returns `None` if that object never closes.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
