//! Core domain types for docharvest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A harvested documentation page, converted to Markdown.
///
/// `summary`, `tags` and `category` are empty until metadata enhancement
/// fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Original page URL.
    pub url: String,
    /// Page title (extracted or derived from the path).
    pub title: String,
    /// Markdown body.
    pub content: String,
    /// SHA-256 hash of the Markdown content.
    pub content_hash: String,
    /// When the page was fetched or loaded.
    pub fetched_at: DateTime<Utc>,
    /// AI-generated summary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    /// AI-generated tags, in model order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// AI-generated category.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
}

impl Document {
    /// Create an unenhanced document, hashing its content.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            url: url.into(),
            title: title.into(),
            content_hash: content_hash(&content),
            content,
            fetched_at: Utc::now(),
            summary: String::new(),
            tags: Vec::new(),
            category: String::new(),
        }
    }

    /// Whether any AI-generated field has been set.
    pub fn is_enhanced(&self) -> bool {
        !self.summary.is_empty() || !self.tags.is_empty() || !self.category.is_empty()
    }
}

/// Hex-encoded SHA-256 of a Markdown body.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
