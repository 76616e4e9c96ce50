//! Error types for docharvest.
//!
//! Library crates use [`DocHarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum DocHarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid input, bad format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Wire-format parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Completion provider failure (auth, rate limit, API error).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Non-success HTTP status while fetching a page.
    #[error("fetch error: {url}: HTTP {status}")]
    Fetch { url: String, status: u16 },

    /// Network timeout.
    #[error("network timeout: {0}")]
    Timeout(String),

    /// Other network/transport error.
    #[error("network error: {0}")]
    Network(String),

    /// Explicitly marks the inner error as safe to retry.
    #[error("{0}")]
    Retryable(#[source] Box<DocHarvestError>),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The circuit breaker rejected the call without invoking the provider.
    #[error("circuit breaker open for provider {provider}")]
    CircuitOpen { provider: String },

    /// The retry budget ran out; wraps the last failure.
    #[error("max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<DocHarvestError>,
    },

    /// Metadata enhancement failed on every attempt; wraps the last failure.
    #[error("metadata enhancement failed after {attempts} attempts: {source}")]
    Enhancement {
        attempts: u32,
        #[source]
        source: Box<DocHarvestError>,
    },

    /// No structurally valid metadata could be extracted from a model response.
    #[error("extraction error: {0}")]
    Extraction(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocHarvestError>;

impl DocHarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Mark an error as retryable regardless of its own classification.
    pub fn retryable(inner: DocHarvestError) -> Self {
        Self::Retryable(Box::new(inner))
    }

    /// Whether this error, or anything in its cause chain, is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        self.chain().any(|e| matches!(e, Self::Cancelled))
    }

    /// Iterate over this error and every `DocHarvestError` in its source chain.
    pub fn chain(&self) -> impl Iterator<Item = &DocHarvestError> {
        let mut next: Option<&(dyn std::error::Error + 'static)> = Some(self);
        std::iter::from_fn(move || {
            while let Some(err) = next {
                next = err.source();
                if let Some(ours) = err.downcast_ref::<DocHarvestError>() {
                    return Some(ours);
                }
                // Boxed sources surface as `Box<DocHarvestError>`.
                if let Some(boxed) = err.downcast_ref::<Box<DocHarvestError>>() {
                    return Some(boxed.as_ref());
                }
            }
            None
        })
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Broad failure class reported by a completion provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Credentials missing or rejected (401/403).
    Auth,
    /// The vendor throttled the request (429).
    RateLimited,
    /// Any other API or transport failure.
    Api,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "authentication failed"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Api => write!(f, "request failed"),
        }
    }
}

/// Error shape shared by every completion provider adapter.
#[derive(Debug, thiserror::Error)]
#[error("{provider}: {kind}{}: {message}", status_suffix(.status_code))]
pub struct ProviderError {
    /// Adapter name (e.g. `openai`).
    pub provider: String,
    /// Failure class.
    pub kind: ProviderErrorKind,
    /// HTTP status, when the failure came from a response.
    pub status_code: Option<u16>,
    /// Human-readable detail, usually the vendor's error body.
    pub message: String,
    /// Underlying cause, if any.
    #[source]
    pub source: Option<Box<DocHarvestError>>,
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" (HTTP {code})"))
        .unwrap_or_default()
}

impl ProviderError {
    /// Build an error from a non-success HTTP status, classifying it by code.
    pub fn from_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::RateLimited,
            _ => ProviderErrorKind::Api,
        };
        Self {
            provider: provider.into(),
            kind,
            status_code: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Build a status-less error wrapping an underlying cause.
    pub fn caused_by(provider: impl Into<String>, source: DocHarvestError) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Api,
            status_code: None,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocHarvestError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DocHarvestError::validation("schema_version 99 not supported");
        assert!(err.to_string().contains("schema_version 99"));
    }

    #[test]
    fn provider_error_classifies_status() {
        assert_eq!(
            ProviderError::from_status("openai", 401, "bad key").kind,
            ProviderErrorKind::Auth
        );
        assert_eq!(
            ProviderError::from_status("openai", 429, "slow down").kind,
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            ProviderError::from_status("openai", 503, "overloaded").kind,
            ProviderErrorKind::Api
        );
    }

    #[test]
    fn provider_error_display_includes_status() {
        let err = ProviderError::from_status("ollama", 500, "boom");
        assert_eq!(err.to_string(), "ollama: request failed (HTTP 500): boom");

        let err = ProviderError::caused_by("ollama", DocHarvestError::Timeout("30s".into()));
        assert_eq!(
            err.to_string(),
            "ollama: request failed: network timeout: 30s"
        );
    }

    #[test]
    fn cancellation_found_through_chain() {
        let err = DocHarvestError::Enhancement {
            attempts: 1,
            source: Box::new(DocHarvestError::Cancelled),
        };
        assert!(err.is_cancellation());
        assert!(!DocHarvestError::Timeout("x".into()).is_cancellation());
    }

    #[test]
    fn chain_walks_through_provider_error() {
        let err: DocHarvestError =
            ProviderError::caused_by("openai", DocHarvestError::Timeout("t".into())).into();
        let kinds: Vec<_> = err.chain().collect();
        assert!(matches!(kinds[0], DocHarvestError::Provider(_)));
        assert!(kinds.iter().any(|e| matches!(e, DocHarvestError::Timeout(_))));
    }
}
