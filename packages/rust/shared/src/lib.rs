//! Shared types, error model, and configuration for docharvest.
//!
//! This crate is the foundation depended on by all other docharvest crates.
//! It provides:
//! - [`DocHarvestError`]: the unified error type
//! - Domain types ([`Document`])
//! - Configuration ([`AppConfig`], [`AiConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, CircuitBreakerSettings, DefaultsConfig, EnhanceConfig, ProviderKind,
    RateLimitSettings, RetrySettings, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{DocHarvestError, ProviderError, ProviderErrorKind, Result};
pub use types::{Document, content_hash};
