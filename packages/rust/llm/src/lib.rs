//! Completion providers for docharvest.
//!
//! - [`Provider`]: the capability every backend implements
//! - [`OpenAiProvider`], [`OllamaProvider`]: vendor adapters over HTTP
//! - [`ResilientProvider`]: rate limiting, circuit breaking and retry
//!   around any other provider
//! - [`build_provider`]: config-driven construction

pub mod factory;
pub mod http;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod resilient;
pub mod types;

pub use factory::build_provider;
pub use http::HttpConfig;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::Provider;
pub use resilient::ResilientProvider;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, Usage};
