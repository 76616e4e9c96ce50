//! Application configuration for docharvest.
//!
//! User config lives at `~/.docharvest/docharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocHarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docharvest";

// ---------------------------------------------------------------------------
// Config structs (matching docharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Completion provider and resilience settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// Metadata enhancement settings.
    #[serde(default)]
    pub enhance: EnhanceConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Number of documents enriched concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}

/// Which completion API adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (OpenAI, OpenRouter, ...).
    #[default]
    Openai,
    /// Local Ollama chat API.
    Ollama,
}

impl ProviderKind {
    /// Stable lowercase name, also used as the provider's `name()`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = DocHarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "ollama" => Ok(Self::Ollama),
            other => Err(DocHarvestError::config(format!(
                "unknown provider '{other}': expected 'openai' or 'ollama'"
            ))),
        }
    }
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Adapter to use.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model identifier passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,

    /// Override for the provider's API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Default completion token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Default sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// `[ai.rate_limit]`
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// `[ai.retry]`
    #[serde(default)]
    pub retry: RetrySettings,

    /// `[ai.circuit_breaker]`
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.2
}

/// `[ai.rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Disable to admit every request immediately.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sustained request rate.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Maximum burst above the sustained rate.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_burst_size() -> u32 {
    5
}

/// `[ai.retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Additional attempts after the first call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Growth factor between attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random widening of each delay, as a fraction of it.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_interval_ms() -> u64 {
    1_000
}
fn default_max_interval_ms() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.1
}

/// `[ai.circuit_breaker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Disable to never reject calls.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successes in half-open needed to close it again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold_half_open: u32,

    /// Cool-down before an open circuit admits a probe.
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold_half_open: default_success_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    1
}
fn default_reset_timeout_secs() -> u64 {
    30
}

/// `[enhance]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceConfig {
    /// Document prefix sent to the model on the first attempt.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Fallback-prompt attempts after the first one.
    #[serde(default = "default_enhance_retries")]
    pub max_retries: u32,

    /// Base of the linear delay between attempts.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
            max_retries: default_enhance_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_max_content_chars() -> usize {
    8_000
}
fn default_enhance_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocHarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docharvest/docharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocHarvestError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocHarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocHarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocHarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocHarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the provider's API key env var is set and non-empty.
///
/// Ollama runs locally without a key, so it always passes.
pub fn validate_api_key(config: &AiConfig) -> Result<()> {
    if config.provider == ProviderKind::Ollama {
        return Ok(());
    }
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(DocHarvestError::config(format!(
            "{} API key not found. Set the {var_name} environment variable.",
            config.provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("requests_per_minute"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency, 4);
        assert_eq!(parsed.ai.retry.max_retries, 3);
        assert_eq!(parsed.ai.circuit_breaker.reset_timeout_secs, 30);
        assert_eq!(parsed.enhance.max_content_chars, 8_000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[ai]
provider = "ollama"
model = "llama3.2"

[ai.circuit_breaker]
enabled = false
failure_threshold = 2
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.ai.provider, ProviderKind::Ollama);
        assert_eq!(config.ai.model, "llama3.2");
        assert!(!config.ai.circuit_breaker.enabled);
        assert_eq!(config.ai.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.ai.circuit_breaker.success_threshold_half_open, 1);
        assert!(config.ai.rate_limit.enabled);
        assert_eq!(config.enhance.max_retries, 2);
    }

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::Openai);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("gemini".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AiConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.api_key_env = "DH_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        config.provider = ProviderKind::Ollama;
        assert!(validate_api_key(&config).is_ok());
    }
}
