//! Bounded retry with exponential backoff and jitter.
//!
//! Only transient failures are retried; see [`is_retryable`]. The sleep
//! between attempts races the cancellation token, so a cancelled caller gets
//! [`DocHarvestError::Cancelled`] promptly rather than a retry-exhaustion error.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docharvest_shared::{DocHarvestError, Result, RetrySettings};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Provider statuses worth retrying.
const RETRYABLE_PROVIDER_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Fetch statuses worth retrying, besides the 520–530 CDN range.
const RETRYABLE_FETCH_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Runtime retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Fraction of each delay by which it is randomly widened or narrowed.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Replace non-positive values with the defaults.
    fn normalized(self) -> Self {
        Self {
            max_retries: if self.max_retries == 0 {
                DEFAULT_MAX_RETRIES
            } else {
                self.max_retries
            },
            initial_interval: if self.initial_interval.is_zero() {
                DEFAULT_INITIAL_INTERVAL
            } else {
                self.initial_interval
            },
            max_interval: if self.max_interval.is_zero() {
                DEFAULT_MAX_INTERVAL
            } else {
                self.max_interval
            },
            multiplier: if self.multiplier > 0.0 {
                self.multiplier
            } else {
                DEFAULT_MULTIPLIER
            },
            jitter_factor: if self.jitter_factor > 0.0 {
                self.jitter_factor.min(1.0)
            } else {
                DEFAULT_JITTER_FACTOR
            },
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            multiplier: settings.multiplier,
            jitter_factor: settings.jitter_factor,
        }
    }
}

/// Whether an error is transient and worth another attempt.
///
/// Retryable: an explicit [`DocHarvestError::Retryable`] wrapper, a provider
/// error with status 429 or 500/502/503/504, a fetch error with status
/// 429/502/503/504 or 520–530, or a network timeout, found anywhere in the cause
/// chain. Cancellation is never retryable; everything else is fatal.
pub fn is_retryable(err: &DocHarvestError) -> bool {
    if err.is_cancellation() {
        return false;
    }

    err.chain().any(|e| match e {
        DocHarvestError::Retryable(_) | DocHarvestError::Timeout(_) => true,
        DocHarvestError::Provider(provider) => provider
            .status_code
            .is_some_and(|code| RETRYABLE_PROVIDER_STATUSES.contains(&code)),
        DocHarvestError::Fetch { status, .. } => {
            RETRYABLE_FETCH_STATUSES.contains(status) || (520..=530).contains(status)
        }
        _ => false,
    })
}

/// Retries an async operation on transient failures.
#[derive(Debug, Clone)]
pub struct Retrier {
    config: RetryConfig,
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Retrier {
    /// Create a retrier; non-positive config values fall back to defaults.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    /// Effective configuration after defaults.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before retry number `attempt + 1`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let max = self.config.max_interval.as_secs_f64();
        let spread = base * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).clamp(0.0, max))
    }

    /// Backoff without jitter, in seconds.
    fn base_delay(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw =
            self.config.initial_interval.as_secs_f64() * self.config.multiplier.powi(exponent);
        raw.min(self.config.max_interval.as_secs_f64())
    }

    /// Run `operation` up to `max_retries + 1` times.
    ///
    /// Fatal errors and cancellation return immediately. When the budget runs
    /// out the last failure is wrapped in
    /// [`DocHarvestError::MaxRetriesExceeded`].
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DocHarvestError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(DocHarvestError::Cancelled),
                result = operation() => result,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                debug!(attempt = attempt + 1, error = %err, "non-retryable error");
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                warn!(
                    attempts = attempt + 1,
                    error = %err,
                    "max retries exceeded"
                );
                return Err(DocHarvestError::MaxRetriesExceeded {
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }

            let delay = self.delay(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(DocHarvestError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
