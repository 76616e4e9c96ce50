//! Token-bucket admission control.
//!
//! Refill is lazy: every access computes the credit earned since the last
//! access, so there is no background timer. A single mutex guards the bucket
//! and is never held across an await point.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use docharvest_shared::{DocHarvestError, RateLimitSettings, Result};

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_BURST_SIZE: u32 = 1;

/// Admission control in front of a completion provider.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until one token is available and debit it, or fail with
    /// [`DocHarvestError::Cancelled`] if `cancel` fires first.
    async fn wait(&self, cancel: &CancellationToken) -> Result<()>;

    /// Debit one token if available, without waiting.
    fn try_acquire(&self) -> bool;

    /// Tokens currently available, after an on-demand refill.
    fn available(&self) -> f64;
}

/// Runtime rate-limit configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            requests_per_minute: settings.requests_per_minute,
            burst_size: settings.burst_size,
        }
    }
}

/// Build the limiter selected by `settings.enabled`.
pub fn rate_limiter(settings: &RateLimitSettings) -> Box<dyn RateLimiter> {
    if settings.enabled {
        Box::new(TokenBucket::new(RateLimitConfig::from(settings)))
    } else {
        Box::new(NoopLimiter)
    }
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token-bucket limiter: `burst_size` capacity, refilled at
/// `requests_per_minute / 60` tokens per second. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Create a bucket; zero rate or burst fall back to 60 rpm and burst 1.
    pub fn new(config: RateLimitConfig) -> Self {
        let rpm = if config.requests_per_minute == 0 {
            DEFAULT_REQUESTS_PER_MINUTE
        } else {
            config.requests_per_minute
        };
        let burst = if config.burst_size == 0 {
            DEFAULT_BURST_SIZE
        } else {
            config.burst_size
        };
        let capacity = f64::from(burst);

        Self {
            capacity,
            refill_rate: f64::from(rpm) / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Maximum burst.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refill, then either debit a token or report how long until one exists.
    fn acquire_or_shortfall(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.lock();
        bucket.refill(self.capacity, self.refill_rate);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let secs = (1.0 - bucket.tokens) / self.refill_rate;
            // Round up to the next millisecond so the retry lands after the token.
            Err(Duration::from_millis((secs * 1_000.0).ceil() as u64))
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(DocHarvestError::Cancelled);
            }

            let shortfall = match self.acquire_or_shortfall() {
                Ok(()) => return Ok(()),
                Err(shortfall) => shortfall,
            };

            debug!(wait_ms = shortfall.as_millis() as u64, "rate limiter waiting for token");
            tokio::select! {
                _ = cancel.cancelled() => return Err(DocHarvestError::Cancelled),
                _ = tokio::time::sleep(shortfall) => {}
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.acquire_or_shortfall().is_ok()
    }

    fn available(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(self.capacity, self.refill_rate);
        bucket.tokens
    }
}

// ---------------------------------------------------------------------------
// NoopLimiter
// ---------------------------------------------------------------------------

/// Limiter used when rate limiting is disabled: always admits immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLimiter;

#[async_trait]
impl RateLimiter for NoopLimiter {
    async fn wait(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn try_acquire(&self) -> bool {
        true
    }

    fn available(&self) -> f64 {
        f64::INFINITY
    }
}
