//! Resilience primitives for calls to completion providers.
//!
//! This crate provides:
//! - [`ratelimit`]: token-bucket admission control ([`TokenBucket`], [`NoopLimiter`])
//! - [`circuit`]: failure isolation ([`Breaker`], [`NoopBreaker`])
//! - [`retry`]: bounded exponential backoff with jitter ([`Retrier`])
//!
//! Each primitive owns its state privately; nothing here is process-global.

pub mod circuit;
pub mod ratelimit;
pub mod retry;

pub use circuit::{
    Breaker, CircuitBreaker, CircuitBreakerConfig, CircuitState, NoopBreaker, circuit_breaker,
};
pub use ratelimit::{NoopLimiter, RateLimitConfig, RateLimiter, TokenBucket, rate_limiter};
pub use retry::{RetryConfig, Retrier, is_retryable};
