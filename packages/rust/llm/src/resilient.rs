//! Rate limiting, circuit breaking and retry around a completion provider.
//!
//! Every logical request goes through a fixed pipeline:
//!
//! 1. wait for a rate-limiter token
//! 2. ask the circuit breaker; if open, fail with
//!    [`DocHarvestError::CircuitOpen`] without calling the provider
//! 3. call the provider through the [`Retrier`]
//! 4. report the final outcome to the breaker once
//!
//! Retries inside step 3 do not go back through the limiter or the breaker,
//! so a retry burst is charged one token and counts as one breaker outcome.
//! The breaker cannot trip in the middle of a burst.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docharvest_resilience::{
    CircuitBreaker, CircuitState, RateLimiter, Retrier, RetryConfig, circuit_breaker,
    rate_limiter,
};
use docharvest_shared::{AiConfig, DocHarvestError, Result};

use crate::provider::Provider;
use crate::types::{CompletionRequest, CompletionResponse};

/// A [`Provider`] wrapped in admission control, failure isolation and retry.
pub struct ResilientProvider {
    inner: Arc<dyn Provider>,
    limiter: Box<dyn RateLimiter>,
    breaker: Box<dyn CircuitBreaker>,
    retrier: Retrier,
}

impl ResilientProvider {
    /// Wrap `inner` with primitives built from the `[ai.*]` sections.
    pub fn new(inner: Arc<dyn Provider>, config: &AiConfig) -> Self {
        Self::from_parts(
            inner,
            rate_limiter(&config.rate_limit),
            circuit_breaker(&config.circuit_breaker),
            Retrier::new(RetryConfig::from(&config.retry)),
        )
    }

    /// Wrap `inner` with explicitly constructed primitives.
    pub fn from_parts(
        inner: Arc<dyn Provider>,
        limiter: Box<dyn RateLimiter>,
        breaker: Box<dyn CircuitBreaker>,
        retrier: Retrier,
    ) -> Self {
        Self {
            inner,
            limiter,
            breaker,
            retrier,
        }
    }

    /// Current circuit state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Rate-limit tokens currently available.
    pub fn available_tokens(&self) -> f64 {
        self.limiter.available()
    }
}

impl std::fmt::Debug for ResilientProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientProvider")
            .field("provider", &self.inner.name())
            .field("circuit", &self.breaker.state())
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for ResilientProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let provider = self.inner.name();

        self.limiter.wait(cancel).await?;

        if !self.breaker.allow() {
            warn!(
                provider,
                circuit = %CircuitState::Open,
                "circuit open, rejecting request"
            );
            return Err(DocHarvestError::CircuitOpen {
                provider: provider.to_string(),
            });
        }

        let result = self
            .retrier
            .execute(cancel, || self.inner.complete(cancel, request))
            .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.is_cancellation() => {
                debug!(provider, "request cancelled, not counted against circuit");
            }
            Err(err) => {
                self.breaker.record_failure();
                let attempts = match err {
                    DocHarvestError::MaxRetriesExceeded { attempts, .. } => *attempts,
                    _ => 1,
                };
                warn!(
                    provider,
                    circuit = %self.breaker.state(),
                    attempts,
                    error = %err,
                    "completion failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use docharvest_resilience::{
        Breaker, CircuitBreakerConfig, NoopBreaker, NoopLimiter, RateLimitConfig, TokenBucket,
    };
    use docharvest_shared::ProviderError;

    use crate::types::Message;

    /// Replays scripted outcomes; once the script runs out it repeats `fallback`.
    struct ScriptedProvider {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<CompletionResponse>>>,
        fallback: fn() -> Result<CompletionResponse>,
        delay: Duration,
        closed: AtomicBool,
    }

    impl ScriptedProvider {
        fn new(
            script: Vec<Result<CompletionResponse>>,
            fallback: fn() -> Result<CompletionResponse>,
        ) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into()),
                fallback,
                delay: Duration::ZERO,
                closed: AtomicBool::new(false),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(
            &self,
            _cancel: &CancellationToken,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ok() -> Result<CompletionResponse> {
        Ok(CompletionResponse {
            content: "ok".into(),
            model: "scripted-1".into(),
            finish_reason: "stop".into(),
            ..CompletionResponse::default()
        })
    }

    fn unauthorized() -> Result<CompletionResponse> {
        Err(ProviderError::from_status("scripted", 401, "bad key").into())
    }

    fn unavailable() -> Result<CompletionResponse> {
        Err(ProviderError::from_status("scripted", 503, "overloaded").into())
    }

    fn fast_retrier(max_retries: u32) -> Retrier {
        Retrier::new(RetryConfig {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_factor: 0.1,
        })
    }

    fn breaker(failure_threshold: u32) -> Box<dyn CircuitBreaker> {
        Box::new(Breaker::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold_half_open: 1,
            reset_timeout: Duration::from_secs(60),
        }))
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("hello")])
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_provider() {
        let inner = Arc::new(ScriptedProvider::new(vec![], unauthorized));
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(NoopLimiter),
            breaker(2),
            fast_retrier(3),
        );
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let err = provider.complete(&cancel, &request()).await.unwrap_err();
            assert!(matches!(err, DocHarvestError::Provider(_)));
        }
        assert_eq!(provider.circuit_state(), CircuitState::Open);
        assert_eq!(inner.calls(), 2, "fatal errors are not retried");

        let err = provider.complete(&cancel, &request()).await.unwrap_err();
        assert!(
            matches!(err, DocHarvestError::CircuitOpen { ref provider } if provider == "scripted")
        );
        assert_eq!(inner.calls(), 2, "open circuit must not reach the provider");
    }

    #[tokio::test]
    async fn retries_do_not_recheck_breaker() {
        // Threshold 1 would trip on any single recorded failure, but the two
        // transient failures stay inside the retrier and only the final success
        // is reported.
        let inner = Arc::new(ScriptedProvider::new(vec![unavailable(), unavailable()], ok));
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(NoopLimiter),
            breaker(1),
            fast_retrier(3),
        );

        let response = provider
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(inner.calls(), 3);
        assert_eq!(provider.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn exhausted_retries_count_as_one_failure() {
        let inner = Arc::new(ScriptedProvider::new(vec![], unavailable));
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(NoopLimiter),
            breaker(2),
            fast_retrier(2),
        );

        let err = provider
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap_err();

        assert!(matches!(err, DocHarvestError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(inner.calls(), 3);
        assert_eq!(provider.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn retry_burst_consumes_one_token() {
        let inner = Arc::new(ScriptedProvider::new(vec![unavailable(), unavailable()], ok));
        let limiter = TokenBucket::new(RateLimitConfig {
            requests_per_minute: 1,
            burst_size: 2,
        });
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(limiter),
            Box::new(NoopBreaker),
            fast_retrier(3),
        );

        provider
            .complete(&CancellationToken::new(), &request())
            .await
            .unwrap();

        assert_eq!(inner.calls(), 3);
        let available = provider.available_tokens();
        assert!((1.0..1.1).contains(&available), "available = {available}");
    }

    #[tokio::test]
    async fn cancelled_call_is_not_counted_as_failure() {
        let mut scripted = ScriptedProvider::new(vec![], ok);
        scripted.delay = Duration::from_secs(10);
        let inner = Arc::new(scripted);
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(NoopLimiter),
            breaker(1),
            fast_retrier(3),
        );

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = provider.complete(&cancel, &request()).await.unwrap_err();
        assert!(matches!(err, DocHarvestError::Cancelled));
        assert_eq!(provider.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancelled_admission_skips_provider() {
        let inner = Arc::new(ScriptedProvider::new(vec![], ok));
        let limiter = TokenBucket::new(RateLimitConfig {
            requests_per_minute: 1,
            burst_size: 1,
        });
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(limiter),
            breaker(1),
            fast_retrier(3),
        );
        let cancel = CancellationToken::new();

        provider.complete(&cancel, &request()).await.unwrap();
        cancel.cancel();
        let err = provider.complete(&cancel, &request()).await.unwrap_err();

        assert!(matches!(err, DocHarvestError::Cancelled));
        assert_eq!(inner.calls(), 1);
        assert_eq!(provider.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn name_and_close_delegate() {
        let inner = Arc::new(ScriptedProvider::new(vec![], ok));
        let provider = ResilientProvider::from_parts(
            inner.clone(),
            Box::new(NoopLimiter),
            Box::new(NoopBreaker),
            Retrier::default(),
        );
        assert_eq!(provider.name(), "scripted");
        provider.close().unwrap();
        assert!(inner.closed.load(Ordering::SeqCst));
    }
}
