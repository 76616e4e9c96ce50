//! Circuit breaker for completion providers.
//!
//! # States
//!
//! - **Closed**: normal operation; consecutive failures are counted and any
//!   success clears the count
//! - **Open**: every call is rejected until `reset_timeout` has elapsed
//! - **Half-Open**: calls are admitted as probes; one failure reopens the
//!   circuit, `success_threshold_half_open` successes close it
//!
//! The Open → Half-Open move happens inside [`CircuitBreaker::allow`] itself.
//! Every transition clears both counters and stamps the transition time.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use docharvest_shared::CircuitBreakerSettings;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Rejecting all calls - too many failures
    Open,
    /// Probing recovery
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure isolation in front of a completion provider.
///
/// Callers must call [`allow`](Self::allow) before every attempt and report
/// the outcome of each allowed attempt exactly once.
pub trait CircuitBreaker: Send + Sync {
    /// Whether a call may proceed now. May move Open → Half-Open.
    fn allow(&self) -> bool;

    /// Report a successful call.
    fn record_success(&self);

    /// Report a failed call.
    fn record_failure(&self);

    /// Current state, without side effects.
    fn state(&self) -> CircuitState;
}

/// Runtime circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold_half_open: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold_half_open: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// Replace zero values with the defaults.
    fn normalized(self) -> Self {
        Self {
            failure_threshold: if self.failure_threshold == 0 {
                DEFAULT_FAILURE_THRESHOLD
            } else {
                self.failure_threshold
            },
            success_threshold_half_open: if self.success_threshold_half_open == 0 {
                DEFAULT_SUCCESS_THRESHOLD
            } else {
                self.success_threshold_half_open
            },
            reset_timeout: if self.reset_timeout.is_zero() {
                DEFAULT_RESET_TIMEOUT
            } else {
                self.reset_timeout
            },
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            success_threshold_half_open: settings.success_threshold_half_open,
            reset_timeout: Duration::from_secs(settings.reset_timeout_secs),
        }
    }
}

/// Build the breaker selected by `settings.enabled`.
pub fn circuit_breaker(settings: &CircuitBreakerSettings) -> Box<dyn CircuitBreaker> {
    if settings.enabled {
        Box::new(Breaker::new(CircuitBreakerConfig::from(settings)))
    } else {
        Box::new(NoopBreaker)
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_state_change: Instant,
}

impl Circuit {
    fn transition_to(&mut self, new_state: CircuitState) {
        info!(
            from = %self.state,
            to = %new_state,
            failures = self.failures,
            successes = self.successes,
            "circuit breaker state transition"
        );
        self.state = new_state;
        self.failures = 0;
        self.successes = 0;
        self.last_state_change = Instant::now();
    }
}

/// Consecutive-failure circuit breaker, safe to share across tasks.
#[derive(Debug)]
pub struct Breaker {
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
}

impl Breaker {
    /// Create a closed breaker; zero config values fall back to defaults.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: config.normalized(),
            circuit: Mutex::new(Circuit {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_state_change: Instant::now(),
            }),
        }
    }

    /// Effective configuration after defaults.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CircuitBreaker for Breaker {
    fn allow(&self) -> bool {
        let mut circuit = self.lock();
        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if circuit.last_state_change.elapsed() >= self.config.reset_timeout {
                    circuit.transition_to(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut circuit = self.lock();
        match circuit.state {
            CircuitState::Closed => circuit.failures = 0,
            CircuitState::HalfOpen => {
                circuit.successes += 1;
                if circuit.successes >= self.config.success_threshold_half_open {
                    circuit.transition_to(CircuitState::Closed);
                }
            }
            // A call admitted before the circuit opened; the open window stands.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut circuit = self.lock();
        match circuit.state {
            CircuitState::Closed => {
                circuit.failures += 1;
                if circuit.failures >= self.config.failure_threshold {
                    circuit.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => circuit.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn state(&self) -> CircuitState {
        self.lock().state
    }
}

// ---------------------------------------------------------------------------
// NoopBreaker
// ---------------------------------------------------------------------------

/// Breaker used when circuit breaking is disabled: always closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBreaker;

impl CircuitBreaker for NoopBreaker {
    fn allow(&self) -> bool {
        true
    }

    fn record_success(&self) {}

    fn record_failure(&self) {}

    fn state(&self) -> CircuitState {
        CircuitState::Closed
    }
}
