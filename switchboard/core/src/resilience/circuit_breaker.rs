//! Circuit Breaker
//!
//! Per-resource failure isolation. One breaker guards one named resource
//! (normally one provider) and is shared by every request targeting it.
//!
//! # State Machine
//!
//! ```text
//! +--------+   failures >= threshold   +------+   reset_timeout elapsed   +-----------+
//! | Closed | ------------------------> | Open | ------------------------> | Half-Open |
//! +--------+                           +------+   (checked on admission)  +-----------+
//!     ^                                    ^                                   |
//!     |            success                 |     failures >= threshold         |
//!     +------------------------------------+-----------------------------------+
//! ```
//!
//! - Counters are cumulative since the last transition into `Closed`, not a
//!   sliding window. A success while `Closed` does not clear failures.
//! - `Half-Open` admits every caller that observes it. Once the single
//!   `Open → Half-Open` compare-and-swap succeeds, all racing callers get
//!   through, so recovery is tested by a burst of trial calls rather than
//!   by a single one.
//! - Counters do not reset on `Open → Half-Open`; a breaker at or above its
//!   threshold reopens on the first failure in `Half-Open`.
//!
//! # Thread Safety
//!
//! State, counters and timestamps are atomics. Every transition is a single
//! compare-and-swap on the state word, and only the winner stamps the
//! transition time. No lock is ever taken.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Circuit State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    #[default]
    Closed,

    /// Calls are rejected outright
    Open,

    /// Calls pass through on trial
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

impl CircuitState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => CLOSED,
            Self::Open => OPEN,
            Self::HalfOpen => HALF_OPEN,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            OPEN => Self::Open,
            HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a circuit breaker
///
/// Durations (de)serialize as whole milliseconds under `*_ms` keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Cumulative failures that trip the breaker (at least 1)
    pub failure_threshold: u32,

    /// Advisory per-call deadline. Not enforced by the breaker; the unit of
    /// work is expected to apply it.
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,

    /// Minimum time spent `Open` before trial calls are admitted
    #[serde(rename = "reset_timeout_ms", with = "millis")]
    pub reset_timeout: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            call_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the advisory call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the reset timeout
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A call was rejected because the circuit is open
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Circuit breaker is open for: {name}")]
pub struct CircuitOpenError {
    /// Breaker that rejected the call
    pub name: String,

    /// Time left until the breaker admits trial calls
    pub retry_after: Duration,
}

/// Outcome of a failed [`CircuitBreaker::execute`]
///
/// The unit of work's own error comes back untouched in `Failed`.
#[derive(Debug)]
pub enum ExecutionError<E> {
    /// The breaker denied the call; the unit of work never ran
    CircuitOpen(CircuitOpenError),

    /// The unit of work ran and failed
    Failed(E),
}

impl<E> ExecutionError<E> {
    /// Whether the breaker rejected the call
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// The unit of work's error, if it ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::CircuitOpen(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ExecutionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen(e) => write!(f, "{e}"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ExecutionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CircuitOpen(e) => Some(e),
            Self::Failed(e) => Some(e),
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Named failure-isolation state machine
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,

    /// Current state (see `CLOSED`, `OPEN`, `HALF_OPEN`)
    state: AtomicU8,

    /// Failures since the last transition into `Closed`
    failure_count: AtomicU32,

    /// Successes since the last transition into `Closed`
    success_count: AtomicU32,

    /// Nanos since `epoch` (+1); 0 means "never"
    last_failure_nanos: AtomicU64,

    /// Nanos since `epoch` (+1)
    last_transition_nanos: AtomicU64,

    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration
    ///
    /// A zero failure threshold is raised to 1.
    pub fn new(name: impl Into<String>, mut config: CircuitBreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        let epoch = Instant::now();
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_nanos: AtomicU64::new(0),
            last_transition_nanos: AtomicU64::new(1),
            epoch,
        }
    }

    /// Create a breaker with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Failures since the last transition into `Closed`
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Successes since the last transition into `Closed`
    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.success_count.load(Ordering::Acquire)
    }

    /// Decide whether a call may proceed
    ///
    /// In `Open`, lazily moves to `Half-Open` once the reset timeout has
    /// elapsed since the last transition.
    pub fn allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if !self.reset_timeout_elapsed() {
                    return false;
                }
                self.try_half_open()
            }
        }
    }

    /// Attempt `Open -> Half-Open`, then admit unless the breaker is open again
    ///
    /// A caller losing the race may find the breaker already closed by a
    /// successful trial call; it is admitted like any caller in `Closed`.
    fn try_half_open(&self) -> bool {
        if self.transition(OPEN, HALF_OPEN) {
            tracing::info!(breaker = %self.name, "Circuit breaker half-open, admitting trial calls");
        }
        matches!(self.state(), CircuitState::Closed | CircuitState::HalfOpen)
    }

    /// Run a unit of work through the breaker
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::CircuitOpen`] if the breaker denies the call
    /// - [`ExecutionError::Failed`] with the unit of work's own error
    pub fn execute<T, E, F>(&self, work: F) -> Result<T, ExecutionError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.allow_call() {
            return Err(ExecutionError::CircuitOpen(self.open_error()));
        }
        self.record(work())
    }

    /// Run an async unit of work through the breaker
    ///
    /// The breaker imposes no deadline; cancellation and the advisory
    /// `call_timeout` are the caller's job.
    ///
    /// # Errors
    ///
    /// Same as [`CircuitBreaker::execute`].
    pub async fn execute_async<T, E, F, Fut>(&self, work: F) -> Result<T, ExecutionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_call() {
            return Err(ExecutionError::CircuitOpen(self.open_error()));
        }
        self.record(work().await)
    }

    fn record<T, E>(&self, outcome: Result<T, E>) -> Result<T, ExecutionError<E>> {
        match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(ExecutionError::Failed(e))
            }
        }
    }

    /// Record a successful call
    pub fn on_success(&self) {
        self.success_count.fetch_add(1, Ordering::AcqRel);

        if self.transition(HALF_OPEN, CLOSED) {
            self.failure_count.store(0, Ordering::Release);
            self.success_count.store(0, Ordering::Release);
            tracing::info!(breaker = %self.name, "Circuit breaker closed - resource recovered");
        }
    }

    /// Record a failed call
    pub fn on_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_nanos.store(self.now_nanos(), Ordering::Release);

        let current = self.state.load(Ordering::Acquire);
        if (current == CLOSED || current == HALF_OPEN)
            && failures >= self.config.failure_threshold
            && self.transition(current, OPEN)
        {
            tracing::warn!(
                breaker = %self.name,
                failures,
                threshold = self.config.failure_threshold,
                from = %CircuitState::from_u8(current),
                "Circuit breaker opened"
            );
        }
    }

    /// Force `Closed` and zero both counters
    pub fn reset(&self) {
        self.state.store(CLOSED, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.stamp_transition();
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Force `Open`, bypassing the threshold
    pub fn force_open(&self) {
        self.state.store(OPEN, Ordering::Release);
        self.stamp_transition();
        tracing::warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    /// Immutable snapshot of the breaker
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        let last_failure = self.last_failure_nanos.load(Ordering::Acquire);
        BreakerMetrics {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count(),
            success_count: self.success_count(),
            last_failure_at: (last_failure != 0).then(|| self.instant_at(last_failure)),
            last_transition_at: self.instant_at(self.last_transition_nanos.load(Ordering::Acquire)),
        }
    }

    /// Single compare-and-swap; only the winner stamps the transition time
    fn transition(&self, from: u8, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.stamp_transition();
        }
        won
    }

    fn stamp_transition(&self) {
        self.last_transition_nanos
            .store(self.now_nanos(), Ordering::Release);
    }

    fn since_last_transition(&self) -> Duration {
        let last = self.last_transition_nanos.load(Ordering::Acquire);
        Duration::from_nanos(self.now_nanos().saturating_sub(last))
    }

    fn reset_timeout_elapsed(&self) -> bool {
        self.since_last_transition() >= self.config.reset_timeout
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            retry_after: self
                .config
                .reset_timeout
                .saturating_sub(self.since_last_transition()),
        }
    }

    /// Nanoseconds since construction, offset by one so 0 can mean "never"
    ///
    /// The reset timeout must never be judged elapsed early, so no rounding.
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX - 1) + 1
    }

    fn instant_at(&self, nanos: u64) -> Instant {
        self.epoch + Duration::from_nanos(nanos.saturating_sub(1))
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("success_count", &self.success_count())
            .field("failure_threshold", &self.config.failure_threshold)
            .finish()
    }
}

// ============================================================================
// Metrics Snapshot
// ============================================================================

/// Immutable snapshot of a breaker at a point in time
#[derive(Clone, Debug, PartialEq)]
pub struct BreakerMetrics {
    /// Breaker name
    pub name: String,

    /// State at snapshot time
    pub state: CircuitState,

    /// Failures since the last transition into `Closed`
    pub failure_count: u32,

    /// Successes since the last transition into `Closed`
    pub success_count: u32,

    /// When the most recent failure was recorded
    pub last_failure_at: Option<Instant>,

    /// When the most recent state transition happened
    pub last_transition_at: Instant,
}

impl BreakerMetrics {
    /// failures / (failures + successes), 0 when both are 0
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = u64::from(self.failure_count) + u64::from(self.success_count);
        if total == 0 {
            0.0
        } else {
            f64::from(self.failure_count) / total as f64
        }
    }

    /// Time since the most recent failure
    #[must_use]
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        self.last_failure_at.map(|at| at.elapsed())
    }
}

// ============================================================================
// Tests
// ============================================================================
