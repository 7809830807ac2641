//! Circuit Breaker implementation for preventing cascading failures.
//!
//! The breaker records the outcome of every attempted call in a rolling time window
//! and stops calling the dependency once the failure ratio gets too high.
//!
//! # States
//!
//! - **Closed**: Normal operation, requests pass through and are sampled
//! - **Open**: Failure ratio exceeded, requests are short-circuited
//! - **HalfOpen**: Break elapsed, a single trial request probes recovery
//!
//! ```text
//! Closed   → Open:     >= minimum_throughput samples and failure ratio >= threshold
//! Open     → HalfOpen: first call after break_duration (that call is the trial)
//! HalfOpen → Closed:   trial succeeds (window cleared)
//! HalfOpen → Open:     trial fails with a handled fault (break timer reset)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use resilience_core::{CircuitBreakerConfig, OutcomeClassifier};
//! use resilience_pipeline::circuit_breaker::CircuitBreaker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new(
//!     "my_service",
//!     CircuitBreakerConfig::default(),
//!     OutcomeClassifier::handle_all(),
//! );
//!
//! match breaker.call(|| async { Ok::<_, std::io::Error>(42) }).await {
//!     Ok(result) => println!("Success: {}", result),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use resilience_core::{
    CircuitBreakerConfig, EventKind, ObserverSet, OutcomeClassifier, PipelineError,
    ResilienceEvent, ResilienceObserver,
};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::window::{HealthSnapshot, RollingWindow};

pub use resilience_core::CircuitState;

/// Lifetime counters for a circuit breaker
#[derive(Debug, Default)]
struct CircuitBreakerMetrics {
    successes: AtomicU64,
    failures: AtomicU64,
    rejected_count: AtomicU64,
    opened_count: AtomicU64,
    half_opened_count: AtomicU64,
    closed_count: AtomicU64,
}

impl CircuitBreakerMetrics {
    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_transition(&self, state: CircuitState) {
        let counter = match state {
            CircuitState::Open => &self.opened_count,
            CircuitState::HalfOpen => &self.half_opened_count,
            CircuitState::Closed => &self.closed_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Attempted calls that succeeded
    pub successes: u64,
    /// Attempted calls that failed with a handled fault
    pub failures: u64,
    /// Calls short-circuited without invoking the operation
    pub rejected_count: u64,
    pub opened_count: u64,
    pub half_opened_count: u64,
    pub closed_count: u64,
}

/// Internal state of the circuit breaker, guarded by a single mutex.
struct BreakerState {
    state: CircuitState,
    window: RollingWindow,
    /// When the circuit last entered Open.
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every transition and reset; permits from older generations are stale.
    generation: u64,
}

impl BreakerState {
    fn new(sampling_duration: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            window: RollingWindow::new(sampling_duration),
            opened_at: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn advance_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// How a finished attempt counts for the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    HandledFailure,
    Unhandled,
}

/// Circuit breaker over operations failing with `E`.
pub struct CircuitBreaker<E> {
    name: String,
    config: CircuitBreakerConfig,
    should_handle: OutcomeClassifier<E>,
    state: Mutex<BreakerState>,
    metrics: CircuitBreakerMetrics,
    observer: Arc<dyn ResilienceObserver>,
}

impl<E> CircuitBreaker<E> {
    /// Create a new circuit breaker
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        should_handle: OutcomeClassifier<E>,
    ) -> Self {
        let name = name.into();
        debug!(circuit = %name, "Creating circuit breaker");

        Self {
            name,
            state: Mutex::new(BreakerState::new(config.sampling_duration)),
            config,
            should_handle,
            metrics: CircuitBreakerMetrics::default(),
            observer: Arc::new(ObserverSet::new()),
        }
    }

    /// Route state change events to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An Open circuit whose break has elapsed still reports Open
    /// until the next call moves it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Outcome counts currently inside the rolling window
    pub fn health(&self) -> HealthSnapshot {
        self.state.lock().window.snapshot(Instant::now())
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            successes: self.metrics.successes.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
            opened_count: self.metrics.opened_count.load(Ordering::Relaxed),
            half_opened_count: self.metrics.half_opened_count.load(Ordering::Relaxed),
            closed_count: self.metrics.closed_count.load(Ordering::Relaxed),
        }
    }

    /// Ask for permission to run one attempt.
    ///
    /// Fails with [`PipelineError::CircuitOpen`] while the circuit is Open or a
    /// HalfOpen trial is already in flight. The returned permit must be given the
    /// attempt's outcome through [`CircuitPermit::record`].
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_, E>, PipelineError<E>> {
        let mut event = None;
        let admission = {
            let mut inner = self.state.lock();
            let now = Instant::now();

            match inner.state {
                CircuitState::Closed => Ok((false, inner.generation)),
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or(self.config.break_duration);

                    if elapsed >= self.config.break_duration {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        inner.advance_generation();
                        event = Some(EventKind::CircuitHalfOpened);
                        Ok((true, inner.generation))
                    } else {
                        Err(Some(self.config.break_duration - elapsed))
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        Err(None)
                    } else {
                        inner.trial_in_flight = true;
                        Ok((true, inner.generation))
                    }
                }
            }
        };

        if let Some(kind) = event {
            info!(circuit = %self.name, "Circuit breaker half-open, allowing trial call");
            self.transitioned(kind);
        }

        match admission {
            Ok((trial, generation)) => Ok(CircuitPermit {
                breaker: self,
                trial,
                generation,
                recorded: false,
            }),
            Err(retry_after) => {
                self.metrics.record_rejected();
                debug!(circuit = %self.name, "Circuit breaker short-circuited call");
                Err(PipelineError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after,
                })
            }
        }
    }

    /// Call a function with circuit breaker protection
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, PipelineError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let outcome = f().await;
        permit.record(&outcome);
        outcome.map_err(PipelineError::Fault)
    }

    /// Force the circuit back to Closed and forget all samples
    pub fn reset(&self) {
        let was_closed = {
            let mut inner = self.state.lock();
            let was_closed = inner.state == CircuitState::Closed;
            inner.state = CircuitState::Closed;
            inner.window.clear();
            inner.opened_at = None;
            inner.trial_in_flight = false;
            inner.advance_generation();
            was_closed
        };

        info!(circuit = %self.name, "Manually resetting circuit breaker");
        if !was_closed {
            self.transitioned(EventKind::CircuitClosed);
        }
    }

    fn complete(&self, trial: bool, generation: u64, verdict: Verdict) {
        match verdict {
            Verdict::Success => self.metrics.record_success(),
            Verdict::HandledFailure => self.metrics.record_failure(),
            Verdict::Unhandled => {}
        }

        let event = {
            let mut inner = self.state.lock();
            let now = Instant::now();

            if inner.generation != generation {
                // Admitted before the last transition or reset
                debug!(circuit = %self.name, "Ignoring outcome of a stale permit");
                return;
            }

            match verdict {
                Verdict::Success => self.on_success(&mut inner, trial),
                Verdict::HandledFailure => self.on_failure(&mut inner, trial, now),
                Verdict::Unhandled => {
                    if trial {
                        inner.trial_in_flight = false;
                    }
                    None
                }
            }
        };

        if let Some(kind) = event {
            self.transitioned(kind);
        }
    }

    fn on_success(&self, inner: &mut BreakerState, trial: bool) -> Option<EventKind> {
        match inner.state {
            CircuitState::Closed => {
                inner.window.record_success(Instant::now());
                None
            }
            CircuitState::HalfOpen if trial => {
                info!(circuit = %self.name, "Circuit breaker closing after successful trial");
                inner.state = CircuitState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.trial_in_flight = false;
                inner.advance_generation();
                Some(EventKind::CircuitClosed)
            }
            // Admitted before the circuit left Closed; no longer relevant
            _ => None,
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, trial: bool, now: Instant) -> Option<EventKind> {
        match inner.state {
            CircuitState::Closed => {
                inner.window.record_failure(now);
                let health = inner.window.snapshot(now);

                if health.total >= self.config.minimum_throughput
                    && health.failure_ratio() >= self.config.failure_ratio
                {
                    warn!(
                        circuit = %self.name,
                        failures = health.failures,
                        total = health.total,
                        "Circuit breaker opening"
                    );
                    Some(self.open(inner, now, Some(health.failure_ratio())))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if trial => {
                warn!(
                    circuit = %self.name,
                    "Circuit breaker re-opening due to failed trial"
                );
                Some(self.open(inner, now, None))
            }
            _ => None,
        }
    }

    fn open(&self, inner: &mut BreakerState, now: Instant, failure_ratio: Option<f64>) -> EventKind {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        inner.advance_generation();
        EventKind::CircuitOpened {
            break_duration: self.config.break_duration,
            failure_ratio,
        }
    }

    fn transitioned(&self, kind: EventKind) {
        if let Some(state) = kind.circuit_state() {
            self.metrics.record_transition(state);
        }
        self.observer
            .on_event(&ResilienceEvent::new(self.name.clone(), kind));
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.state.lock();
        if inner.generation == generation {
            inner.trial_in_flight = false;
        }
    }
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to run one attempt through a [`CircuitBreaker`].
///
/// Dropping a permit without recording an outcome (for example because the
/// attempt was cancelled) frees a HalfOpen trial slot and records nothing.
#[must_use = "the attempt outcome must be recorded on the permit"]
pub struct CircuitPermit<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    trial: bool,
    generation: u64,
    recorded: bool,
}

impl<'a, E> CircuitPermit<'a, E> {
    /// Whether this attempt is the HalfOpen trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Classify the attempt's outcome and update the breaker.
    pub fn record<T>(mut self, outcome: &Result<T, E>) {
        let verdict = match outcome {
            Ok(_) => Verdict::Success,
            Err(err) if self.breaker.should_handle.is_handled(err) => Verdict::HandledFailure,
            Err(_) => Verdict::Unhandled,
        };
        self.recorded = true;
        self.breaker.complete(self.trial, self.generation, verdict);
    }
}

impl<'a, E> Drop for CircuitPermit<'a, E> {
    fn drop(&mut self) {
        if !self.recorded && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}
