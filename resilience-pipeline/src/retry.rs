//! Retry with constant, linear or exponential backoff.
//!
//! The delay before the k-th retry (k starts at 1) is `base_delay` for constant,
//! `base_delay * k` for linear and `base_delay * 2^k` for exponential backoff,
//! optionally capped by `max_delay` and jittered.
//!
//! # Example
//!
//! ```no_run
//! use resilience_core::{OutcomeClassifier, RetryConfig};
//! use resilience_pipeline::retry::RetryStrategy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default().with_base_delay(Duration::from_millis(100));
//! let retry = RetryStrategy::new("my_service", config, OutcomeClassifier::handle_all());
//!
//! let result = retry
//!     .execute(|| async {
//!         // Your operation here
//!         Ok::<_, std::io::Error>(42)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use resilience_core::{
    BackoffType, EventKind, ObserverSet, OutcomeClassifier, PipelineError, ResilienceEvent,
    ResilienceObserver, RetryConfig,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt bookkeeping for one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Current attempt, starting at 1
    pub attempt: u32,
    /// Retries allowed beyond the first attempt
    pub max_attempts: u32,
}

impl RetryContext {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts,
        }
    }

    /// True once the current attempt is the last one allowed.
    pub fn is_exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }

    pub fn retries_used(&self) -> u32 {
        self.attempt - 1
    }

    fn advance(&mut self) {
        self.attempt += 1;
    }
}

/// Retry strategy over operations failing with `E`.
pub struct RetryStrategy<E> {
    name: String,
    config: RetryConfig,
    should_handle: OutcomeClassifier<E>,
    observer: Arc<dyn ResilienceObserver>,
}

impl<E> RetryStrategy<E> {
    pub fn new(
        name: impl Into<String>,
        config: RetryConfig,
        should_handle: OutcomeClassifier<E>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            should_handle,
            observer: Arc::new(ObserverSet::new()),
        }
    }

    /// Route retry events to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the `retry`-th retry (1-based), before jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let base = self.config.base_delay;
        let delay = match self.config.backoff {
            BackoffType::Constant => base,
            BackoffType::Linear => base.saturating_mul(retry),
            BackoffType::Exponential => base.saturating_mul(2u32.saturating_pow(retry)),
        };

        match self.config.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay actually slept before the `retry`-th retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.base_delay_for(retry);
        if self.config.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    fn is_handled(&self, error: &PipelineError<E>) -> bool {
        match error {
            PipelineError::Fault(err) => self.should_handle.is_handled(err),
            PipelineError::CircuitOpen { .. } => self.config.retry_on_circuit_open,
            PipelineError::Cancelled | PipelineError::TimedOut(_) => false,
        }
    }
}

impl<E: fmt::Display> RetryStrategy<E> {
    /// Retry an operation until it succeeds, fails with an unhandled error, or
    /// runs out of attempts.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T, PipelineError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = CancellationToken::new();
        self.execute_with_cancellation(&token, move |_| f()).await
    }

    /// Like [`execute`](Self::execute), but stops with
    /// [`PipelineError::Cancelled`] once `token` fires. The token is handed to
    /// every attempt.
    pub async fn execute_with_cancellation<T, F, Fut>(
        &self,
        token: &CancellationToken,
        mut f: F,
    ) -> Result<T, PipelineError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(token, move |token| {
            let attempt = f(token);
            async move { attempt.await.map_err(PipelineError::Fault) }
        })
        .await
    }

    /// The retry loop. Attempts report failures as [`PipelineError`] so that
    /// inner layers can surface their own synthetic failures.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, PipelineError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, PipelineError<E>>>,
    {
        let mut context = RetryContext::new(self.config.max_attempts);

        loop {
            if token.is_cancelled() {
                debug!(pipeline = %self.name, attempt = context.attempt, "Cancelled before attempt");
                return Err(PipelineError::Cancelled);
            }

            debug!(
                pipeline = %self.name,
                attempt = context.attempt,
                max_attempts = self.config.total_attempts(),
                "Executing attempt"
            );

            let error = match attempt_fn(token.clone()).await {
                Ok(value) => {
                    if context.retries_used() > 0 {
                        debug!(
                            pipeline = %self.name,
                            retries = context.retries_used(),
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.is_handled(&error) {
                debug!(pipeline = %self.name, "Error is not handled, giving up");
                return Err(error);
            }

            if context.is_exhausted() {
                warn!(
                    pipeline = %self.name,
                    attempts = context.attempt,
                    error = %error,
                    "Max retry attempts reached"
                );
                return Err(error);
            }

            if token.is_cancelled() {
                debug!(pipeline = %self.name, attempt = context.attempt, "Cancelled during attempt");
                return Err(PipelineError::Cancelled);
            }

            let delay = self.delay_for(context.attempt);
            self.observer.on_event(&ResilienceEvent::new(
                self.name.clone(),
                EventKind::Retry {
                    attempt: context.attempt,
                    delay,
                    cause: error.to_string(),
                },
            ));

            tokio::select! {
                _ = token.cancelled() => {
                    debug!(pipeline = %self.name, "Cancelled during backoff");
                    return Err(PipelineError::Cancelled);
                }
                _ = sleep(delay) => {}
            }

            context.advance();
        }
    }
}

impl<E> fmt::Debug for RetryStrategy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Equal jitter: half the delay plus a random share of the other half.
fn apply_jitter(delay: Duration) -> Duration {
    let jitter = rand::random::<f64>();
    let half = delay.as_secs_f64() / 2.0;
    Duration::from_secs_f64(half + half * jitter)
}
