//! Retry composed over a circuit breaker.
//!
//! Retry is the outer layer. Every attempt it makes first passes through the
//! breaker, so once the breaker opens the remaining attempts of a retry loop fail
//! fast with [`PipelineError::CircuitOpen`] and still use up the retry budget.

use resilience_core::{
    CircuitBreakerConfig, CoreError, ObserverSet, OutcomeClassifier, PipelineConfig,
    PipelineError, ResilienceObserver, RetryConfig,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::RetryStrategy;

/// A configured retry + circuit breaker pipeline
pub struct Pipeline<E> {
    name: String,
    retry: RetryStrategy<E>,
    breaker: CircuitBreaker<E>,
    timeout: Option<Duration>,
}

impl<E> Pipeline<E> {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder<E> {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry(&self) -> &RetryStrategy<E> {
        &self.retry
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker<E> {
        &self.breaker
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<E: fmt::Display> Pipeline<E> {
    /// Run `f` through the pipeline.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T, PipelineError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = CancellationToken::new();
        self.execute_with_cancellation(&token, move |_| f()).await
    }

    /// Run `f` through the pipeline, aborting with [`PipelineError::Cancelled`]
    /// at the next backoff or attempt boundary once `token` fires.
    pub async fn execute_with_cancellation<T, F, Fut>(
        &self,
        token: &CancellationToken,
        mut f: F,
    ) -> Result<T, PipelineError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = &self.breaker;
        let attempts = self.retry.run(token, move |token| {
            // The operation is only invoked once the breaker admitted the attempt
            let admitted = breaker.try_acquire().map(|permit| (permit, f(token)));
            async move {
                let (permit, attempt) = admitted?;
                let outcome = attempt.await;
                permit.record(&outcome);
                outcome.map_err(PipelineError::Fault)
            }
        });

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempts).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(pipeline = %self.name, timeout = ?limit, "Pipeline execution timed out");
                    Err(PipelineError::TimedOut(limit))
                }
            },
            None => attempts.await,
        }
    }
}

impl<E> fmt::Debug for Pipeline<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder<E> {
    name: String,
    config: PipelineConfig,
    retry_handle: Option<OutcomeClassifier<E>>,
    breaker_handle: Option<OutcomeClassifier<E>>,
    observers: ObserverSet,
}

impl<E> PipelineBuilder<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PipelineConfig::default(),
            retry_handle: None,
            breaker_handle: None,
            observers: ObserverSet::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Overarching deadline for each `execute` call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Use `classifier` for both retry and circuit breaker
    pub fn handle(mut self, classifier: OutcomeClassifier<E>) -> Self {
        self.retry_handle = Some(classifier.clone());
        self.breaker_handle = Some(classifier);
        self
    }

    pub fn retry_handle(mut self, classifier: OutcomeClassifier<E>) -> Self {
        self.retry_handle = Some(classifier);
        self
    }

    pub fn breaker_handle(mut self, classifier: OutcomeClassifier<E>) -> Self {
        self.breaker_handle = Some(classifier);
        self
    }

    pub fn observer(mut self, observer: impl ResilienceObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Validate the configuration and assemble the pipeline.
    ///
    /// Layers without an explicit classifier handle every operation error.
    pub fn build(self) -> Result<Pipeline<E>, CoreError> {
        self.config.validate()?;

        let observer: Arc<dyn ResilienceObserver> = Arc::new(self.observers);
        let retry = RetryStrategy::new(
            self.name.clone(),
            self.config.retry,
            self.retry_handle.unwrap_or_else(OutcomeClassifier::handle_all),
        )
        .with_observer(Arc::clone(&observer));
        let breaker = CircuitBreaker::new(
            self.name.clone(),
            self.config.circuit_breaker,
            self.breaker_handle.unwrap_or_else(OutcomeClassifier::handle_all),
        )
        .with_observer(observer);

        debug!(pipeline = %self.name, "Pipeline built");

        Ok(Pipeline {
            name: self.name,
            retry,
            breaker,
            timeout: self.config.timeout,
        })
    }
}

impl<E> fmt::Debug for PipelineBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("observers", &self.observers)
            .finish()
    }
}
