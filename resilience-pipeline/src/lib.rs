//! Resilience pipeline: bounded retry with backoff composed over a circuit breaker.
//!
//! - **Retry**: re-runs an operation on handled faults with constant, linear or
//!   exponential backoff
//! - **Circuit Breaker**: tracks outcomes over a rolling time window and short-circuits
//!   calls while the dependency is failing
//! - **Pipeline**: retry as the outer layer, the breaker gating every attempt
//! - **Registry**: named pipelines shared by every call site
//!
//! # Example
//!
//! ```no_run
//! use resilience_core::{OutcomeClassifier, RemoteError};
//! use resilience_pipeline::PipelineRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = PipelineRegistry::builder();
//! registry.register("CustomPipeline", |pipeline| {
//!     pipeline.handle(OutcomeClassifier::<RemoteError>::transient())
//! })?;
//! let registry = registry.build();
//!
//! let pipeline = registry.get("CustomPipeline")?;
//! let body = pipeline
//!     .execute(|| async { Ok::<_, RemoteError>("payload".to_string()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod observer;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod window;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitPermit};
pub use observer::{BroadcastObserver, LoggingObserver, MetricsObserver};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::{PipelineRegistry, PipelineRegistryBuilder};
pub use retry::{RetryContext, RetryStrategy};
pub use window::{HealthSnapshot, RollingWindow};

pub use resilience_core::{
    BackoffType, CircuitBreakerConfig, CircuitState, OutcomeClassifier, PipelineConfig,
    PipelineError, ResilienceEvent, ResilienceObserver, RetryConfig,
};
pub use tokio_util::sync::CancellationToken;
