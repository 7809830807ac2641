use std::time::Duration;
use thiserror::Error;

/// Errors raised while configuring or assembling pipelines.
///
/// These are setup-time failures and are expected to be fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Pipeline already registered: {0}")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}

/// The single terminal failure a caller of a pipeline receives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError<E> {
    /// The operation failed. The original error is carried unmodified,
    /// whether it was handled (and retries ran out) or not.
    #[error("Operation failed: {0}")]
    Fault(E),

    /// The circuit breaker short-circuited the attempt without invoking the operation.
    #[error("Circuit breaker is open for {name}")]
    CircuitOpen {
        name: String,
        /// Remaining break time, when known.
        retry_after: Option<Duration>,
    },

    /// The cancellation token fired before the pipeline finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// The overarching pipeline timeout elapsed.
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),
}

impl<E> PipelineError<E> {
    pub fn is_fault(&self) -> bool {
        matches!(self, PipelineError::Fault(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PipelineError::CircuitOpen { .. })
    }

    /// True for both explicit cancellation and timeout.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled | PipelineError::TimedOut(_))
    }

    pub fn as_fault(&self) -> Option<&E> {
        match self {
            PipelineError::Fault(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_fault(self) -> Option<E> {
        match self {
            PipelineError::Fault(err) => Some(err),
            _ => None,
        }
    }

    /// Map the operation error, leaving synthesized failures untouched.
    pub fn map_fault<F, O>(self, op: O) -> PipelineError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            PipelineError::Fault(err) => PipelineError::Fault(op(err)),
            PipelineError::CircuitOpen { name, retry_after } => {
                PipelineError::CircuitOpen { name, retry_after }
            }
            PipelineError::Cancelled => PipelineError::Cancelled,
            PipelineError::TimedOut(elapsed) => PipelineError::TimedOut(elapsed),
        }
    }
}
