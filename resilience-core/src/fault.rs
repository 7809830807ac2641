//! Outcome classification.
//!
//! A pipeline reacts only to *handled* faults. Everything else propagates to the
//! caller untouched, bypassing both retry and circuit breaker bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Coarse class of an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Expected to go away on its own (server errors, dropped connections).
    Transient,
    /// Retrying cannot help (bad input, programming errors).
    Permanent,
    /// The work was cancelled by its owner.
    Cancelled,
}

/// Errors that know their own fault class.
pub trait Classify {
    fn fault_class(&self) -> FaultClass;

    fn is_transient(&self) -> bool {
        self.fault_class() == FaultClass::Transient
    }
}

/// Error returned by a remote dependency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RemoteError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for RemoteError {
    fn fault_class(&self) -> FaultClass {
        match self {
            RemoteError::Http { .. } => FaultClass::Transient,
            RemoteError::Cancelled => FaultClass::Cancelled,
            RemoteError::Internal(_) => FaultClass::Permanent,
        }
    }
}

type Predicate<E> = dyn Fn(&E) -> bool + Send + Sync;

/// Decides whether a failed outcome is a handled fault.
pub struct OutcomeClassifier<E> {
    predicate: Arc<Predicate<E>>,
}

impl<E> OutcomeClassifier<E> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Every operation error is a handled fault.
    pub fn handle_all() -> Self {
        Self::new(|_| true)
    }

    /// No operation error is handled; every failure propagates immediately.
    pub fn handle_none() -> Self {
        Self::new(|_| false)
    }

    pub fn is_handled(&self, error: &E) -> bool {
        (self.predicate)(error)
    }

    /// Handled if either classifier handles the error.
    pub fn or(self, other: OutcomeClassifier<E>) -> Self
    where
        E: 'static,
    {
        let first = self.predicate;
        let second = other.predicate;
        Self {
            predicate: Arc::new(move |err| first(err) || second(err)),
        }
    }
}

impl<E: Classify> OutcomeClassifier<E> {
    /// Handles only errors classified as [`FaultClass::Transient`].
    pub fn transient() -> Self {
        Self::new(|err: &E| err.is_transient())
    }
}

impl<E> Clone for OutcomeClassifier<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for OutcomeClassifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeClassifier").finish_non_exhaustive()
    }
}
