//! Structured notifications emitted by resilience strategies.
//!
//! Strategies never log or print on their own behalf; they hand every event to a
//! [`ResilienceObserver`] and leave presentation to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Failure ratio exceeded, requests are short-circuited
    Open,
    /// Break elapsed, a single trial request probes recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A handled failure is about to be retried.
    Retry {
        /// The attempt that just failed, starting at 1
        attempt: u32,
        /// Delay before the next attempt
        #[serde(rename = "delay_ms", with = "duration_millis")]
        delay: Duration,
        cause: String,
    },
    /// The circuit entered Open.
    CircuitOpened {
        #[serde(rename = "break_duration_ms", with = "duration_millis")]
        break_duration: Duration,
        /// Ratio that tripped the breaker; absent when a failed trial reopened it
        failure_ratio: Option<f64>,
    },
    /// The circuit entered HalfOpen; the next call is the trial.
    CircuitHalfOpened,
    /// The circuit closed after a successful trial or a manual reset.
    CircuitClosed,
}

impl EventKind {
    /// State the circuit entered, for circuit events.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        match self {
            EventKind::Retry { .. } => None,
            EventKind::CircuitOpened { .. } => Some(CircuitState::Open),
            EventKind::CircuitHalfOpened => Some(CircuitState::HalfOpen),
            EventKind::CircuitClosed => Some(CircuitState::Closed),
        }
    }
}

/// One event, tagged with the pipeline it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceEvent {
    pub pipeline: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl ResilienceEvent {
    pub fn new(pipeline: impl Into<String>, kind: EventKind) -> Self {
        Self {
            pipeline: pipeline.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Receives resilience events. Called synchronously on the caller's task and
/// never while internal locks are held.
pub trait ResilienceObserver: Send + Sync {
    fn on_event(&self, event: &ResilienceEvent);
}

impl<F> ResilienceObserver for F
where
    F: Fn(&ResilienceEvent) + Send + Sync,
{
    fn on_event(&self, event: &ResilienceEvent) {
        self(event)
    }
}

/// Fans an event out to every registered observer, in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ResilienceObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn ResilienceObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ResilienceObserver for ObserverSet {
    fn on_event(&self, event: &ResilienceEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}
