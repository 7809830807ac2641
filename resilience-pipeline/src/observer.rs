//! Ready-made observers for resilience events.

use metrics::counter;
use resilience_core::{EventKind, ResilienceEvent, ResilienceObserver};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Writes every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl ResilienceObserver for LoggingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        match &event.kind {
            EventKind::Retry {
                attempt,
                delay,
                cause,
            } => {
                warn!(
                    pipeline = %event.pipeline,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    cause = %cause,
                    "Retrying after failure"
                );
            }
            EventKind::CircuitOpened {
                break_duration,
                failure_ratio,
            } => {
                warn!(
                    pipeline = %event.pipeline,
                    break_ms = break_duration.as_millis() as u64,
                    failure_ratio = ?failure_ratio,
                    "Circuit opened, blocking requests"
                );
            }
            EventKind::CircuitHalfOpened => {
                info!(pipeline = %event.pipeline, "Circuit half-open, trial call will be allowed");
            }
            EventKind::CircuitClosed => {
                info!(pipeline = %event.pipeline, "Circuit closed, service is healthy");
            }
        }
    }
}

/// Counts events with the `metrics` facade.
///
/// - `resilience_retries_total{pipeline}`
/// - `resilience_circuit_transitions_total{pipeline, state}`
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl ResilienceObserver for MetricsObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        match event.kind.circuit_state() {
            Some(state) => {
                counter!(
                    "resilience_circuit_transitions_total",
                    "pipeline" => event.pipeline.clone(),
                    "state" => state.as_str()
                )
                .increment(1);
            }
            None => {
                counter!("resilience_retries_total", "pipeline" => event.pipeline.clone())
                    .increment(1);
            }
        }
    }
}

/// Publishes events on a broadcast channel.
///
/// Sending never blocks; events are dropped while nobody subscribes and lagging
/// receivers lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<ResilienceEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ResilienceObserver for BroadcastObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        let _ = self.sender.send(event.clone());
    }
}
