//! Rolling window of recent outcomes.
//!
//! The window slides strictly with time: every read drops samples that are
//! `sampling_duration` old or older before counting, so a stale burst of failures
//! can never trip the breaker.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome counts inside the window at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub total: u32,
    pub failures: u32,
}

impl HealthSnapshot {
    pub fn successes(&self) -> u32 {
        self.total - self.failures
    }

    /// `failures / total`, or 0.0 for an empty window.
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.failures) / f64::from(self.total)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    failed: bool,
}

/// Time-bounded record of attempted outcomes.
#[derive(Debug)]
pub struct RollingWindow {
    sampling_duration: Duration,
    samples: VecDeque<Sample>,
    failures: u32,
}

impl RollingWindow {
    pub fn new(sampling_duration: Duration) -> Self {
        Self {
            sampling_duration,
            samples: VecDeque::new(),
            failures: 0,
        }
    }

    pub fn sampling_duration(&self) -> Duration {
        self.sampling_duration
    }

    pub fn record_success(&mut self, now: Instant) {
        self.record(now, false);
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.record(now, true);
    }

    fn record(&mut self, now: Instant, failed: bool) {
        self.evict(now);
        self.samples.push_back(Sample { at: now, failed });
        if failed {
            self.failures += 1;
        }
    }

    /// Counts of the samples still inside the window at `now`.
    pub fn snapshot(&mut self, now: Instant) -> HealthSnapshot {
        self.evict(now);
        HealthSnapshot {
            total: self.samples.len() as u32,
            failures: self.failures,
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.failures = 0;
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.at) < self.sampling_duration {
                break;
            }
            if oldest.failed {
                self.failures -= 1;
            }
            self.samples.pop_front();
        }
    }
}
