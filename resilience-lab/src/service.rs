//! Simulated remote dependency

use async_trait::async_trait;
use resilience_core::RemoteError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ServiceConfig;

/// Remote source of data
#[async_trait]
pub trait DataService: Send + Sync {
    async fn fetch_data(&self) -> Result<String, RemoteError>;
}

/// Answers with HTTP 500 until a configured number of calls was made.
#[derive(Debug)]
pub struct SimulatedApiService {
    attempts: AtomicU32,
    fail_until_attempt: u32,
    latency: Duration,
}

impl SimulatedApiService {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            fail_until_attempt: config.fail_until_attempt,
            latency: Duration::from_millis(config.latency_ms),
        }
    }

    /// Calls received so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataService for SimulatedApiService {
    async fn fetch_data(&self) -> Result<String, RemoteError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt, "Calling remote service");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if attempt <= self.fail_until_attempt {
            warn!(attempt, "Remote service failed");
            return Err(RemoteError::http(500, "Simulated 500 Internal Server Error"));
        }

        Ok(format!("Success: Data Retrieved on attempt {}", attempt))
    }
}
