use pretty_assertions::assert_eq;
use resilience_core::{EventKind, RemoteError};
use resilience_pipeline::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

/// Fails with HTTP 500 until `fail_until` attempts were made
struct FlakyService {
    fail_until: u32,
    calls: Mutex<Vec<Instant>>,
}

impl FlakyService {
    fn new(fail_until: u32) -> Self {
        Self {
            fail_until,
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn fetch(&self) -> Result<String, RemoteError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() as u32
        };

        if attempt <= self.fail_until {
            Err(RemoteError::http(500, "Simulated 500 Internal Server Error"))
        } else {
            Ok(format!("Success: Data Retrieved on attempt {}", attempt))
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

fn recording_pipeline(
    configure: impl FnOnce(PipelineBuilder<RemoteError>) -> PipelineBuilder<RemoteError>,
) -> (Pipeline<RemoteError>, Arc<Mutex<Vec<EventKind>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let builder = Pipeline::builder("CustomPipeline")
        .handle(OutcomeClassifier::transient())
        .observer(move |event: &ResilienceEvent| sink.lock().unwrap().push(event.kind.clone()));

    (configure(builder).build().unwrap(), events)
}

fn retry_event(attempt: u32, delay_secs: u64) -> EventKind {
    EventKind::Retry {
        attempt,
        delay: Duration::from_secs(delay_secs),
        cause: "Operation failed: HTTP 500: Simulated 500 Internal Server Error".to_string(),
    }
}

// ===== End-to-End Scenario =====

#[tokio::test(start_paused = true)]
async fn test_recovers_after_three_failures() {
    let (pipeline, events) = recording_pipeline(|p| p);
    let service = FlakyService::new(3);

    let result = pipeline.execute(|| service.fetch()).await;

    assert_eq!(assert_ok!(result), "Success: Data Retrieved on attempt 4");
    assert_eq!(service.call_count(), 4);
    assert_eq!(
        service.gaps(),
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8)
        ]
    );

    // The breaker opens on the third failure and the last retry is its trial
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            retry_event(1, 2),
            retry_event(2, 4),
            EventKind::CircuitOpened {
                break_duration: Duration::from_secs(5),
                failure_ratio: Some(1.0),
            },
            retry_event(3, 8),
            EventKind::CircuitHalfOpened,
            EventKind::CircuitClosed,
        ]
    );
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_open_ends_retry_loop() {
    let (pipeline, events) =
        recording_pipeline(|p| p.retry(RetryConfig::default().with_base_delay(Duration::from_millis(100))));
    let service = FlakyService::new(u32::MAX);

    let result = pipeline.execute(|| service.fetch()).await;

    // Attempts 1-3 reach the service, attempt 4 is short-circuited
    assert_eq!(service.call_count(), 3);
    match result.unwrap_err() {
        PipelineError::CircuitOpen { name, retry_after } => {
            assert_eq!(name, "CustomPipeline");
            assert_eq!(retry_after, Some(Duration::from_millis(4200)));
        }
        other => panic!("expected CircuitOpen, got {:?}", other),
    }
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);
    assert_eq!(pipeline.circuit_breaker().stats().rejected_count, 1);

    let retries = events
        .lock()
        .unwrap()
        .iter()
        .filter(|kind| matches!(kind, EventKind::Retry { .. }))
        .count();
    assert_eq!(retries, 3);
}

// ===== Circuit Open Handling =====

#[tokio::test(start_paused = true)]
async fn test_open_circuit_consumes_retries() {
    let (pipeline, _) =
        recording_pipeline(|p| p.retry(RetryConfig::default().with_base_delay(Duration::from_millis(100))));
    let service = FlakyService::new(u32::MAX);
    let _ = pipeline.execute(|| service.fetch()).await;

    let start = Instant::now();
    let result = pipeline.execute(|| service.fetch()).await;

    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(service.call_count(), 3);
    // Every retry waited out its backoff against the open circuit
    assert_eq!(start.elapsed(), Duration::from_millis(1400));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_fails_fast_without_retry() {
    let (pipeline, _) = recording_pipeline(|p| {
        p.retry(
            RetryConfig::default()
                .with_base_delay(Duration::from_millis(100))
                .with_retry_on_circuit_open(false),
        )
    });
    let service = FlakyService::new(u32::MAX);
    let _ = pipeline.execute(|| service.fetch()).await;

    let start = Instant::now();
    let result = pipeline.execute(|| service.fetch()).await;

    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(service.call_count(), 3);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

// ===== Classification =====

#[tokio::test(start_paused = true)]
async fn test_unhandled_error_bypasses_both_layers() {
    let (pipeline, events) = recording_pipeline(|p| p);
    let calls = AtomicU32::new(0);

    let result = pipeline
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RemoteError::Internal("invalid payload".into()))
        })
        .await;

    assert_eq!(
        assert_err!(result),
        PipelineError::Fault(RemoteError::Internal("invalid payload".into()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.circuit_breaker().health().total, 0);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_separate_classifiers_per_layer() {
    // Retry on server errors, but only let 503 count against the breaker
    let (pipeline, _) = recording_pipeline(|p| {
        p.retry(RetryConfig::default().with_max_attempts(1))
            .breaker_handle(OutcomeClassifier::new(|err: &RemoteError| {
                err.status() == Some(503)
            }))
    });
    let calls = AtomicU32::new(0);

    let result = pipeline
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RemoteError::http(500, "boom"))
        })
        .await;

    assert!(result.unwrap_err().is_fault());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.circuit_breaker().health().total, 0);
}

// ===== Timeout and Cancellation =====

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_retry_loop() {
    let (pipeline, _) = recording_pipeline(|p| p.timeout(Duration::from_secs(3)));
    let service = FlakyService::new(u32::MAX);
    let start = Instant::now();

    let result = pipeline.execute(|| service.fetch()).await;

    assert_eq!(
        result.unwrap_err(),
        PipelineError::TimedOut(Duration::from_secs(3))
    );
    // Attempts at 0s and 2s, then the 4s backoff is cut short
    assert_eq!(service.call_count(), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_trial_frees_half_open_slot() {
    let (pipeline, _) = recording_pipeline(|p| {
        p.retry(RetryConfig::default().with_max_attempts(0))
            .timeout(Duration::from_secs(1))
    });
    let service = FlakyService::new(3);
    for _ in 0..3 {
        let _ = pipeline.execute(|| service.fetch()).await;
    }
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(5)).await;

    let result = pipeline
        .execute(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, RemoteError>(())
        })
        .await;
    assert!(result.unwrap_err().is_cancellation());
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::HalfOpen);

    let result = pipeline.execute(|| service.fetch()).await;
    assert!(result.is_ok());
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff() {
    let (pipeline, events) = recording_pipeline(|p| p);
    let service = FlakyService::new(u32::MAX);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let result = pipeline
        .execute_with_cancellation(&token, |_| service.fetch())
        .await;

    assert_eq!(result.unwrap_err(), PipelineError::Cancelled);
    assert_eq!(service.call_count(), 1);
    assert_eq!(*events.lock().unwrap(), vec![retry_event(1, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_token_reaches_operation() {
    let (pipeline, _) = recording_pipeline(|p| p);
    let token = CancellationToken::new();

    let result = pipeline
        .execute_with_cancellation(&token, |attempt_token| {
            let outer = token.clone();
            async move {
                outer.cancel();
                assert!(attempt_token.is_cancelled());
                Err::<(), _>(RemoteError::Cancelled)
            }
        })
        .await;

    assert_eq!(result.unwrap_err(), PipelineError::Fault(RemoteError::Cancelled));
}

// ===== Concurrency =====

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_breaker_state() {
    let pipeline = Arc::new(
        Pipeline::<RemoteError>::builder("shared")
            .handle(OutcomeClassifier::transient())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .execute(|| async move { Ok::<_, RemoteError>(i) })
                    .await
            })
        })
        .collect();

    for handle in futures::future::join_all(handles).await {
        assert!(handle.unwrap().is_ok());
    }

    let breaker = pipeline.circuit_breaker();
    assert_eq!(breaker.stats().successes, 32);
    assert_eq!(breaker.health().total, 32);
    assert_eq!(breaker.health().failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_open_circuit_once() {
    let pipeline = Arc::new(
        Pipeline::<RemoteError>::builder("shared")
            .handle(OutcomeClassifier::transient())
            .retry(RetryConfig::default().with_max_attempts(0))
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .execute(|| async { Err::<(), _>(RemoteError::http(503, "unavailable")) })
                    .await
            })
        })
        .collect();

    for handle in futures::future::join_all(handles).await {
        assert!(handle.unwrap().is_err());
    }

    let stats = pipeline.circuit_breaker().stats();
    assert_eq!(stats.opened_count, 1);
    assert_eq!(stats.successes + stats.failures + stats.rejected_count, 20);
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);
}

// ===== Observers =====

#[tokio::test(start_paused = true)]
async fn test_broadcast_observer_streams_events() {
    let broadcast = BroadcastObserver::new(16);
    let mut rx = broadcast.subscribe();
    let pipeline = Pipeline::<RemoteError>::builder("CustomPipeline")
        .handle(OutcomeClassifier::transient())
        .observer(broadcast)
        .observer(LoggingObserver)
        .observer(MetricsObserver)
        .build()
        .unwrap();
    let service = FlakyService::new(3);

    pipeline.execute(|| service.fetch()).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.pipeline, "CustomPipeline");
        kinds.push(event.kind.circuit_state());
    }
    assert_eq!(
        kinds,
        vec![
            None,
            None,
            Some(CircuitState::Open),
            None,
            Some(CircuitState::HalfOpen),
            Some(CircuitState::Closed),
        ]
    );
}
