use anyhow::{Context as _, Result};
use clap::Parser;
use resilience_core::{OutcomeClassifier, RemoteError};
use resilience_pipeline::{CancellationToken, LoggingObserver, MetricsObserver, PipelineRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod service;

use crate::config::{LabConfig, LogFormat};
use crate::service::{DataService, SimulatedApiService};

/// Drive a retry + circuit breaker pipeline against a flaky simulated service
#[derive(Debug, Parser)]
#[command(name = "resilience-lab", version, about)]
struct Args {
    /// Additional configuration file
    #[arg(short, long, env = "RESILIENCE_LAB_CONFIG")]
    config: Option<PathBuf>,

    /// Pipeline to register and call
    #[arg(short, long)]
    pipeline: Option<String>,

    /// Calls answered with HTTP 500 before the service recovers
    #[arg(long)]
    fail_until: Option<u32>,

    /// Calls made through the pipeline
    #[arg(short = 'n', long)]
    calls: Option<u32>,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut LabConfig) {
        if let Some(pipeline) = &self.pipeline {
            config.pipeline_name = pipeline.clone();
        }
        if let Some(fail_until) = self.fail_until {
            config.service.fail_until_attempt = fail_until;
        }
        if let Some(calls) = self.calls {
            config.calls = calls;
        }
        if self.json {
            config.log_format = LogFormat::Json;
        }
    }
}

fn init_tracing(config: &LabConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "resilience_lab={0},resilience_pipeline={0}",
            config.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = LabConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config);
    info!(pipeline = %config.pipeline_name, "Starting resilience lab");

    let mut registry = PipelineRegistry::builder();
    let pipeline_config = config.pipeline.clone();
    registry
        .register(config.pipeline_name.clone(), |pipeline| {
            pipeline
                .config(pipeline_config)
                .handle(OutcomeClassifier::<RemoteError>::transient())
                .observer(LoggingObserver)
                .observer(MetricsObserver)
        })
        .context("Failed to register pipeline")?;
    let registry = registry.build();

    let pipeline = registry
        .get(&config.pipeline_name)
        .context("Pipeline lookup failed")?;
    let service: Arc<dyn DataService> = Arc::new(SimulatedApiService::new(&config.service));

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            shutdown.cancel();
        }
    });

    for call in 1..=config.calls {
        let result = pipeline
            .execute_with_cancellation(&token, |_| service.fetch_data())
            .await;

        match result {
            Ok(data) => info!(call, result = %data, "Remote call succeeded"),
            Err(err) if err.is_cancellation() => {
                warn!(call, error = %err, "Remote call aborted");
                break;
            }
            Err(err) => error!(call, error = %err, "Remote call failed"),
        }
    }

    let breaker = pipeline.circuit_breaker();
    let stats = breaker.stats();
    info!(
        pipeline = %pipeline.name(),
        state = %breaker.state(),
        successes = stats.successes,
        failures = stats.failures,
        rejected = stats.rejected_count,
        "Finished"
    );

    Ok(())
}
