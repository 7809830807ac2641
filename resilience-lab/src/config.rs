//! Lab configuration
//!
//! Sources, later ones overriding earlier ones:
//! `config/default`, `config/local`, the `--config` file, then
//! `RESILIENCE_LAB__*` environment variables (`__` separates nested keys, e.g.
//! `RESILIENCE_LAB__PIPELINE__RETRY__MAX_ATTEMPTS=5`).

use anyhow::{Context as _, Result};
use config::{Config as ConfigLoader, Environment, File};
use resilience_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Behavior of the simulated remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Calls answered with HTTP 500 before the service recovers
    pub fail_until_attempt: u32,
    /// Latency added to every call
    pub latency_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            fail_until_attempt: 3,
            latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub pipeline_name: String,
    pub pipeline: PipelineConfig,
    pub service: ServiceConfig,
    /// Calls made through the pipeline
    pub calls: u32,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            pipeline_name: "CustomPipeline".to_string(),
            pipeline: PipelineConfig::default(),
            service: ServiceConfig::default(),
            calls: 1,
        }
    }
}

impl LabConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("RESILIENCE_LAB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline_name.trim().is_empty() {
            anyhow::bail!("pipeline_name must not be empty");
        }
        self.pipeline
            .validate()
            .with_context(|| format!("Invalid configuration for pipeline {}", self.pipeline_name))
    }
}
