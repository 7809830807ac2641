//! Named pipelines shared across call sites.
//!
//! The registry is filled once during startup and is read-only afterwards, so
//! lookups need no locking. Every caller asking for the same name gets the same
//! pipeline and therefore the same circuit breaker state.

use resilience_core::{CoreError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::pipeline::{Pipeline, PipelineBuilder};

/// Collects pipeline definitions before the registry is frozen
pub struct PipelineRegistryBuilder<E> {
    pipelines: HashMap<String, Arc<Pipeline<E>>>,
}

impl<E> PipelineRegistryBuilder<E> {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
        }
    }

    /// Build a pipeline named `name` with `configure` and register it.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the configuration is invalid.
    pub fn register<C>(&mut self, name: impl Into<String>, configure: C) -> Result<&mut Self>
    where
        C: FnOnce(PipelineBuilder<E>) -> PipelineBuilder<E>,
    {
        let name = name.into();
        if self.pipelines.contains_key(&name) {
            return Err(CoreError::AlreadyExists(name));
        }

        let pipeline = configure(Pipeline::builder(name.clone())).build()?;
        info!(pipeline = %name, "Registered resilience pipeline");
        self.pipelines.insert(name, Arc::new(pipeline));
        Ok(self)
    }

    pub fn build(self) -> PipelineRegistry<E> {
        PipelineRegistry {
            pipelines: self.pipelines,
        }
    }
}

impl<E> fmt::Debug for PipelineRegistryBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.pipelines.keys().collect();
        names.sort();
        f.debug_struct("PipelineRegistryBuilder")
            .field("pipelines", &names)
            .finish()
    }
}

impl<E> Default for PipelineRegistryBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only name → pipeline lookup
pub struct PipelineRegistry<E> {
    pipelines: HashMap<String, Arc<Pipeline<E>>>,
}

impl<E> PipelineRegistry<E> {
    pub fn builder() -> PipelineRegistryBuilder<E> {
        PipelineRegistryBuilder::new()
    }

    /// Look up a pipeline.
    ///
    /// # Errors
    ///
    /// [`CoreError::PipelineNotFound`] if nothing was registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<Pipeline<E>>> {
        self.try_get(name)
            .ok_or_else(|| CoreError::PipelineNotFound(name.to_string()))
    }

    pub fn try_get(&self, name: &str) -> Option<Arc<Pipeline<E>>> {
        self.pipelines.get(name).map(Arc::clone)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl<E> fmt::Debug for PipelineRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilience_core::{CircuitBreakerConfig, RemoteError};

    #[test]
    fn test_get_returns_shared_instance() {
        let mut builder = PipelineRegistry::<RemoteError>::builder();
        builder.register("CustomPipeline", |p| p).unwrap();
        let registry = builder.build();

        let first = registry.get("CustomPipeline").unwrap();
        let second = registry.get("CustomPipeline").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "CustomPipeline");
    }

    #[test]
    fn test_unknown_pipeline_is_an_error() {
        let registry = PipelineRegistry::<RemoteError>::builder().build();

        assert!(registry.is_empty());
        assert_eq!(
            registry.get("missing").unwrap_err(),
            CoreError::PipelineNotFound("missing".to_string())
        );
        assert!(registry.try_get("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = PipelineRegistry::<RemoteError>::builder();
        builder.register("api", |p| p).unwrap();

        let err = builder.register("api", |p| p).unwrap_err();
        assert_eq!(err, CoreError::AlreadyExists("api".to_string()));
        assert_eq!(
            format!("{:?}", builder),
            r#"PipelineRegistryBuilder { pipelines: ["api"] }"#
        );
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let mut builder = PipelineRegistry::<RemoteError>::builder();
        let err = builder
            .register("api", |p| {
                p.circuit_breaker(CircuitBreakerConfig::default().with_minimum_throughput(0))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_names_sorted() {
        let mut builder = PipelineRegistry::<RemoteError>::builder();
        builder
            .register("payments", |p| p)
            .unwrap()
            .register("inventory", |p| p)
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["inventory", "payments"]);
    }
}
