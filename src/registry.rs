//! Backend factories and the explicit backend registry
//!
//! Backends are registered explicitly at startup (no global mutable state):
//! build a [`BackendRegistry`] once, register factories, then treat it as
//! read-only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConsumerConfig, ProducerConfig};
use crate::consumer::{Consumer, Handler};
use crate::error::ConduitError;
use crate::producer::Producer;

/// Constructs producers and consumers over one underlying client library.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Identifier the factory is registered under, e.g. `"Rdkafka"`.
    fn name(&self) -> &'static str;

    /// Construct a producer for `config.topic`.
    async fn producer(&self, config: ProducerConfig) -> Result<Box<dyn Producer>, ConduitError>;

    /// Construct a consumer delivering records to `handler`.
    async fn consumer(
        &self,
        config: ConsumerConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Box<dyn Consumer>, ConduitError>;
}

impl std::fmt::Debug for dyn BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory").field("name", &self.name()).finish()
    }
}

/// Name-to-factory catalog.
///
/// ```
/// use kafka_conduit::BackendRegistry;
///
/// let registry = BackendRegistry::with_builtin();
/// assert!(registry.get("NoSuchBackend").is_err());
/// ```
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<&'static str, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every backend compiled into this build.
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "rdkafka-backend")]
        registry.register(Arc::new(crate::backend::rdkafka::RdkafkaFactory));
        #[cfg(feature = "kafka-rust-backend")]
        registry.register(Arc::new(crate::backend::kafka_rust::KafkaRustFactory));
        registry
    }

    /// Register a factory under its own name, replacing any previous entry.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(factory.name(), factory);
    }

    /// Look up a factory by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn BackendFactory>, ConduitError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| ConduitError::BackendNotFound {
                name: name.to_string(),
            })
    }

    /// Names of all registered backends, unordered.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
