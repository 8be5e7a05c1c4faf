//! # kafka-conduit
//!
//! A backend-agnostic Kafka producer/consumer runtime: records are
//! delivered from the broker to application handlers with bounded
//! concurrency, exponential backoff retry, dead-letter-queue routing, and
//! at-least-once offset commits. Two underlying client libraries are
//! hidden behind one contract and selected by name from a
//! [`BackendRegistry`].
//!
//! ## Features
//!
//! - **At-least-once**: an offset is committed only after its handler has
//!   terminated (success, exhaustion, or non-retryable failure)
//! - **Bounded concurrency**: a fixed worker pool with channel
//!   backpressure toward the broker fetch loop
//! - **Retry ladder**: exponential backoff with a cap, a non-retryable
//!   shortcut predicate, and an optional raw retry topic
//! - **DLQ envelopes**: failed records are wrapped in JSON with
//!   allowlist-redacted headers
//! - **Graceful drain**: ordered shutdown that finishes in-flight
//!   handlers and flushes pending commits
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use kafka_conduit::{
//!     handler_fn, BackendFactory as _, BackendRegistry, Consumer as _, ConsumerConfig,
//!     ProduceMessage, Producer as _, ProducerConfig, Result,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = BackendRegistry::with_builtin();
//!     let factory = registry.get("Rdkafka")?;
//!
//!     let config = ProducerConfig::builder(vec!["localhost:9092"], "orders").build()?;
//!     let producer = factory.producer(config).await?;
//!     producer
//!         .send(ProduceMessage::new("hello").with_key("user-1"))
//!         .await?;
//!     producer.close().await?;
//!
//!     let config = ConsumerConfig::builder(vec!["localhost:9092"], "orders", "billing")
//!         .max_concurrent(4)
//!         .dlq("orders-dlq", true)
//!         .header_allowlist(vec!["trace-id"])
//!         .build()?;
//!     let handler = Arc::new(handler_fn(|msg| async move {
//!         println!("processing offset {}", msg.offset);
//!         Ok(())
//!     }));
//!     let mut consumer = factory.consumer(config, handler).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     consumer.start(shutdown.clone()).await?;
//!     // ... run until shutdown ...
//!     consumer.close(Duration::from_secs(30)).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod balancer;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod producer;
pub mod registry;

pub use balancer::BalancerStrategy;
pub use config::{
    ConsumerConfig, ConsumerConfigBuilder, DlqConfig, NonRetryablePredicate, ProducerConfig,
    ProducerConfigBuilder, RetryPolicy,
};
pub use consumer::{handler_fn, Consumer, FnHandler, Handler};
pub use error::{ConduitError, HandlerError};
pub use message::{ConsumeMessage, Header, ProduceMessage};
pub use pipeline::PipelineConsumer;
pub use producer::Producer;
pub use registry::{BackendFactory, BackendRegistry};

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
