//! Backend adapters over the underlying Kafka client libraries
//!
//! The pipeline talks to a backend through [`ConsumerClient`], a narrow
//! fetch/ack/flush surface. Adapters are responsible for serializing
//! access to their client: implementations either wrap a thread-safe
//! client or run the client on a dedicated owner task.

use async_trait::async_trait;

use crate::error::ConduitError;
use crate::message::ConsumeMessage;

#[cfg(feature = "kafka-rust-backend")]
pub mod kafka_rust;
#[cfg(feature = "rdkafka-backend")]
pub mod rdkafka;

/// How a backend persists consumer-group progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Each processed record is committed individually, in arrival order
    /// on the commit channel.
    PerRecord,
    /// Processed records are marked; marked offsets are flushed on the
    /// commit-interval ticker and at drain.
    MarkAndFlush,
}

/// Consumer-side operations the pipeline needs from an underlying client.
///
/// `ack` commits the record immediately under [`CommitMode::PerRecord`]
/// and marks it under [`CommitMode::MarkAndFlush`]; `flush` commits marked
/// offsets and is a no-op in per-record mode. All methods are called from
/// the pipeline's fetcher and committer tasks concurrently.
#[async_trait]
pub trait ConsumerClient: Send + Sync + 'static {
    /// The commit strategy this client supports.
    fn commit_mode(&self) -> CommitMode;

    /// Block until the broker returns one or more records.
    async fn poll(&self) -> Result<Vec<ConsumeMessage>, ConduitError>;

    /// Record that `msg` was processed.
    async fn ack(&self, msg: &ConsumeMessage) -> Result<(), ConduitError>;

    /// Flush marked offsets to the broker.
    async fn flush(&self) -> Result<(), ConduitError>;

    /// Release the underlying client. Idempotent.
    async fn close(&self) -> Result<(), ConduitError>;
}
