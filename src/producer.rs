//! Producer contract

use async_trait::async_trait;

use crate::error::ConduitError;
use crate::message::ProduceMessage;

/// Publishes records to a single topic.
///
/// Implementations may be asynchronous: `send` returning `Ok` does not
/// guarantee broker acknowledgment when the producer was configured with
/// [`async_send`](crate::config::ProducerConfig::async_send); delivery
/// failures are then reported through the logger.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Publish one record.
    ///
    /// Fails with [`ConduitError::ProducerClosed`] after `close`.
    async fn send(&self, msg: ProduceMessage) -> Result<(), ConduitError>;

    /// Flush in-flight records and release resources. Idempotent.
    async fn close(&self) -> Result<(), ConduitError>;
}
