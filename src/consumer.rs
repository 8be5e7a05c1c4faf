//! Consumer contract and record handlers

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ConduitError, HandlerError};
use crate::message::ConsumeMessage;

/// Application callback invoked once per fetched record.
///
/// Returning `Err` triggers the retry ladder; see
/// [`RetryPolicy`](crate::config::RetryPolicy).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, msg: ConsumeMessage) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`Handler`].
///
/// ```
/// use kafka_conduit::handler_fn;
///
/// let handler = handler_fn(|msg| async move {
///     println!("got {} bytes", msg.value.len());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ConsumeMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler(f)
}

/// See [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(ConsumeMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, msg: ConsumeMessage) -> Result<(), HandlerError> {
        (self.0)(msg).await
    }
}

/// Consumes records from a topic on behalf of a consumer group.
#[async_trait]
pub trait Consumer: Send {
    /// Begin consumption.
    ///
    /// Returns immediately; records are fetched and dispatched by
    /// background tasks until `shutdown` is cancelled or `close` is
    /// called. Fails if the consumer was already started. No per-record
    /// error escapes this call; failures surface through the logger.
    async fn start(&mut self, shutdown: CancellationToken) -> Result<(), ConduitError>;

    /// Drain in-flight handlers and release all resources.
    ///
    /// Waits up to `timeout` for the drain; on expiry the underlying
    /// client is still closed and a
    /// [`ShutdownIncomplete`](ConduitError::ShutdownIncomplete) error is
    /// returned. Idempotent.
    async fn close(&mut self, timeout: Duration) -> Result<(), ConduitError>;
}
