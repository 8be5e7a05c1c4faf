//! Consumer execution pipeline
//!
//! One fetcher polls the backend and pushes records into a bounded channel
//! of capacity `2 × max_concurrent` (the backpressure point). A fixed pool
//! of `max_concurrent` workers drains it, driving each record through the
//! retry ladder, DLQ routing, and on to the commit coordinator. Shutdown is
//! a channel-closure cascade: the fetcher exits and drops the input sender,
//! workers drain what is queued and drop their commit senders, the
//! committer flushes and exits, then side producers and the client close.

mod commit;
mod dlq;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::ConsumerClient;
use crate::config::ConsumerConfig;
use crate::consumer::{Consumer, Handler};
use crate::error::ConduitError;
use crate::message::{ConsumeMessage, ProduceMessage};
use crate::producer::Producer;
use self::retry::RetryOutcome;

/// Backend-agnostic consumer runtime.
///
/// Owns its side producers (DLQ and retry topic); they are closed during
/// the drain and never reference the consumer back. `start` returns
/// immediately and consumption proceeds in background tasks.
pub struct PipelineConsumer<C: ConsumerClient> {
    config: ConsumerConfig,
    handler: Arc<dyn Handler>,
    client: Arc<C>,
    dlq: Option<Arc<dyn Producer>>,
    retry: Option<Arc<dyn Producer>>,
    /// Graceful signal: stop fetching, drain queued records in full.
    stop: CancellationToken,
    /// Hard signal: interrupt backoff sleeps and side-producer sends.
    cancel: CancellationToken,
    pipeline: Option<JoinHandle<Vec<ConduitError>>>,
}

/// State shared by the worker pool.
struct WorkerShared {
    config: ConsumerConfig,
    handler: Arc<dyn Handler>,
    dlq: Option<Arc<dyn Producer>>,
    retry: Option<Arc<dyn Producer>>,
    cancel: CancellationToken,
}

impl<C: ConsumerClient> PipelineConsumer<C> {
    /// Assemble a pipeline over a backend client and optional side
    /// producers. `config` is assumed validated by its builder.
    pub fn new(
        config: ConsumerConfig,
        handler: Arc<dyn Handler>,
        client: C,
        dlq: Option<Box<dyn Producer>>,
        retry: Option<Box<dyn Producer>>,
    ) -> Self {
        Self {
            config,
            handler,
            client: Arc::new(client),
            dlq: dlq.map(Arc::from),
            retry: retry.map(Arc::from),
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
            pipeline: None,
        }
    }
}

#[async_trait]
impl<C: ConsumerClient> Consumer for PipelineConsumer<C> {
    async fn start(&mut self, shutdown: CancellationToken) -> Result<(), ConduitError> {
        if self.pipeline.is_some() {
            return Err(ConduitError::consumer("consumer already started"));
        }

        self.stop = CancellationToken::new();
        self.cancel = shutdown.child_token();

        let handle = tokio::spawn(run_pipeline(
            self.config.clone(),
            self.handler.clone(),
            self.client.clone(),
            self.dlq.clone(),
            self.retry.clone(),
            self.stop.clone(),
            self.cancel.clone(),
        ));
        self.pipeline = Some(handle);

        info!(
            topic = %self.config.topic,
            group = %self.config.group_id,
            workers = self.config.max_concurrent,
            "consumer started"
        );
        Ok(())
    }

    async fn close(&mut self, timeout: Duration) -> Result<(), ConduitError> {
        let Some(pipeline) = self.pipeline.take() else {
            return Ok(());
        };

        self.stop.cancel();

        match tokio::time::timeout(timeout, pipeline).await {
            Ok(Ok(errors)) => ConduitError::join(errors),
            Ok(Err(join_err)) => Err(ConduitError::consumer(format!(
                "pipeline task failed: {join_err}"
            ))),
            Err(_) => {
                // Deadline expired mid-drain: abort sleeps and sends, and
                // close the client directly so sockets are released even
                // though the drain is still unwinding.
                self.cancel.cancel();
                if let Err(e) = self.client.close().await {
                    error!(error = %e, "client close after drain deadline failed");
                }
                Err(ConduitError::ShutdownIncomplete {
                    message: format!("drain did not finish within {timeout:?}"),
                })
            }
        }
    }
}

/// Supervisor body: spawns the committer and workers, runs the fetch loop
/// inline, then unwinds in drain order. Returns the sub-close errors.
async fn run_pipeline<C: ConsumerClient>(
    config: ConsumerConfig,
    handler: Arc<dyn Handler>,
    client: Arc<C>,
    dlq: Option<Arc<dyn Producer>>,
    retry: Option<Arc<dyn Producer>>,
    stop: CancellationToken,
    cancel: CancellationToken,
) -> Vec<ConduitError> {
    let worker_count = config.max_concurrent;
    let buffer = worker_count * 2;

    let (msg_tx, msg_rx) = mpsc::channel::<ConsumeMessage>(buffer);
    let (commit_tx, commit_rx) = mpsc::channel::<ConsumeMessage>(buffer);
    let msg_rx = Arc::new(Mutex::new(msg_rx));

    let committer = tokio::spawn(commit::run_committer(
        client.clone(),
        commit_rx,
        config.commit_interval,
    ));

    let shared = Arc::new(WorkerShared {
        config,
        handler,
        dlq: dlq.clone(),
        retry: retry.clone(),
        cancel: cancel.clone(),
    });

    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        workers.push(tokio::spawn(worker_loop(
            worker_id,
            shared.clone(),
            msg_rx.clone(),
            commit_tx.clone(),
        )));
    }
    drop(commit_tx);

    fetch_loop(client.as_ref(), msg_tx, &stop, &cancel).await;

    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            error!(error = %e, "worker task panicked");
        }
    }
    if let Err(e) = committer.await {
        error!(error = %e, "commit task panicked");
    }

    let mut errors = Vec::new();
    if let Some(dlq) = &dlq {
        if let Err(e) = dlq.close().await {
            errors.push(e);
        }
    }
    if let Some(retry) = &retry {
        if let Err(e) = retry.close().await {
            errors.push(e);
        }
    }
    if let Err(e) = client.close().await {
        errors.push(e);
    }

    info!("consumer pipeline stopped");
    errors
}

/// Poll the backend and feed the worker-input channel.
///
/// Only does work in response to a delivered record or a cancellation;
/// there is no busy branch. Poll errors are logged and polling continues;
/// transient network or rebalance errors must not kill the consumer.
async fn fetch_loop<C: ConsumerClient>(
    client: &C,
    msg_tx: mpsc::Sender<ConsumeMessage>,
    stop: &CancellationToken,
    cancel: &CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = stop.cancelled() => break,
            _ = cancel.cancelled() => break,
            polled = client.poll() => match polled {
                Ok(batch) => batch,
                Err(e) => {
                    if stop.is_cancelled() || cancel.is_cancelled() {
                        break;
                    }
                    error!(error = %e, "fetch error");
                    continue;
                }
            },
        };

        for msg in batch {
            // A graceful stop still delivers the already-fetched batch;
            // only the hard signal abandons it.
            tokio::select! {
                sent = msg_tx.send(msg) => {
                    if sent.is_err() {
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
    debug!("fetch loop exited");
}

/// Dequeue records, drive them to a terminal state, and forward processed
/// records to the commit coordinator.
async fn worker_loop(
    worker_id: usize,
    shared: Arc<WorkerShared>,
    msg_rx: Arc<Mutex<mpsc::Receiver<ConsumeMessage>>>,
    commit_tx: mpsc::Sender<ConsumeMessage>,
) {
    loop {
        let msg = {
            let mut rx = msg_rx.lock().await;
            rx.recv().await
        };
        let Some(msg) = msg else { break };

        if shared.cancel.is_cancelled() {
            // Abandoned records are redelivered on the next session.
            break;
        }

        let outcome = retry::run_with_retry(
            shared.handler.as_ref(),
            &msg,
            &shared.config.retry,
            &shared.cancel,
        )
        .await;

        match outcome {
            RetryOutcome::Success => {}
            RetryOutcome::NonRetryable(err) => {
                warn!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %err,
                    "non-retryable handler error"
                );
                dlq::dispatch(
                    shared.dlq.as_deref(),
                    &shared.config,
                    &msg,
                    &err.to_string(),
                    &shared.cancel,
                )
                .await;
            }
            RetryOutcome::Exhausted(err) => {
                warn!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    attempts = shared.config.retry.max_attempts,
                    error = %err,
                    "retry attempts exhausted"
                );
                if let Some(retry_producer) = &shared.retry {
                    let mut raw = ProduceMessage::new(msg.value.clone());
                    if let Some(key) = &msg.key {
                        raw = raw.with_key(key.clone());
                    }
                    dlq::send_bounded(
                        retry_producer.as_ref(),
                        raw,
                        shared.config.producer_send_timeout,
                        &shared.cancel,
                        "retry topic",
                    )
                    .await;
                }
                dlq::dispatch(
                    shared.dlq.as_deref(),
                    &shared.config,
                    &msg,
                    &err.to_string(),
                    &shared.cancel,
                )
                .await;
            }
            RetryOutcome::Cancelled => {
                debug!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "cancelled mid-record; offset not committed"
                );
                break;
            }
        }

        tokio::select! {
            sent = commit_tx.send(msg) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = shared.cancel.cancelled() => break,
        }
    }
    debug!(worker_id, "worker exited");
}
