//! Backend adapter over the pure-Rust `kafka` crate
//!
//! The underlying client is blocking and must not be shared across tasks,
//! so each producer and consumer runs its client on a dedicated owner task
//! (`spawn_blocking`) and the async handles talk to it over a command
//! channel. Progress is committed per processed record
//! ([`CommitMode::PerRecord`]).
//!
//! Partition selection happens in the adapter, from the partition count
//! fetched at construction: a round-robin counter for `round-robin`,
//! `sticky`, and `least-bytes` (the latter two are unsupported by this
//! client and fall back); an FNV-1a key hash for `hash` and `murmur2`
//! (same key, same partition, but not Java-murmur2-compatible; use the
//! `Rdkafka` backend for cross-language partition agreement); the
//! per-message partition for `manual`.
//!
//! Limitations of this client's protocol version: record headers are
//! dropped on produce (with a one-time warning) and absent on consume, and
//! consumed records carry the receive time as their timestamp.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use kafka::client::KafkaClient;
use kafka::consumer::{Consumer as KafkaConsumer, FetchOffset, GroupOffsetStorage};
use kafka::producer::{Producer as KafkaProducer, Record, RequiredAcks};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::backend::{CommitMode, ConsumerClient};
use crate::balancer::BalancerStrategy;
use crate::config::{ConsumerConfig, ProducerConfig};
use crate::consumer::{Consumer, Handler};
use crate::error::ConduitError;
use crate::message::{ConsumeMessage, ProduceMessage};
use crate::pipeline::PipelineConsumer;
use crate::producer::Producer;

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "KafkaRust";

const OP_CHANNEL_CAPACITY: usize = 32;

/// Factory for producers and consumers over the `kafka` crate.
pub struct KafkaRustFactory;

#[async_trait]
impl crate::registry::BackendFactory for KafkaRustFactory {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn producer(&self, config: ProducerConfig) -> Result<Box<dyn Producer>, ConduitError> {
        Ok(Box::new(KafkaRustProducer::new(config).await?))
    }

    async fn consumer(
        &self,
        config: ConsumerConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Box<dyn Consumer>, ConduitError> {
        let dlq = if config.dlq.enabled {
            let producer_config =
                ProducerConfig::builder(config.brokers.clone(), config.dlq.topic.clone()).build()?;
            Some(Box::new(KafkaRustProducer::new(producer_config).await?) as Box<dyn Producer>)
        } else {
            None
        };

        let retry = if let Some(topic) = &config.retry.retry_topic {
            let producer_config =
                ProducerConfig::builder(config.brokers.clone(), topic.clone()).build()?;
            Some(Box::new(KafkaRustProducer::new(producer_config).await?) as Box<dyn Producer>)
        } else {
            None
        };

        let client = KafkaRustConsumerClient::new(config.clone()).await?;
        Ok(Box::new(PipelineConsumer::new(
            config, handler, client, dlq, retry,
        )))
    }
}

fn backend_err(e: kafka::error::Error) -> ConduitError {
    ConduitError::backend(e.to_string())
}

/// FNV-1a hash of the record key, reduced to a partition index.
fn partition_for_key(key: &[u8], partitions: i32) -> i32 {
    let mut hash: u32 = 2166136261;
    for byte in key {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    (hash % partitions as u32) as i32
}

fn next_round_robin(counter: &mut u64, partitions: i32) -> i32 {
    let partition = (*counter % partitions as u64) as i32;
    *counter += 1;
    partition
}

fn select_partition(
    balancer: BalancerStrategy,
    msg: &ProduceMessage,
    partitions: i32,
    counter: &mut u64,
) -> i32 {
    match balancer {
        BalancerStrategy::Manual => msg
            .partition
            .filter(|p| (0..partitions).contains(p))
            .unwrap_or_else(|| next_round_robin(counter, partitions)),
        BalancerStrategy::Hash | BalancerStrategy::Murmur2 => match msg.key.as_deref() {
            Some(key) if !key.is_empty() => partition_for_key(key, partitions),
            _ => next_round_robin(counter, partitions),
        },
        BalancerStrategy::RoundRobin
        | BalancerStrategy::Sticky
        | BalancerStrategy::LeastBytes => next_round_robin(counter, partitions),
    }
}

enum ProducerOp {
    Send {
        msg: ProduceMessage,
        reply: oneshot::Sender<Result<(), ConduitError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), ConduitError>>,
    },
}

/// Producer handle; the blocking client lives on the owner task.
pub struct KafkaRustProducer {
    config: ProducerConfig,
    ops: mpsc::Sender<ProducerOp>,
    closed: AtomicBool,
}

impl KafkaRustProducer {
    pub async fn new(config: ProducerConfig) -> Result<Self, ConduitError> {
        let (ops_tx, ops_rx) = mpsc::channel(OP_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        let owner_config = config.clone();
        tokio::task::spawn_blocking(move || producer_owner(owner_config, ops_rx, ready_tx));

        ready_rx
            .await
            .map_err(|_| ConduitError::producer("producer owner task did not start"))??;
        debug!(topic = %config.topic, balancer = %config.balancer, "kafka-rust producer created");

        Ok(Self {
            config,
            ops: ops_tx,
            closed: AtomicBool::new(false),
        })
    }

    async fn dispatch(ops: &mpsc::Sender<ProducerOp>, msg: ProduceMessage) -> Result<(), ConduitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        ops.send(ProducerOp::Send {
            msg,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ConduitError::ProducerClosed)?;
        reply_rx
            .await
            .map_err(|_| ConduitError::producer("producer owner task exited"))?
    }
}

#[async_trait]
impl Producer for KafkaRustProducer {
    async fn send(&self, msg: ProduceMessage) -> Result<(), ConduitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConduitError::ProducerClosed);
        }

        if self.config.async_send {
            let ops = self.ops.clone();
            let topic = self.config.topic.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::dispatch(&ops, msg).await {
                    error!(topic = %topic, error = %e, "async produce failed");
                }
            });
            return Ok(());
        }

        Self::dispatch(&self.ops, msg).await
    }

    async fn close(&self) -> Result<(), ConduitError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .ops
            .send(ProducerOp::Close { reply: reply_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }
}

/// Owner loop for the blocking producer client.
fn producer_owner(
    config: ProducerConfig,
    mut ops: mpsc::Receiver<ProducerOp>,
    ready: oneshot::Sender<Result<(), ConduitError>>,
) {
    let mut client = KafkaClient::new(config.brokers.clone());
    if let Err(e) = client.load_metadata(&[config.topic.as_str()]) {
        let _ = ready.send(Err(backend_err(e)));
        return;
    }
    let partitions = client
        .topics()
        .partitions(&config.topic)
        .map(|p| p.len())
        .unwrap_or(0) as i32;
    if partitions == 0 {
        let _ = ready.send(Err(ConduitError::backend(format!(
            "topic '{}' has no partitions",
            config.topic
        ))));
        return;
    }

    let producer = KafkaProducer::from_client(client)
        .with_ack_timeout(config.send_timeout)
        .with_required_acks(RequiredAcks::One)
        .create();
    let mut producer = match producer {
        Ok(p) => {
            let _ = ready.send(Ok(()));
            p
        }
        Err(e) => {
            let _ = ready.send(Err(backend_err(e)));
            return;
        }
    };

    let mut round_robin: u64 = 0;
    let mut warned_headers = false;

    while let Some(op) = ops.blocking_recv() {
        match op {
            ProducerOp::Send { msg, reply } => {
                if !msg.headers.is_empty() && !warned_headers {
                    warn!(
                        topic = %config.topic,
                        "record headers are not supported by this backend and were dropped"
                    );
                    warned_headers = true;
                }
                let partition = select_partition(config.balancer, &msg, partitions, &mut round_robin);
                let _ = reply.send(send_record(&mut producer, &config.topic, &msg, partition));
            }
            ProducerOp::Close { reply } => {
                let _ = reply.send(Ok(()));
                break;
            }
        }
    }
    debug!(topic = %config.topic, "kafka-rust producer owner exited");
}

fn send_record(
    producer: &mut KafkaProducer,
    topic: &str,
    msg: &ProduceMessage,
    partition: i32,
) -> Result<(), ConduitError> {
    let result = match msg.key.as_deref() {
        Some(key) => producer.send(
            &Record::from_key_value(topic, key, msg.value.as_ref()).with_partition(partition),
        ),
        None => {
            producer.send(&Record::from_value(topic, msg.value.as_ref()).with_partition(partition))
        }
    };
    result.map_err(|e| ConduitError::producer(e.to_string()))
}

enum ConsumerOp {
    Poll(oneshot::Sender<Result<Vec<ConsumeMessage>, ConduitError>>),
    Ack {
        topic: String,
        partition: i32,
        offset: i64,
        reply: oneshot::Sender<Result<(), ConduitError>>,
    },
    Close(oneshot::Sender<()>),
}

/// Consumer-client handle; the blocking client lives on the owner task.
pub struct KafkaRustConsumerClient {
    ops: mpsc::Sender<ConsumerOp>,
    closed: AtomicBool,
}

impl KafkaRustConsumerClient {
    pub async fn new(config: ConsumerConfig) -> Result<Self, ConduitError> {
        let (ops_tx, ops_rx) = mpsc::channel(OP_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || consumer_owner(config, ops_rx, ready_tx));

        ready_rx
            .await
            .map_err(|_| ConduitError::consumer("consumer owner task did not start"))??;

        Ok(Self {
            ops: ops_tx,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ConsumerClient for KafkaRustConsumerClient {
    fn commit_mode(&self) -> CommitMode {
        CommitMode::PerRecord
    }

    async fn poll(&self) -> Result<Vec<ConsumeMessage>, ConduitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops
            .send(ConsumerOp::Poll(reply_tx))
            .await
            .map_err(|_| ConduitError::consumer("consumer is closed"))?;
        reply_rx
            .await
            .map_err(|_| ConduitError::consumer("consumer owner task exited"))?
    }

    async fn ack(&self, msg: &ConsumeMessage) -> Result<(), ConduitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops
            .send(ConsumerOp::Ack {
                topic: msg.topic.clone(),
                partition: msg.partition,
                offset: msg.offset,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ConduitError::consumer("consumer is closed"))?;
        reply_rx
            .await
            .map_err(|_| ConduitError::consumer("consumer owner task exited"))?
    }

    async fn flush(&self) -> Result<(), ConduitError> {
        // Per-record commits leave nothing to flush.
        Ok(())
    }

    async fn close(&self) -> Result<(), ConduitError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.ops.send(ConsumerOp::Close(reply_tx)).await.is_err() {
            return Ok(());
        }
        let _ = reply_rx.await;
        Ok(())
    }
}

/// Owner loop for the blocking consumer client.
fn consumer_owner(
    config: ConsumerConfig,
    mut ops: mpsc::Receiver<ConsumerOp>,
    ready: oneshot::Sender<Result<(), ConduitError>>,
) {
    let consumer = KafkaConsumer::from_hosts(config.brokers.clone())
        .with_topic(config.topic.clone())
        .with_group(config.group_id.clone())
        .with_fallback_offset(FetchOffset::Earliest)
        .with_offset_storage(Some(GroupOffsetStorage::Kafka))
        .create();
    let mut consumer = match consumer {
        Ok(c) => {
            let _ = ready.send(Ok(()));
            c
        }
        Err(e) => {
            let _ = ready.send(Err(backend_err(e)));
            return;
        }
    };
    info!(topic = %config.topic, group = %config.group_id, "kafka-rust consumer joined group");

    while let Some(op) = ops.blocking_recv() {
        match op {
            ConsumerOp::Poll(reply) => {
                let _ = reply.send(poll_once(&mut consumer));
            }
            ConsumerOp::Ack {
                topic,
                partition,
                offset,
                reply,
            } => {
                let result = match consumer.consume_message(&topic, partition, offset) {
                    Ok(()) => consumer.commit_consumed().map_err(backend_err),
                    Err(e) => Err(backend_err(e)),
                };
                let _ = reply.send(result);
            }
            ConsumerOp::Close(reply) => {
                let _ = reply.send(());
                break;
            }
        }
    }
    debug!(topic = %config.topic, "kafka-rust consumer owner exited");
}

fn poll_once(consumer: &mut KafkaConsumer) -> Result<Vec<ConsumeMessage>, ConduitError> {
    let sets = consumer.poll().map_err(backend_err)?;
    let mut records = Vec::new();
    for ms in sets.iter() {
        for m in ms.messages() {
            records.push(ConsumeMessage {
                topic: ms.topic().to_string(),
                partition: ms.partition(),
                offset: m.offset,
                timestamp: Utc::now(),
                key: if m.key.is_empty() {
                    None
                } else {
                    Some(Bytes::copy_from_slice(m.key))
                },
                value: Bytes::copy_from_slice(m.value),
                headers: Vec::new(),
            });
        }
    }
    Ok(records)
}
