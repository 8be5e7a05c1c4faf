//! Backend adapter over `rdkafka` (librdkafka bindings)
//!
//! Consumption uses a `StreamConsumer` with auto-commit disabled; progress
//! is tracked in an adapter-held marked-offset map and flushed
//! asynchronously on the commit interval ([`CommitMode::MarkAndFlush`]).
//! Production uses a `FutureProducer`; librdkafka's own partitioners back
//! the balancer strategies:
//!
//! | strategy    | librdkafka partitioner                  |
//! |-------------|-----------------------------------------|
//! | round-robin | `random`                                |
//! | hash        | `consistent_random`                     |
//! | murmur2     | `murmur2_random` (Java-compatible)      |
//! | sticky      | `random` (unsupported, fallback)        |
//! | least-bytes | `random` (unsupported, fallback)        |
//! | manual      | per-message partition, else `random`    |

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode as RdCommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::{Header as RdHeader, Headers as _, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, error, info};

use crate::backend::{CommitMode, ConsumerClient};
use crate::balancer::BalancerStrategy;
use crate::config::{ConsumerConfig, ProducerConfig};
use crate::consumer::{Consumer, Handler};
use crate::error::ConduitError;
use crate::message::{ConsumeMessage, Header, ProduceMessage};
use crate::pipeline::PipelineConsumer;
use crate::producer::Producer;

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "Rdkafka";

/// Factory for producers and consumers over librdkafka.
pub struct RdkafkaFactory;

#[async_trait]
impl crate::registry::BackendFactory for RdkafkaFactory {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn producer(&self, config: ProducerConfig) -> Result<Box<dyn Producer>, ConduitError> {
        Ok(Box::new(RdkafkaProducer::new(config)?))
    }

    async fn consumer(
        &self,
        config: ConsumerConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Box<dyn Consumer>, ConduitError> {
        let dlq = if config.dlq.enabled {
            let producer_config =
                ProducerConfig::builder(config.brokers.clone(), config.dlq.topic.clone()).build()?;
            Some(Box::new(RdkafkaProducer::new(producer_config)?) as Box<dyn Producer>)
        } else {
            None
        };

        let retry = if let Some(topic) = &config.retry.retry_topic {
            let producer_config =
                ProducerConfig::builder(config.brokers.clone(), topic.clone()).build()?;
            Some(Box::new(RdkafkaProducer::new(producer_config)?) as Box<dyn Producer>)
        } else {
            None
        };

        let client = RdkafkaConsumerClient::new(&config)?;
        Ok(Box::new(PipelineConsumer::new(
            config, handler, client, dlq, retry,
        )))
    }
}

/// The librdkafka partitioner backing a balancer strategy.
fn partitioner_for(balancer: BalancerStrategy) -> &'static str {
    match balancer {
        BalancerStrategy::Hash => "consistent_random",
        BalancerStrategy::Murmur2 => "murmur2_random",
        BalancerStrategy::RoundRobin
        | BalancerStrategy::Sticky
        | BalancerStrategy::LeastBytes
        | BalancerStrategy::Manual => "random",
    }
}

fn backend_err(e: rdkafka::error::KafkaError) -> ConduitError {
    ConduitError::backend(e.to_string())
}

/// Producer over `FutureProducer`.
pub struct RdkafkaProducer {
    config: ProducerConfig,
    inner: FutureProducer,
    closed: AtomicBool,
}

impl RdkafkaProducer {
    pub fn new(config: ProducerConfig) -> Result<Self, ConduitError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.brokers.join(","))
            .set("partitioner", partitioner_for(config.balancer))
            .set(
                "message.timeout.ms",
                config.send_timeout.as_millis().to_string(),
            );
        if let Some(client_id) = &config.client_id {
            client_config.set("client.id", client_id);
        }

        let inner: FutureProducer = client_config.create().map_err(backend_err)?;
        debug!(topic = %config.topic, balancer = %config.balancer, "rdkafka producer created");

        Ok(Self {
            config,
            inner,
            closed: AtomicBool::new(false),
        })
    }
}

/// Build the record from owned data and await broker acknowledgment.
async fn deliver(
    producer: FutureProducer,
    topic: String,
    msg: ProduceMessage,
    queue_timeout: Duration,
) -> Result<(), ConduitError> {
    let mut headers = OwnedHeaders::new();
    for h in &msg.headers {
        headers = headers.insert(RdHeader {
            key: &h.key,
            value: Some(h.value.as_ref()),
        });
    }

    let mut record: FutureRecord<'_, [u8], [u8]> =
        FutureRecord::to(&topic).payload(msg.value.as_ref()).headers(headers);
    if let Some(key) = msg.key.as_deref() {
        record = record.key(key);
    }
    if let Some(partition) = msg.partition {
        record = record.partition(partition);
    }

    producer
        .send(record, queue_timeout)
        .await
        .map(|_| ())
        .map_err(|(e, _)| ConduitError::producer(e.to_string()))
}

#[async_trait]
impl Producer for RdkafkaProducer {
    async fn send(&self, msg: ProduceMessage) -> Result<(), ConduitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConduitError::ProducerClosed);
        }

        if self.config.async_send {
            let producer = self.inner.clone();
            let topic = self.config.topic.clone();
            let queue_timeout = self.config.send_timeout;
            tokio::spawn(async move {
                if let Err(e) = deliver(producer, topic.clone(), msg, queue_timeout).await {
                    error!(topic = %topic, error = %e, "async produce failed");
                }
            });
            return Ok(());
        }

        deliver(
            self.inner.clone(),
            self.config.topic.clone(),
            msg,
            self.config.send_timeout,
        )
        .await
    }

    async fn close(&self) -> Result<(), ConduitError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let producer = self.inner.clone();
        let timeout = self.config.send_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| ConduitError::producer(format!("flush task failed: {e}")))?
            .map_err(backend_err)
    }
}

/// Consumer client over `StreamConsumer` with manual offset management.
pub struct RdkafkaConsumerClient {
    inner: StreamConsumer,
    /// Next-to-consume offset per partition, pending flush.
    marked: Mutex<HashMap<(String, i32), i64>>,
    closed: AtomicBool,
}

impl RdkafkaConsumerClient {
    pub fn new(config: &ConsumerConfig) -> Result<Self, ConduitError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(backend_err)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(backend_err)?;
        info!(topic = %config.topic, group = %config.group_id, "rdkafka consumer subscribed");

        Ok(Self {
            inner: consumer,
            marked: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ConsumerClient for RdkafkaConsumerClient {
    fn commit_mode(&self) -> CommitMode {
        CommitMode::MarkAndFlush
    }

    async fn poll(&self) -> Result<Vec<ConsumeMessage>, ConduitError> {
        let msg = self.inner.recv().await.map_err(backend_err)?;

        let headers = msg
            .headers()
            .map(|hs| {
                hs.iter()
                    .map(|h| Header::new(h.key, h.value.unwrap_or_default().to_vec()))
                    .collect()
            })
            .unwrap_or_default();

        let timestamp = msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(vec![ConsumeMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp,
            key: msg.key().map(|k| k.to_vec().into()),
            value: msg.payload().unwrap_or_default().to_vec().into(),
            headers,
        }])
    }

    async fn ack(&self, msg: &ConsumeMessage) -> Result<(), ConduitError> {
        let mut marked = self.marked.lock();
        let next = marked
            .entry((msg.topic.clone(), msg.partition))
            .or_insert(0);
        // The committed offset is the next offset to fetch. Workers may
        // complete out of order; never move the mark backwards.
        *next = (*next).max(msg.offset + 1);
        Ok(())
    }

    async fn flush(&self) -> Result<(), ConduitError> {
        // Snapshot rather than drain: on a failed commit the marks must
        // stay in place for the next flush.
        let pending: Vec<((String, i32), i64)> = {
            let marked = self.marked.lock();
            marked.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        if pending.is_empty() {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::new();
        for ((topic, partition), next) in &pending {
            offsets
                .add_partition_offset(topic, *partition, Offset::Offset(*next))
                .map_err(backend_err)?;
        }

        self.inner
            .commit(&offsets, RdCommitMode::Async)
            .map_err(backend_err)?;

        // Clear only what this commit covered; a mark that advanced past
        // the snapshot still needs a future flush.
        let mut marked = self.marked.lock();
        for (key, next) in pending {
            if marked.get(&key) == Some(&next) {
                marked.remove(&key);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ConduitError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.unsubscribe();
        debug!("rdkafka consumer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioner_mapping() {
        assert_eq!(partitioner_for(BalancerStrategy::Hash), "consistent_random");
        assert_eq!(partitioner_for(BalancerStrategy::Murmur2), "murmur2_random");
        assert_eq!(partitioner_for(BalancerStrategy::RoundRobin), "random");
        // Unsupported strategies fall back to the round-robin equivalent.
        assert_eq!(partitioner_for(BalancerStrategy::Sticky), "random");
        assert_eq!(partitioner_for(BalancerStrategy::LeastBytes), "random");
        assert_eq!(partitioner_for(BalancerStrategy::Manual), "random");
    }
}
