//! Configuration types for producers and consumers
//!
//! Options are plain config structs with defaults and validating builders.
//! Invalid combinations (empty brokers, DLQ enabled without a topic, a
//! backoff floor above its ceiling) are rejected synchronously by
//! [`build`](ConsumerConfigBuilder::build).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::balancer::BalancerStrategy;
use crate::error::{ConduitError, HandlerError};

/// Predicate marking handler errors as permanent, bypassing the retry ladder.
pub type NonRetryablePredicate = Arc<dyn Fn(&HandlerError) -> bool + Send + Sync>;

/// Retry ladder applied to failing handler invocations.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum handler invocations per record, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the growing delay.
    pub max_backoff: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
    /// Errors matching this predicate skip the remaining attempts.
    pub non_retryable: Option<NonRetryablePredicate>,
    /// When set, records that exhaust their attempts are forwarded raw
    /// (original key and value) to this topic before DLQ routing.
    pub retry_topic: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            non_retryable: None,
            retry_topic: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("multiplier", &self.multiplier)
            .field("non_retryable", &self.non_retryable.is_some())
            .field("retry_topic", &self.retry_topic)
            .finish()
    }
}

/// Dead-letter-queue routing for records the handler could not process.
#[derive(Debug, Clone, Default)]
pub struct DlqConfig {
    pub enabled: bool,
    pub topic: String,
    /// Carry the original record's key on the DLQ envelope record.
    pub key_from_original: bool,
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Bootstrap broker addresses
    pub brokers: Vec<String>,
    /// Topic to consume from
    pub topic: String,
    /// Consumer group id
    pub group_id: String,
    /// Number of concurrent handler invocations
    pub max_concurrent: usize,
    /// Flush cadence for backends that commit marked offsets periodically
    pub commit_interval: Duration,
    /// Header names forwarded unredacted into DLQ envelopes
    pub header_allowlist: HashSet<String>,
    /// Retry ladder
    pub retry: RetryPolicy,
    /// DLQ routing
    pub dlq: DlqConfig,
    /// Upper bound on individual DLQ/retry-topic sends so a stuck side
    /// broker cannot freeze a worker
    pub producer_send_timeout: Duration,
}

impl ConsumerConfig {
    /// Start building a consumer configuration.
    pub fn builder<B, T, G>(brokers: Vec<B>, topic: T, group_id: G) -> ConsumerConfigBuilder
    where
        B: Into<String>,
        T: Into<String>,
        G: Into<String>,
    {
        ConsumerConfigBuilder::new(brokers, topic, group_id)
    }
}

/// Builder for [`ConsumerConfig`]
#[derive(Debug)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn new<B, T, G>(brokers: Vec<B>, topic: T, group_id: G) -> Self
    where
        B: Into<String>,
        T: Into<String>,
        G: Into<String>,
    {
        Self {
            config: ConsumerConfig {
                brokers: brokers.into_iter().map(|b| b.into()).collect(),
                topic: topic.into(),
                group_id: group_id.into(),
                max_concurrent: 1,
                commit_interval: Duration::from_millis(500),
                header_allowlist: HashSet::new(),
                retry: RetryPolicy::default(),
                dlq: DlqConfig::default(),
                producer_send_timeout: Duration::from_secs(5),
            },
        }
    }

    /// Route terminally failed records to `topic`, optionally carrying the
    /// original record key.
    pub fn dlq<S: Into<String>>(mut self, topic: S, key_from_original: bool) -> Self {
        self.config.dlq = DlqConfig {
            enabled: true,
            topic: topic.into(),
            key_from_original,
        };
        self
    }

    /// Disable DLQ routing; terminal failures are logged and committed.
    pub fn without_dlq(mut self) -> Self {
        self.config.dlq = DlqConfig::default();
        self
    }

    /// Replace the retry ladder, keeping any previously set predicate and
    /// retry topic.
    pub fn retry_policy(
        mut self,
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self.config.retry.initial_backoff = initial_backoff;
        self.config.retry.max_backoff = max_backoff;
        self.config.retry.multiplier = multiplier;
        self
    }

    /// Mark errors matching `pred` as permanent.
    pub fn non_retryable<F>(mut self, pred: F) -> Self
    where
        F: Fn(&HandlerError) -> bool + Send + Sync + 'static,
    {
        self.config.retry.non_retryable = Some(Arc::new(pred));
        self
    }

    /// Forward exhausted records (raw key and value) to `topic`.
    pub fn retry_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.config.retry.retry_topic = Some(topic.into());
        self
    }

    /// Set the number of concurrent handler invocations. Values below 1 are
    /// clamped to 1.
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n.max(1);
        self
    }

    /// Set the periodic commit flush interval.
    pub fn commit_interval(mut self, interval: Duration) -> Self {
        self.config.commit_interval = interval;
        self
    }

    /// Add header names forwarded unredacted into DLQ envelopes.
    pub fn header_allowlist<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .header_allowlist
            .extend(keys.into_iter().map(|k| k.into()));
        self
    }

    /// Bound individual DLQ/retry-topic sends.
    pub fn producer_send_timeout(mut self, timeout: Duration) -> Self {
        self.config.producer_send_timeout = timeout;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<ConsumerConfig, ConduitError> {
        let cfg = self.config;
        if cfg.brokers.is_empty() {
            return Err(ConduitError::invalid_config(
                "at least one broker address is required",
            ));
        }
        if cfg.topic.is_empty() {
            return Err(ConduitError::invalid_config("topic must not be empty"));
        }
        if cfg.group_id.is_empty() {
            return Err(ConduitError::invalid_config("group id must not be empty"));
        }
        if cfg.commit_interval.is_zero() {
            return Err(ConduitError::invalid_config(
                "commit interval must be greater than zero",
            ));
        }
        if cfg.dlq.enabled && cfg.dlq.topic.is_empty() {
            return Err(ConduitError::invalid_config(
                "DLQ is enabled but no DLQ topic is set",
            ));
        }
        if cfg.retry.max_attempts == 0 {
            return Err(ConduitError::invalid_config(
                "retry max_attempts must be at least 1",
            ));
        }
        if cfg.retry.initial_backoff > cfg.retry.max_backoff {
            return Err(ConduitError::invalid_config(
                "retry initial backoff exceeds max backoff",
            ));
        }
        if cfg.retry.multiplier <= 1.0 {
            return Err(ConduitError::invalid_config(
                "retry multiplier must be greater than 1",
            ));
        }
        if let Some(topic) = &cfg.retry.retry_topic {
            if topic.is_empty() {
                return Err(ConduitError::invalid_config(
                    "retry topic must not be empty",
                ));
            }
        }
        Ok(cfg)
    }
}

/// Producer configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Bootstrap broker addresses
    pub brokers: Vec<String>,
    /// Topic records are published to
    pub topic: String,
    /// Partitioning strategy
    pub balancer: BalancerStrategy,
    /// When true, `send` returns once the record is enqueued and delivery
    /// failures are reported through the logger
    pub async_send: bool,
    /// Upper bound on a synchronous send
    pub send_timeout: Duration,
    /// Client identifier reported to the broker
    pub client_id: Option<String>,
}

impl ProducerConfig {
    /// Start building a producer configuration.
    pub fn builder<B, T>(brokers: Vec<B>, topic: T) -> ProducerConfigBuilder
    where
        B: Into<String>,
        T: Into<String>,
    {
        ProducerConfigBuilder::new(brokers, topic)
    }
}

/// Builder for [`ProducerConfig`]
#[derive(Debug)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn new<B, T>(brokers: Vec<B>, topic: T) -> Self
    where
        B: Into<String>,
        T: Into<String>,
    {
        Self {
            config: ProducerConfig {
                brokers: brokers.into_iter().map(|b| b.into()).collect(),
                topic: topic.into(),
                balancer: BalancerStrategy::RoundRobin,
                async_send: false,
                send_timeout: Duration::from_secs(5),
                client_id: None,
            },
        }
    }

    /// Set the partitioning strategy.
    pub fn balancer(mut self, balancer: BalancerStrategy) -> Self {
        self.config.balancer = balancer;
        self
    }

    /// Enable or disable fire-and-forget sends.
    pub fn async_send(mut self, enabled: bool) -> Self {
        self.config.async_send = enabled;
        self
    }

    /// Bound synchronous sends.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Set the client identifier reported to the broker.
    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<ProducerConfig, ConduitError> {
        let cfg = self.config;
        if cfg.brokers.is_empty() {
            return Err(ConduitError::invalid_config(
                "at least one broker address is required",
            ));
        }
        if cfg.topic.is_empty() {
            return Err(ConduitError::invalid_config("topic must not be empty"));
        }
        Ok(cfg)
    }
}
