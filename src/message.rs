//! Record types exchanged with the broker

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A single record header.
///
/// Headers form an ordered sequence; duplicate keys are permitted and
/// preserved in produce order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new<K: Into<String>, V: Into<Bytes>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Record handed to a [`Producer`](crate::Producer) for publishing.
///
/// Built with chained methods instead of option functions:
///
/// ```
/// use kafka_conduit::ProduceMessage;
///
/// let msg = ProduceMessage::new("payload")
///     .with_key("user-123")
///     .with_header("trace-id", "abc");
/// assert!(msg.key.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ProduceMessage {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<Header>,
    /// Explicit partition assignment, honored by backends under the
    /// `Manual` balancer strategy.
    pub partition: Option<i32>,
}

impl ProduceMessage {
    /// Create a record carrying only a value.
    pub fn new<V: Into<Bytes>>(value: V) -> Self {
        Self {
            key: None,
            value: value.into(),
            headers: Vec::new(),
            partition: None,
        }
    }

    /// Attach a partitioning key.
    pub fn with_key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Append a single header.
    pub fn with_header<K: Into<String>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    /// Append a set of headers.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        for (k, v) in headers {
            self.headers.push(Header::new(k, v));
        }
        self
    }

    /// Assign an explicit partition (used with the `Manual` balancer).
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

/// Record delivered to a [`Handler`](crate::Handler) by a consumer.
#[derive(Debug, Clone)]
pub struct ConsumeMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<Header>,
}
