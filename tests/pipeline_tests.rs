//! End-to-end pipeline scenarios over an in-memory backend

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use kafka_conduit::backend::{CommitMode, ConsumerClient};
use kafka_conduit::pipeline::PipelineConsumer;
use kafka_conduit::{
    handler_fn, ConduitError, Consumer, ConsumerConfig, ConsumeMessage, Header, ProduceMessage,
    Producer,
};

#[derive(Default)]
struct MockState {
    /// Offsets acked in arrival order (per-record mode).
    acked: Mutex<Vec<i64>>,
    /// Next-to-consume offset per partition (marked mode).
    marked: Mutex<HashMap<(String, i32), i64>>,
    /// Next-offsets drained by each flush (marked mode).
    flushes: Mutex<Vec<Vec<i64>>>,
    closed: AtomicBool,
}

impl MockState {
    fn committed(&self) -> Vec<i64> {
        let mut all = self.acked.lock().clone();
        for batch in self.flushes.lock().iter() {
            all.extend(batch.iter().copied());
        }
        all
    }
}

/// In-memory stand-in for an underlying client: records are served from a
/// queue; an empty queue blocks like a broker poll with nothing to return.
struct MockClient {
    queue: Mutex<VecDeque<ConsumeMessage>>,
    mode: CommitMode,
    state: Arc<MockState>,
}

impl MockClient {
    fn new(records: Vec<ConsumeMessage>, mode: CommitMode) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let client = Self {
            queue: Mutex::new(records.into()),
            mode,
            state: state.clone(),
        };
        (client, state)
    }
}

#[async_trait]
impl ConsumerClient for MockClient {
    fn commit_mode(&self) -> CommitMode {
        self.mode
    }

    async fn poll(&self) -> Result<Vec<ConsumeMessage>, ConduitError> {
        if let Some(msg) = self.queue.lock().pop_front() {
            return Ok(vec![msg]);
        }
        std::future::pending().await
    }

    async fn ack(&self, msg: &ConsumeMessage) -> Result<(), ConduitError> {
        match self.mode {
            CommitMode::PerRecord => self.state.acked.lock().push(msg.offset),
            CommitMode::MarkAndFlush => {
                let mut marked = self.state.marked.lock();
                let next = marked.entry((msg.topic.clone(), msg.partition)).or_insert(0);
                *next = (*next).max(msg.offset + 1);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), ConduitError> {
        let drained: Vec<i64> = self.state.marked.lock().drain().map(|(_, v)| v).collect();
        if !drained.is_empty() {
            self.state.flushes.lock().push(drained);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ConduitError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MockProducer {
    sent: Arc<Mutex<Vec<ProduceMessage>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Producer for MockProducer {
    async fn send(&self, msg: ProduceMessage) -> Result<(), ConduitError> {
        self.sent.lock().push(msg);
        Ok(())
    }

    async fn close(&self) -> Result<(), ConduitError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn record(offset: i64, value: &str, key: Option<&str>, headers: Vec<Header>) -> ConsumeMessage {
    ConsumeMessage {
        topic: "orders".to_string(),
        partition: 0,
        offset,
        timestamp: Utc::now(),
        key: key.map(|k| Bytes::copy_from_slice(k.as_bytes())),
        value: Bytes::copy_from_slice(value.as_bytes()),
        headers,
    }
}

fn base_config() -> kafka_conduit::ConsumerConfigBuilder {
    ConsumerConfig::builder(vec!["localhost:9092"], "orders", "test-group")
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn happy_path_processes_in_order_and_commits() {
    let config = base_config().build().unwrap();
    let records = vec![
        record(0, "a", Some("k"), Vec::new()),
        record(1, "b", Some("k"), Vec::new()),
        record(2, "c", Some("k"), Vec::new()),
    ];
    let (client, state) = MockClient::new(records, CommitMode::PerRecord);

    let handled: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = handled.clone();
    let handler = Arc::new(handler_fn(move |msg: ConsumeMessage| {
        let seen = seen.clone();
        async move {
            seen.lock().push(String::from_utf8_lossy(&msg.value).into_owned());
            Ok(())
        }
    }));

    let dlq = MockProducer::default();
    let mut consumer =
        PipelineConsumer::new(config, handler, client, Some(Box::new(dlq.clone())), None);
    consumer.start(CancellationToken::new()).await.unwrap();

    assert!(wait_until(|| state.committed().len() == 3, Duration::from_secs(5)).await);
    consumer.close(Duration::from_secs(5)).await.unwrap();

    assert_eq!(*handled.lock(), vec!["a", "b", "c"]);
    assert_eq!(*state.acked.lock(), vec![0, 1, 2]);
    assert!(dlq.sent.lock().is_empty());
    assert!(state.closed.load(Ordering::SeqCst));
    assert!(dlq.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn exhausted_retries_route_to_dlq_with_redacted_headers() {
    let config = base_config()
        .retry_policy(2, Duration::from_millis(10), Duration::from_secs(1), 2.0)
        .dlq("orders-dlq", true)
        .header_allowlist(vec!["trace-id"])
        .build()
        .unwrap();

    let headers = vec![Header::new("trace-id", "t1"), Header::new("secret", "s1")];
    let (client, state) = MockClient::new(
        vec![record(5, "x", Some("k"), headers)],
        CommitMode::PerRecord,
    );

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler = Arc::new(handler_fn(move |_msg| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom".into())
        }
    }));

    let dlq = MockProducer::default();
    let mut consumer =
        PipelineConsumer::new(config, handler, client, Some(Box::new(dlq.clone())), None);
    consumer.start(CancellationToken::new()).await.unwrap();

    assert!(wait_until(|| state.committed().len() == 1, Duration::from_secs(5)).await);
    consumer.close(Duration::from_secs(5)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*state.acked.lock(), vec![5]);

    let sent = dlq.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key, Some(Bytes::from("k")));
    let envelope: serde_json::Value = serde_json::from_slice(&sent[0].value).unwrap();
    assert_eq!(envelope["topic"], "orders");
    assert_eq!(envelope["offset"], 5);
    assert_eq!(envelope["error"], "boom");
    assert_eq!(envelope["payload"], "x");
    assert_eq!(envelope["headers"]["trace-id"], "t1");
    assert_eq!(envelope["headers"]["secret"], "[REDACTED]");
}

#[tokio::test]
async fn non_retryable_error_skips_backoff_entirely() {
    let config = base_config()
        .retry_policy(5, Duration::from_secs(5), Duration::from_secs(30), 2.0)
        .non_retryable(|e| e.to_string() == "skip")
        .dlq("orders-dlq", false)
        .build()
        .unwrap();

    let (client, state) = MockClient::new(
        vec![record(0, "x", Some("k"), Vec::new())],
        CommitMode::PerRecord,
    );

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler = Arc::new(handler_fn(move |_msg| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("skip".into())
        }
    }));

    let dlq = MockProducer::default();
    let started = Instant::now();
    let mut consumer =
        PipelineConsumer::new(config, handler, client, Some(Box::new(dlq.clone())), None);
    consumer.start(CancellationToken::new()).await.unwrap();

    assert!(wait_until(|| state.committed().len() == 1, Duration::from_secs(5)).await);
    consumer.close(Duration::from_secs(5)).await.unwrap();

    // A single 5s backoff sleep would blow this bound.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dlq.sent.lock().len(), 1);
    assert_eq!(*state.acked.lock(), vec![0]);
    // No key carried over: key_from_original was false.
    assert_eq!(dlq.sent.lock()[0].key, None);
}

#[tokio::test]
async fn concurrency_stays_within_bound() {
    let config = base_config().max_concurrent(4).build().unwrap();

    let records: Vec<ConsumeMessage> = (0..100)
        .map(|i| record(i, &format!("v{i}"), None, Vec::new()))
        .collect();
    let (client, state) = MockClient::new(records, CommitMode::PerRecord);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let current = in_flight.clone();
    let peak = max_in_flight.clone();
    let handler = Arc::new(handler_fn(move |_msg| {
        let current = current.clone();
        let peak = peak.clone();
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(CancellationToken::new()).await.unwrap();

    assert!(wait_until(|| state.committed().len() == 100, Duration::from_secs(10)).await);
    consumer.close(Duration::from_secs(5)).await.unwrap();

    assert!(max_in_flight.load(Ordering::SeqCst) <= 4);

    // Commits may reorder across workers, but every offset lands.
    let committed: HashSet<i64> = state.committed().into_iter().collect();
    assert_eq!(committed, (0..100).collect::<HashSet<i64>>());
}

#[tokio::test]
async fn cancellation_during_backoff_leaves_offset_uncommitted() {
    let config = base_config()
        .retry_policy(5, Duration::from_secs(10), Duration::from_secs(30), 2.0)
        .build()
        .unwrap();

    let (client, state) = MockClient::new(
        vec![record(0, "x", None, Vec::new())],
        CommitMode::PerRecord,
    );

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler = Arc::new(handler_fn(move |_msg| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom".into())
        }
    }));

    let shutdown = CancellationToken::new();
    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(shutdown.clone()).await.unwrap();

    // Let the first attempt fail and the 10s backoff begin.
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await);
    shutdown.cancel();

    let started = Instant::now();
    consumer.close(Duration::from_secs(5)).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(state.committed().is_empty());
    assert!(state.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn close_drains_in_flight_and_queued_records() {
    let config = base_config().build().unwrap();
    let records = vec![
        record(0, "a", None, Vec::new()),
        record(1, "b", None, Vec::new()),
        record(2, "c", None, Vec::new()),
    ];
    let (client, state) = MockClient::new(records, CommitMode::PerRecord);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler = Arc::new(handler_fn(move |_msg| {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(CancellationToken::new()).await.unwrap();

    // First record is in-flight, the rest are queued.
    tokio::time::sleep(Duration::from_millis(30)).await;
    consumer.close(Duration::from_secs(5)).await.unwrap();

    // The drain finished every handler before close returned.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*state.acked.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn close_deadline_expiry_reports_incomplete_shutdown() {
    let config = base_config().build().unwrap();
    let (client, state) = MockClient::new(
        vec![record(0, "x", None, Vec::new())],
        CommitMode::PerRecord,
    );

    let handler = Arc::new(handler_fn(|_msg| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }));

    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = consumer.close(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, ConduitError::ShutdownIncomplete { .. }));

    // The underlying client is still force-closed so sockets are released.
    assert!(state.closed.load(Ordering::SeqCst));
    assert!(state.committed().is_empty());
}

#[tokio::test]
async fn marked_offsets_flush_on_ticker() {
    let config = base_config()
        .commit_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let records = vec![
        record(0, "a", None, Vec::new()),
        record(1, "b", None, Vec::new()),
        record(2, "c", None, Vec::new()),
    ];
    let (client, state) = MockClient::new(records, CommitMode::MarkAndFlush);

    let handler = Arc::new(handler_fn(|_msg| async { Ok(()) }));
    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(CancellationToken::new()).await.unwrap();

    // The ticker flushes marks without any shutdown involved.
    assert!(wait_until(|| !state.flushes.lock().is_empty(), Duration::from_secs(5)).await);
    consumer.close(Duration::from_secs(5)).await.unwrap();

    let committed = state.committed();
    assert_eq!(*committed.iter().max().unwrap(), 3);
}

#[tokio::test]
async fn marked_offsets_flush_on_drain() {
    // Interval far beyond the test lifetime: only the final drain flush
    // can commit.
    let config = base_config()
        .commit_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let records = vec![
        record(0, "a", None, Vec::new()),
        record(1, "b", None, Vec::new()),
    ];
    let (client, state) = MockClient::new(records, CommitMode::MarkAndFlush);

    let handled = Arc::new(AtomicU32::new(0));
    let counter = handled.clone();
    let handler = Arc::new(handler_fn(move |_msg| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(CancellationToken::new()).await.unwrap();

    assert!(wait_until(|| handled.load(Ordering::SeqCst) == 2, Duration::from_secs(5)).await);
    assert!(state.flushes.lock().is_empty());
    consumer.close(Duration::from_secs(5)).await.unwrap();

    assert_eq!(state.flushes.lock().len(), 1);
    assert_eq!(*state.committed().iter().max().unwrap(), 2);
}

#[tokio::test]
async fn exhausted_record_reaches_retry_topic_and_dlq() {
    let config = base_config()
        .retry_policy(2, Duration::from_millis(5), Duration::from_millis(20), 2.0)
        .retry_topic("orders-retry")
        .dlq("orders-dlq", true)
        .build()
        .unwrap();

    let (client, state) = MockClient::new(
        vec![record(9, "payload", Some("k9"), Vec::new())],
        CommitMode::PerRecord,
    );

    let handler = Arc::new(handler_fn(|_msg| async { Err::<(), _>("boom".into()) }));

    let dlq = MockProducer::default();
    let retry = MockProducer::default();
    let mut consumer = PipelineConsumer::new(
        config,
        handler,
        client,
        Some(Box::new(dlq.clone())),
        Some(Box::new(retry.clone())),
    );
    consumer.start(CancellationToken::new()).await.unwrap();

    assert!(wait_until(|| state.committed().len() == 1, Duration::from_secs(5)).await);
    consumer.close(Duration::from_secs(5)).await.unwrap();

    // Retry topic gets the raw record, no envelope.
    let forwarded = retry.sent.lock();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].value, Bytes::from("payload"));
    assert_eq!(forwarded[0].key, Some(Bytes::from("k9")));

    assert_eq!(dlq.sent.lock().len(), 1);
    assert!(retry.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn start_twice_errors_and_close_is_idempotent() {
    let config = base_config().build().unwrap();
    let (client, _state) = MockClient::new(Vec::new(), CommitMode::PerRecord);
    let handler = Arc::new(handler_fn(|_msg| async { Ok(()) }));

    let mut consumer = PipelineConsumer::new(config, handler, client, None, None);
    consumer.start(CancellationToken::new()).await.unwrap();

    let err = consumer.start(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ConduitError::Consumer { .. }));

    consumer.close(Duration::from_secs(5)).await.unwrap();
    consumer.close(Duration::from_secs(5)).await.unwrap();
}
