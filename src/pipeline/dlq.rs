//! Dead-letter envelope encoding and bounded side-producer dispatch

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::ConsumerConfig;
use crate::error::ConduitError;
use crate::message::{ConsumeMessage, ProduceMessage};
use crate::producer::Producer;

const REDACTED: &str = "[REDACTED]";

/// JSON object published to the dead-letter topic.
///
/// The field set is stable; readers must tolerate unknown future fields.
#[derive(Serialize)]
struct DlqEnvelope<'a> {
    topic: &'a str,
    partition: i32,
    offset: i64,
    error: &'a str,
    headers: BTreeMap<&'a str, String>,
    payload: String,
    timestamp: DateTime<Utc>,
}

/// Encode the envelope for a terminally failed record.
///
/// Header values are forwarded only for names on the allowlist; all other
/// values are replaced with the literal `"[REDACTED]"`. The payload is
/// included verbatim.
pub(crate) fn encode_envelope(
    msg: &ConsumeMessage,
    cause: &str,
    allowlist: &HashSet<String>,
) -> Result<Vec<u8>, ConduitError> {
    let mut headers = BTreeMap::new();
    for h in &msg.headers {
        let value = if allowlist.contains(&h.key) {
            String::from_utf8_lossy(&h.value).into_owned()
        } else {
            REDACTED.to_string()
        };
        headers.insert(h.key.as_str(), value);
    }

    let envelope = DlqEnvelope {
        topic: &msg.topic,
        partition: msg.partition,
        offset: msg.offset,
        error: cause,
        headers,
        payload: String::from_utf8_lossy(&msg.value).into_owned(),
        timestamp: msg.timestamp,
    };

    serde_json::to_vec(&envelope).map_err(|e| ConduitError::serialization(e.to_string()))
}

/// Forward a terminally failed record to the DLQ, if one is configured.
///
/// Send failures are logged and never retried; the caller commits the
/// original offset regardless so a poison pill cannot block the pipeline.
pub(crate) async fn dispatch(
    dlq: Option<&dyn Producer>,
    config: &ConsumerConfig,
    msg: &ConsumeMessage,
    cause: &str,
    cancel: &CancellationToken,
) {
    let Some(dlq) = dlq else {
        warn!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            error = %cause,
            "DLQ disabled; dropping failed record"
        );
        return;
    };

    let data = match encode_envelope(msg, cause, &config.header_allowlist) {
        Ok(data) => data,
        Err(e) => {
            error!(error = %e, "failed to encode DLQ envelope");
            return;
        }
    };

    let mut out = ProduceMessage::new(data);
    if config.dlq.key_from_original {
        if let Some(key) = &msg.key {
            out = out.with_key(key.clone());
        }
    }

    send_bounded(dlq, out, config.producer_send_timeout, cancel, "DLQ").await;
}

/// Send through a side producer under a bounded sub-deadline carved from
/// the pipeline's cancellation, so a stuck side broker cannot freeze a
/// worker.
pub(crate) async fn send_bounded(
    producer: &dyn Producer,
    msg: ProduceMessage,
    timeout: Duration,
    cancel: &CancellationToken,
    sink: &'static str,
) {
    tokio::select! {
        _ = cancel.cancelled() => {
            warn!(sink, "cancelled while sending to side producer");
        }
        result = tokio::time::timeout(timeout, producer.send(msg)) => match result {
            Err(_) => error!(sink, timeout_ms = timeout.as_millis() as u64, "side producer send timed out"),
            Ok(Err(e)) => error!(sink, error = %e, "side producer send failed"),
            Ok(Ok(())) => {}
        }
    }
}
