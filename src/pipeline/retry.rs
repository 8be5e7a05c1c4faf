//! Retry state machine for handler invocations

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::consumer::Handler;
use crate::error::HandlerError;
use crate::message::ConsumeMessage;

/// Terminal state of one record's pass through the retry ladder.
pub(crate) enum RetryOutcome {
    /// Handler returned ok; the record proceeds to commit.
    Success,
    /// The non-retryable predicate matched; remaining attempts are skipped.
    NonRetryable(HandlerError),
    /// `max_attempts` handler invocations all failed.
    Exhausted(HandlerError),
    /// Cancellation fired during a backoff sleep; the record is not
    /// committed and will be redelivered.
    Cancelled,
}

/// Drive `handler` over `msg` until a terminal state is reached.
///
/// The non-retryable predicate is evaluated before the attempt-count
/// check, so a non-retryable error on the first attempt does not consume
/// the remaining attempts. The backoff sleep is interrupted by `cancel`.
pub(crate) async fn run_with_retry(
    handler: &dyn Handler,
    msg: &ConsumeMessage,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> RetryOutcome {
    let mut attempt: u32 = 1;
    let mut delay = policy.initial_backoff;

    loop {
        let err = match handler.handle(msg.clone()).await {
            Ok(()) => return RetryOutcome::Success,
            Err(err) => err,
        };

        if let Some(pred) = &policy.non_retryable {
            if pred(&err) {
                return RetryOutcome::NonRetryable(err);
            }
        }

        if attempt >= policy.max_attempts {
            return RetryOutcome::Exhausted(err);
        }

        warn!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "handler failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return RetryOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, policy);
        attempt += 1;
    }
}

/// `delay × multiplier`, capped at the policy ceiling.
pub(crate) fn next_delay(delay: Duration, policy: &RetryPolicy) -> Duration {
    delay.mul_f64(policy.multiplier).min(policy.max_backoff)
}
