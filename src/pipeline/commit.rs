//! Commit coordinator
//!
//! A single task owns the backend's commit surface. Workers feed it
//! processed records over the commit channel; the task either commits each
//! record as it arrives ([`CommitMode::PerRecord`]) or marks records and
//! flushes on the commit-interval ticker ([`CommitMode::MarkAndFlush`]).
//! The two strategies are never combined.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::backend::{CommitMode, ConsumerClient};
use crate::message::ConsumeMessage;

/// Drain processed-record tokens until the channel closes, then perform a
/// final flush in marked mode.
///
/// Commit failures are logged at error level; the affected offsets are
/// simply redelivered on the next session.
pub(crate) async fn run_committer<C: ConsumerClient>(
    client: Arc<C>,
    mut tokens: mpsc::Receiver<ConsumeMessage>,
    interval: Duration,
) {
    let mode = client.commit_mode();
    // A plain interval() yields its first tick immediately; the first
    // flush must wait a full commit interval.
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dirty = false;

    loop {
        tokio::select! {
            token = tokens.recv() => match token {
                Some(msg) => {
                    match client.ack(&msg).await {
                        Ok(()) => {
                            if mode == CommitMode::MarkAndFlush {
                                dirty = true;
                            }
                        }
                        Err(e) => error!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            error = %e,
                            "commit failed"
                        ),
                    }
                }
                None => break,
            },
            _ = ticker.tick(), if mode == CommitMode::MarkAndFlush && dirty => {
                match client.flush().await {
                    Ok(()) => dirty = false,
                    Err(e) => error!(error = %e, "commit flush failed"),
                }
            }
        }
    }

    if mode == CommitMode::MarkAndFlush && dirty {
        if let Err(e) = client.flush().await {
            error!(error = %e, "final commit flush failed");
        }
    }

    debug!("commit coordinator exited");
}
