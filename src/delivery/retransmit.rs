//! Per-message retransmission task
//!
//! Each outstanding confirmable message gets one cancellable task that
//! resends the original datagram with exponential backoff until the message
//! is acknowledged, rejected, stopped, or the retry budget is exhausted.

use crate::config::DeliveryConfig;
use crate::delivery::engine::EngineShared;
use crate::delivery::transaction::Transaction;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Arm retransmission for a freshly sent confirmable message.
///
/// Registers the task's stop signal in the engine's live set so `close` can
/// unblock it, then spawns the retry loop. The task handle and stop signal
/// are stored on the transaction before the task can observe its own state.
pub(crate) async fn arm(shared: &Arc<EngineShared>, transaction: &Arc<Transaction>) {
    let (stop_tx, stop_rx) = watch::channel(false);

    {
        let mut signals = shared.stop_signals.lock().await;
        signals.insert(transaction.mid(), stop_tx.clone());
    }

    let backoff = initial_backoff(&shared.config);
    debug!(mid = transaction.mid(), backoff_ms = backoff.as_millis() as u64, "arming retransmission");

    let mut state = transaction.state.lock().await;
    state.retransmit_stop = Some(stop_tx);
    state.retransmit_task = Some(tokio::spawn(run(
        shared.clone(),
        transaction.clone(),
        stop_rx,
        backoff,
    )));
}

/// Initial backoff: a uniform draw in
/// `[ack_timeout, ack_timeout * ack_random_factor]`.
fn initial_backoff(config: &DeliveryConfig) -> Duration {
    let base = config.ack_timeout.as_secs_f64();
    let upper = base * config.ack_random_factor;
    if upper > base {
        Duration::from_secs_f64(rand::thread_rng().gen_range(base..=upper))
    } else {
        config.ack_timeout
    }
}

/// The retry loop.
///
/// Every wait is bounded by the current backoff and interruptible by the
/// stop signal. The outcome check and the resend are performed under the
/// transaction lock so the receiver loop cannot resolve the exchange halfway
/// through a retransmission decision.
async fn run(
    shared: Arc<EngineShared>,
    transaction: Arc<Transaction>,
    mut stop: watch::Receiver<bool>,
    mut backoff: Duration,
) {
    let mid = transaction.mid();
    let max_retransmit = shared.config.max_retransmit;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop.changed() => {}
        }

        let mut state = transaction.state.lock().await;
        if state.request.acknowledged || state.request.rejected || *stop.borrow() {
            break;
        }
        if state.retry_count >= max_retransmit {
            // Budget exhausted, and the final backoff has been waited out
            break;
        }

        state.retry_count += 1;
        let attempt = state.retry_count;
        let datagram = state.datagram.clone();
        debug!(mid, attempt, max_retransmit, "retransmitting");

        if let Err(e) = shared.send_raw(&datagram).await {
            // The next cycle retries; the retry budget still bounds the loop
            warn!(mid, attempt, error = %e, "retransmission send failed");
        } else {
            shared.metrics.record_retransmission();
        }

        drop(state);
        backoff *= 2;
    }

    // Settle the outcome
    let (timed_out, retries) = {
        let mut state = transaction.state.lock().await;
        let resolved = state.request.acknowledged || state.request.rejected;
        state.request.timed_out = !resolved;
        (!resolved, state.retry_count)
    };

    if timed_out {
        shared.table.remove(mid).await;
        shared.metrics.record_delivery_timeout();
        warn!(mid, retries, "giving up on confirmable message");
        // Definitive delivery failure: tell the application nothing arrived
        (shared.callback)(None);
    }

    // Cleanup runs on every exit path: detach from the engine's live-signal
    // set (absence is fine) and release the transaction's task slot.
    {
        let mut signals = shared.stop_signals.lock().await;
        signals.remove(&mid);
    }
    {
        let mut state = transaction.state.lock().await;
        state.retransmit_stop = None;
        state.retransmit_task = None;
    }

    debug!(mid, timed_out, "retransmission task exited");
}
