//! Receiver loop
//!
//! One long-lived task per engine drains inbound datagrams from the
//! transport, decodes them, and routes them to pending transactions. Every
//! read is bounded by a short poll timeout so the global stop flag is
//! observed promptly; a malformed or unmatched datagram is discarded, never
//! fatal.

use crate::delivery::engine::EngineShared;
use crate::layers::IoDecision;
use crate::message::{Message, MessageType};

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The poll loop. Runs until the global stop flag is set or the read policy
/// escalates a transport failure.
pub(crate) async fn run(shared: Arc<EngineShared>) {
    debug!("receiver loop started");
    let mut buf = vec![0u8; shared.config.recv_buffer_size];

    while !shared.stopped() {
        match shared
            .transport
            .receive(&mut buf, shared.config.receive_timeout)
            .await
        {
            // Nothing arrived within the poll window; not an error
            Ok(None) => continue,
            Ok(Some(len)) => {
                shared.metrics.record_receive();
                let datagram = Bytes::copy_from_slice(&buf[..len]);
                handle_datagram(&shared, datagram).await;
            }
            Err(e) => match shared.read_policy.as_ref().map(|policy| policy(&e)) {
                Some(IoDecision::Continue) => {
                    debug!(error = %e, "transient read failure ignored by policy");
                    continue;
                }
                _ => {
                    warn!(error = %e, "receiver loop stopping on read failure");
                    shared.stop.send_replace(true);
                    break;
                }
            },
        }
    }

    debug!("receiver loop exited");
}

async fn handle_datagram(shared: &Arc<EngineShared>, datagram: Bytes) {
    let message = match shared.codec.decode(&datagram) {
        Ok(message) => message,
        Err(e) => {
            // Malformed input must never take the loop down
            shared.metrics.record_decode_failure();
            debug!(error = %e, bytes = datagram.len(), "discarding undecodable datagram");
            return;
        }
    };

    if message.is_control() {
        resolve_control(shared, message).await;
    } else {
        handle_response(shared, message).await;
    }
}

/// Resolve an empty Ack/Rst against the transaction table. Control traffic
/// never reaches the application callback.
async fn resolve_control(shared: &Arc<EngineShared>, message: Message) {
    let Some(mid) = message.mid else {
        debug!("discarding control message without mid");
        return;
    };

    let Some(transaction) = shared.table.lookup_by_mid(mid).await else {
        debug!(mid, "discarding control message for unknown transaction");
        return;
    };

    let rejected = message.mtype == MessageType::Rst;
    let (handle, stop) = {
        let mut state = transaction.state.lock().await;
        if rejected {
            state.request.rejected = true;
        } else {
            state.request.acknowledged = true;
        }
        (state.retransmit_task.take(), state.retransmit_stop.take())
    };
    stop_retransmission(handle, stop).await;

    if rejected {
        shared.table.remove(mid).await;
        debug!(mid, "transaction rejected by peer");
    } else {
        // A bare Ack promises a separate response; the transaction stays
        // registered under its token until that response arrives.
        debug!(mid, "transaction acknowledged, awaiting separate response");
    }
}

/// Route a response to its transaction: by mid for piggybacked exchanges,
/// by token for separate responses and notifications.
async fn handle_response(shared: &Arc<EngineShared>, message: Message) {
    let mut transaction = None;
    if let Some(mid) = message.mid {
        transaction = shared.table.lookup_by_mid(mid).await;
    }
    if transaction.is_none() && !message.token.is_empty() {
        transaction = shared.table.lookup_by_token(&message.token).await;
    }
    let Some(transaction) = transaction else {
        // Duplicate or stale datagram
        debug!(
            mid = message.mid.unwrap_or_default(),
            "discarding response for unknown transaction"
        );
        return;
    };

    // Mark resolution and stop the retransmission task before any
    // post-processing, so no stale retransmit can race past a resolved
    // exchange. Any matched response resolves the request, piggybacked Ack
    // or not - a separate Non response still proves the request arrived.
    let (handle, stop, request) = {
        let mut state = transaction.state.lock().await;
        state.request.acknowledged = true;
        (
            state.retransmit_task.take(),
            state.retransmit_stop.take(),
            state.request.clone(),
        )
    };
    stop_retransmission(handle, stop).await;

    // A separate confirmable response needs an acknowledgement of its own
    if message.mtype == MessageType::Con {
        if let Some(response_mid) = message.mid {
            send_ack(shared, response_mid).await;
        }
    }

    // Block-wise continuation: the response is not complete yet
    if shared.block.on_receive(&request, &message) {
        let mut state = transaction.state.lock().await;
        state.block_in_progress = true;
        debug!(mid = transaction.mid(), "block-wise exchange continues");
        return;
    }

    let observed = shared.observe.on_receive(&request, &message);
    {
        let mut state = transaction.state.lock().await;
        if state.block_in_progress {
            debug!(mid = transaction.mid(), "block-wise exchange completed");
            state.block_in_progress = false;
        }
        state.observed = observed;
        state.response = Some(message.clone());
    }

    if !observed {
        shared.table.remove(transaction.mid()).await;
    }

    debug!(
        mid = transaction.mid(),
        observed, "delivering response to application"
    );
    (shared.callback)(Some(message));
}

/// Fire the stop signal and join the retransmission task so it has fully
/// exited before resolution post-processing continues.
async fn stop_retransmission(handle: Option<JoinHandle<()>>, stop: Option<watch::Sender<bool>>) {
    if let Some(stop) = stop {
        stop.send_replace(true);
    }
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}

async fn send_ack(shared: &Arc<EngineShared>, mid: u16) {
    let ack = Message::empty_ack(mid);
    match shared.codec.encode(&ack) {
        Ok(datagram) => match shared.send_raw(&datagram).await {
            Ok(()) => {
                shared.metrics.record_ack_sent();
                debug!(mid, "acknowledged separate response");
            }
            Err(e) => warn!(mid, error = %e, "failed to acknowledge separate response"),
        },
        Err(e) => warn!(mid, error = %e, "failed to encode acknowledgement"),
    }
}
