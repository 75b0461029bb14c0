//! Collaborator seams around the delivery core
//!
//! Block-wise transfer, observe bookkeeping, the application response
//! callback, and the transient-I/O policies are external collaborators. The
//! engine calls them at fixed points and otherwise treats them as opaque.

use crate::message::Message;
use std::io;
use std::sync::Arc;

/// Application callback for completed exchanges.
///
/// Invoked at most once per exchange with `Some(response)`, or repeatedly
/// for an active subscription. `None` signals definitive delivery failure:
/// retransmission was exhausted without an acknowledgement.
pub type ResponseCallback = Arc<dyn Fn(Option<Message>) + Send + Sync>;

/// Decision returned by an I/O error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDecision {
    /// Swallow the error and keep going
    Continue,
    /// Surface the error (stop the receiver loop / fail the send)
    Escalate,
}

/// Policy consulted on a transport read failure. Absent a policy the
/// receiver loop escalates and stops.
pub type ReadErrorPolicy = Arc<dyn Fn(&io::Error) -> IoDecision + Send + Sync>;

/// Policy consulted on a transport write failure. Absent a policy the send
/// error propagates to the caller.
pub type WriteErrorPolicy = Arc<dyn Fn(&io::Error) -> IoDecision + Send + Sync>;

/// Block-wise transfer collaborator.
///
/// Consulted on every outbound request and every inbound response. The
/// engine does not segment payloads itself; it only routes around an
/// incomplete exchange.
pub trait BlockHandler: Send + Sync {
    /// Transform an outbound request before it is encoded.
    fn on_send(&self, request: Message) -> Message {
        request
    }

    /// Inspect an inbound response. Return `true` when the exchange needs
    /// another round and the response must not yet reach the application.
    fn on_receive(&self, _request: &Message, _response: &Message) -> bool {
        false
    }
}

/// Observe/subscription collaborator.
///
/// Flags transactions that produce repeated notifications so the engine
/// keeps them registered and re-invokes the callback per notification.
pub trait ObserveHandler: Send + Sync {
    /// Transform an outbound request before it is encoded.
    fn on_send(&self, request: Message) -> Message {
        request
    }

    /// Transform an outbound empty/control message before it is sent.
    fn on_send_empty(&self, message: Message) -> Message {
        message
    }

    /// Inspect an inbound response. Return `true` when the transaction is an
    /// active subscription.
    fn on_receive(&self, _request: &Message, _response: &Message) -> bool {
        false
    }
}

/// Pass-through block handler used when no block collaborator is injected.
#[derive(Debug, Default)]
pub struct NoopBlockHandler;

impl BlockHandler for NoopBlockHandler {}

/// Pass-through observe handler used when no observe collaborator is
/// injected.
#[derive(Debug, Default)]
pub struct NoopObserveHandler;

impl ObserveHandler for NoopObserveHandler {}
