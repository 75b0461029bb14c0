//! Message model shared by the delivery engine and its collaborators

use bytes::Bytes;

/// Protocol option numbers the engine itself inspects
pub mod options {
    /// No-Response option (RFC 7967)
    pub const NO_RESPONSE: u16 = 258;
    /// No-Response value requesting suppression of all response classes
    pub const NO_RESPONSE_SUPPRESS_ALL: u8 = 26;
}

/// Message identifier, scoped to the session; wraps modulo 2^16
pub type Mid = u16;

/// Opaque correlation token
pub type Token = Bytes;

/// The four message types of the confirmable-exchange discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Confirmable - requires acknowledgement, subject to retransmission
    Con,
    /// Non-confirmable - fire and forget
    Non,
    /// Acknowledgement
    Ack,
    /// Reset - peer rejected the message
    Rst,
}

impl MessageType {
    /// Short wire-log name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Con => "CON",
            MessageType::Non => "NON",
            MessageType::Ack => "ACK",
            MessageType::Rst => "RST",
        }
    }
}

/// A single protocol option. Options keep their insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOption {
    pub number: u16,
    pub value: Bytes,
}

impl MessageOption {
    pub fn new(number: u16, value: impl Into<Bytes>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }
}

/// One unit exchanged over the wire.
///
/// The delivery-outcome flags (`acknowledged`, `rejected`, `timed_out`) are
/// mutated in place by the receiver loop and the retransmission task as the
/// fate of the message becomes known.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message identifier; `None` until the engine assigns one
    pub mid: Option<Mid>,
    pub mtype: MessageType,
    pub token: Token,
    /// Ordered option sequence
    pub options: Vec<MessageOption>,
    pub payload: Bytes,

    /// Peer acknowledged this message
    pub acknowledged: bool,
    /// Peer rejected this message with a Rst
    pub rejected: bool,
    /// Retransmission was exhausted without acknowledgement
    pub timed_out: bool,
}

impl Message {
    /// Create an outbound message of the given type
    pub fn new(mtype: MessageType) -> Self {
        Self {
            mid: None,
            mtype,
            token: Bytes::new(),
            options: Vec::new(),
            payload: Bytes::new(),
            acknowledged: false,
            rejected: false,
            timed_out: false,
        }
    }

    /// Create a confirmable request
    pub fn request(token: impl Into<Token>, payload: impl Into<Bytes>) -> Self {
        let mut message = Self::new(MessageType::Con);
        message.token = token.into();
        message.payload = payload.into();
        message
    }

    /// Create a non-confirmable request
    pub fn non_confirmable(token: impl Into<Token>, payload: impl Into<Bytes>) -> Self {
        let mut message = Self::new(MessageType::Non);
        message.token = token.into();
        message.payload = payload.into();
        message
    }

    /// Create an empty acknowledgement for the given message id
    pub fn empty_ack(mid: Mid) -> Self {
        let mut message = Self::new(MessageType::Ack);
        message.mid = Some(mid);
        message
    }

    /// Create an empty reset for the given message id
    pub fn empty_rst(mid: Mid) -> Self {
        let mut message = Self::new(MessageType::Rst);
        message.mid = Some(mid);
        message
    }

    /// Append an option, preserving insertion order
    pub fn with_option(mut self, number: u16, value: impl Into<Bytes>) -> Self {
        self.options.push(MessageOption::new(number, value));
        self
    }

    /// Mark this message as requesting no response at all (RFC 7967)
    pub fn suppress_response(self) -> Self {
        self.with_option(
            options::NO_RESPONSE,
            vec![options::NO_RESPONSE_SUPPRESS_ALL],
        )
    }

    /// True for confirmable messages, the only kind that is retransmitted
    pub fn is_confirmable(&self) -> bool {
        self.mtype == MessageType::Con
    }

    /// True for empty Ack/Rst control messages that resolve a transaction
    /// without carrying a response
    pub fn is_control(&self) -> bool {
        matches!(self.mtype, MessageType::Ack | MessageType::Rst) && self.payload.is_empty()
    }

    /// True when the peer was asked to suppress every response class
    pub fn suppresses_response(&self) -> bool {
        self.options.iter().any(|opt| {
            opt.number == options::NO_RESPONSE
                && opt.value.first() == Some(&options::NO_RESPONSE_SUPPRESS_ALL)
        })
    }
}
