//! Error types for the delivery engine

use std::io;
use thiserror::Error;

/// Result type for delivery operations
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error taxonomy for the delivery engine.
///
/// A delivery timeout (retransmission exhausted) is deliberately *not* a
/// variant here: it is a per-message outcome reported through the response
/// callback as `None`, and the engine keeps running.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The transport could not be opened
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[source] io::Error),

    /// A datagram write failed
    #[error("transport write failed: {0}")]
    TransportWrite(#[source] io::Error),

    /// An unrecoverable read failure on the transport
    #[error("transport read failed: {0}")]
    TransportRead(#[source] io::Error),

    /// Two live transactions would share a message ID
    #[error("duplicate message id {mid}")]
    DuplicateMid { mid: u16 },

    /// The codec rejected a message
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Operation attempted on a closed engine
    #[error("engine closed")]
    Closed,
}

impl DeliveryError {
    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        DeliveryError::Codec {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        DeliveryError::Config {
            message: message.into(),
        }
    }

    /// True for transient transport conditions a caller may retry over
    pub fn is_recoverable(&self) -> bool {
        match self {
            DeliveryError::TransportWrite(e) | DeliveryError::TransportRead(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                )
            }
            _ => false,
        }
    }

    /// True when the error means the underlying link is gone for good
    pub fn is_link_failure(&self) -> bool {
        match self {
            DeliveryError::TransportUnavailable(_) => true,
            DeliveryError::TransportRead(e) | DeliveryError::TransportWrite(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::NotConnected
                )
            }
            _ => false,
        }
    }
}
