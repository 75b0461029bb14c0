//! Codec boundary
//!
//! Serialization of the application-layer message format is delegated to an
//! external implementation of [`MessageCodec`]; the engine only moves opaque
//! datagrams. A decode failure on an inbound datagram is never fatal: the
//! receiver loop discards the datagram and keeps polling.

use crate::error::Result;
use crate::message::Message;
use bytes::Bytes;

/// Message serializer/deserializer used at the transport boundary.
///
/// The trait is object-safe so the engine can hold an `Arc<dyn MessageCodec>`.
/// The engine is point-to-point; a codec that needs peer context captures it
/// at construction.
pub trait MessageCodec: Send + Sync + 'static {
    /// Serialize a message into a datagram
    fn encode(&self, message: &Message) -> Result<Bytes>;

    /// Parse a datagram back into a message
    fn decode(&self, datagram: &[u8]) -> Result<Message>;
}
