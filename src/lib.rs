//! # coap-deliver
//!
//! Reliable delivery of request/response messages over an unreliable,
//! possibly half-duplex, point-to-point datagram transport, following the
//! confirmable-message retransmission discipline of CoAP-style protocols.
//!
//! ## What this crate does
//!
//! Given any byte-oriented transport that can drop or delay datagrams, the
//! engine guarantees that a confirmable outbound message is retried with
//! exponential backoff until it is acknowledged, rejected, or the retry
//! budget is exhausted, while a concurrent receiver loop drains inbound
//! datagrams and routes them to pending transactions.
//!
//! Message parsing, block-wise segmentation, and observe bookkeeping are
//! external collaborators plugged in at trait seams ([`MessageCodec`],
//! [`BlockHandler`], [`ObserveHandler`]); the engine owns the concurrency,
//! timing, and failure semantics.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use coap_deliver::{DeliveryConfig, DeliveryEngine, Message, UdpTransport};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(UdpTransport::connect("0.0.0.0:0", peer).await?);
//! let engine = DeliveryEngine::open(
//!     transport,
//!     Arc::new(my_codec),
//!     Arc::new(|response| match response {
//!         Some(response) => println!("got {:?}", response),
//!         None => println!("delivery failed"),
//!     }),
//!     DeliveryConfig::default(),
//! )
//! .await?;
//!
//! engine.send(Message::request(token, payload)).await?;
//! engine.close().await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   DeliveryEngine     │  send / close / current_mid
//! ├──────────────────────┤
//! │  TransactionTable    │  mid ↔ in-flight exchange
//! ├──────────┬───────────┤
//! │ Receiver │ Retransmit│  one poll loop + one task per CON
//! ├──────────┴───────────┤
//! │     Transport        │  UDP socket, radio link, test harness
//! └──────────────────────┘
//! ```

// Reliable-delivery core
pub mod delivery;
pub use delivery::*;

// Support modules
pub mod codec;
pub mod config;
pub mod error;
pub mod layers;
pub mod message;
pub mod metrics;
pub mod transport;

// Re-exports
pub use codec::MessageCodec;
pub use config::DeliveryConfig;
pub use error::{DeliveryError, Result};
pub use layers::{
    BlockHandler, IoDecision, ObserveHandler, ReadErrorPolicy, ResponseCallback, WriteErrorPolicy,
};
pub use message::{Message, MessageOption, MessageType, Mid, Token};
pub use metrics::MetricsSnapshot;
pub use transport::Transport;
#[cfg(feature = "udp")]
pub use transport::UdpTransport;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
