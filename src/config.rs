//! Configuration for the delivery engine

use crate::error::{DeliveryError, Result};
use std::time::Duration;

/// Delivery engine configuration builder.
///
/// The timing defaults are the confirmable-messaging constants the protocol
/// specifies: an initial acknowledgement timeout of 2 s, randomized by a
/// factor of 1.5, and at most 4 retransmissions.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Base acknowledgement timeout before the first retransmission
    pub ack_timeout: Duration,
    /// Randomization factor applied to the initial backoff draw
    pub ack_random_factor: f64,
    /// Maximum number of retransmissions per confirmable message
    pub max_retransmit: u32,
    /// Poll timeout for one bounded transport read; keeps the receiver loop
    /// responsive to shutdown
    pub receive_timeout: Duration,
    /// Receive buffer size for one datagram
    pub recv_buffer_size: usize,
    /// First message id handed out; random when unset
    pub starting_mid: Option<u16>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            receive_timeout: Duration::from_millis(100),
            recv_buffer_size: 2048,
            starting_mid: None,
        }
    }
}

impl DeliveryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base acknowledgement timeout
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the initial-backoff randomization factor
    pub fn ack_random_factor(mut self, factor: f64) -> Self {
        self.ack_random_factor = factor;
        self
    }

    /// Set the maximum retransmission count
    pub fn max_retransmit(mut self, count: u32) -> Self {
        self.max_retransmit = count;
        self
    }

    /// Set the bounded receive poll timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the per-datagram receive buffer size
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Pin the first message id (deterministic test setups)
    pub fn starting_mid(mut self, mid: u16) -> Self {
        self.starting_mid = Some(mid);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout.is_zero() {
            return Err(DeliveryError::config("ack timeout must be greater than 0"));
        }

        if self.ack_random_factor < 1.0 {
            return Err(DeliveryError::config("ack random factor must be at least 1.0"));
        }

        if self.max_retransmit == 0 {
            return Err(DeliveryError::config("max retransmit must be greater than 0"));
        }

        if self.receive_timeout.is_zero() {
            return Err(DeliveryError::config("receive timeout must be greater than 0"));
        }

        if self.recv_buffer_size == 0 {
            return Err(DeliveryError::config("receive buffer size must be greater than 0"));
        }

        Ok(())
    }
}

/// Preset configurations for common link profiles
impl DeliveryConfig {
    /// Low-latency local links: short timeouts, fewer retries
    pub fn lan() -> Self {
        Self::default()
            .ack_timeout(Duration::from_millis(250))
            .max_retransmit(3)
            .receive_timeout(Duration::from_millis(20))
    }

    /// Slow or lossy links such as low-rate radio: patient timeouts, more
    /// retries
    pub fn lossy_link() -> Self {
        Self::default()
            .ack_timeout(Duration::from_secs(3))
            .max_retransmit(6)
            .receive_timeout(Duration::from_millis(200))
    }

    /// Fast deterministic timing for tests: no randomization spread
    pub fn testing() -> Self {
        Self::default()
            .ack_timeout(Duration::from_millis(20))
            .ack_random_factor(1.0)
            .max_retransmit(2)
            .receive_timeout(Duration::from_millis(5))
    }
}
