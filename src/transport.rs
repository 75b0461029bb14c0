//! Abstract datagram transport
//!
//! The [`Transport`] trait lets the delivery engine run over any
//! point-to-point datagram link - a UDP socket, a radio modem, a serial
//! channel. The link may drop, delay, or reorder datagrams and may be
//! half-duplex; the engine supplies the reliability on top. Enable the `udp`
//! feature (on by default) for the built-in [`UdpTransport`] backed by
//! `tokio::net::UdpSocket`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by [`Transport::open`] and [`Transport::close`].
pub type ControlFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Boxed future returned by [`Transport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>>;

/// Boxed future returned by [`Transport::receive`]. `Ok(None)` means the
/// bounded wait elapsed with nothing to read - a normal outcome, not an
/// error.
pub type RecvFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Option<usize>>> + Send + 'a>>;

/// Point-to-point datagram transport used by the delivery engine.
///
/// The remote peer is fixed at construction, so sends and receives carry no
/// address. No ordering or delivery guarantee is assumed; the engine never
/// treats a successful `send` as proof of delivery. The trait is object-safe
/// so it can be used as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Acquire the underlying link. Called once by the engine before any
    /// traffic; failure means the device cannot be opened.
    fn open(&self) -> ControlFuture<'_>;

    /// Best-effort send of one datagram to the fixed peer.
    fn send<'a>(&'a self, buf: &'a [u8]) -> SendFuture<'a>;

    /// Bounded read of one datagram into `buf`. Returns `Ok(Some(len))` on
    /// data, `Ok(None)` when `timeout` elapses first.
    fn receive<'a>(&'a self, buf: &'a mut [u8], timeout: Duration) -> RecvFuture<'a>;

    /// Release the link. Idempotent.
    fn close(&self) -> ControlFuture<'_>;
}

// ---------------------------------------------------------------------------
// UdpTransport - default implementation backed by tokio::net::UdpSocket
// ---------------------------------------------------------------------------

#[cfg(feature = "udp")]
mod udp {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    /// Default [`Transport`] implementation wrapping a connected
    /// `tokio::net::UdpSocket`.
    pub struct UdpTransport {
        socket: UdpSocket,
    }

    impl UdpTransport {
        /// Bind a local UDP socket and connect it to `peer`.
        pub async fn connect(
            bind: impl tokio::net::ToSocketAddrs,
            peer: SocketAddr,
        ) -> io::Result<Self> {
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(peer).await?;
            Ok(Self { socket })
        }

        /// Wrap an existing socket already connected to the peer.
        pub fn new(socket: UdpSocket) -> Self {
            Self { socket }
        }

        /// Return the local address this transport is bound to.
        pub fn local_addr(&self) -> io::Result<SocketAddr> {
            self.socket.local_addr()
        }
    }

    impl Transport for UdpTransport {
        fn open(&self) -> ControlFuture<'_> {
            // The socket is acquired in connect(); nothing left to do.
            Box::pin(async { Ok(()) })
        }

        fn send<'a>(&'a self, buf: &'a [u8]) -> SendFuture<'a> {
            Box::pin(self.socket.send(buf))
        }

        fn receive<'a>(&'a self, buf: &'a mut [u8], timeout: Duration) -> RecvFuture<'a> {
            Box::pin(async move {
                match tokio::time::timeout(timeout, self.socket.recv(buf)).await {
                    Ok(Ok(len)) => Ok(Some(len)),
                    Ok(Err(e)) => Err(e),
                    Err(_elapsed) => Ok(None),
                }
            })
        }

        fn close(&self) -> ControlFuture<'_> {
            // UDP has no teardown handshake; dropping the socket releases it.
            Box::pin(async { Ok(()) })
        }
    }
}

#[cfg(feature = "udp")]
pub use udp::UdpTransport;
