//! Shared test helpers: an in-memory scripted transport, a compact test
//! codec, and a callback recorder.

#![allow(dead_code)]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use coap_deliver::transport::{ControlFuture, RecvFuture, SendFuture};
use coap_deliver::{
    DeliveryConfig, DeliveryError, Message, MessageCodec, MessageType, ResponseCallback, Transport,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// TestCodec - minimal length-prefixed framing, enough to round-trip the
// message model
// ---------------------------------------------------------------------------

pub struct TestCodec;

impl MessageCodec for TestCodec {
    fn encode(&self, message: &Message) -> coap_deliver::Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u8(match message.mtype {
            MessageType::Con => 0,
            MessageType::Non => 1,
            MessageType::Ack => 2,
            MessageType::Rst => 3,
        });
        match message.mid {
            Some(mid) => {
                buf.put_u8(1);
                buf.put_u16(mid);
            }
            None => buf.put_u8(0),
        }
        buf.put_u8(message.token.len() as u8);
        buf.put_slice(&message.token);
        buf.put_u8(message.options.len() as u8);
        for option in &message.options {
            buf.put_u16(option.number);
            buf.put_u8(option.value.len() as u8);
            buf.put_slice(&option.value);
        }
        buf.put_slice(&message.payload);
        Ok(buf.freeze())
    }

    fn decode(&self, datagram: &[u8]) -> coap_deliver::Result<Message> {
        let mut buf = Bytes::copy_from_slice(datagram);
        if buf.len() < 3 {
            return Err(DeliveryError::codec("datagram too short"));
        }
        let mtype = match buf.get_u8() {
            0 => MessageType::Con,
            1 => MessageType::Non,
            2 => MessageType::Ack,
            3 => MessageType::Rst,
            other => return Err(DeliveryError::codec(format!("bad type {other}"))),
        };
        let mid = match buf.get_u8() {
            0 => None,
            _ => {
                if buf.len() < 2 {
                    return Err(DeliveryError::codec("truncated mid"));
                }
                Some(buf.get_u16())
            }
        };
        let token_len = buf.get_u8() as usize;
        if buf.len() < token_len {
            return Err(DeliveryError::codec("truncated token"));
        }
        let token = buf.split_to(token_len);
        if buf.is_empty() {
            return Err(DeliveryError::codec("truncated options"));
        }
        let option_count = buf.get_u8() as usize;
        let mut message = Message::new(mtype);
        message.mid = mid;
        message.token = token;
        for _ in 0..option_count {
            if buf.len() < 3 {
                return Err(DeliveryError::codec("truncated option"));
            }
            let number = buf.get_u16();
            let value_len = buf.get_u8() as usize;
            if buf.len() < value_len {
                return Err(DeliveryError::codec("truncated option value"));
            }
            let value = buf.split_to(value_len);
            message = message.with_option(number, value);
        }
        message.payload = buf;
        Ok(message)
    }
}

/// Decode a captured datagram with the test codec
pub fn decode(datagram: &[u8]) -> Message {
    TestCodec.decode(datagram).expect("captured datagram must decode")
}

/// Encode a message with the test codec
pub fn encode(message: &Message) -> Bytes {
    TestCodec.encode(message).expect("test message must encode")
}

// ---------------------------------------------------------------------------
// TestTransport - in-memory point-to-point link with scripted behavior
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(usize, &[u8]) -> Option<Bytes> + Send + Sync>;

/// In-memory transport: captures every sent datagram, lets the test feed
/// inbound datagrams, and supports scripted per-send replies plus injected
/// I/O failures.
pub struct TestTransport {
    sent: Mutex<Vec<Bytes>>,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    receive_calls: AtomicU64,
    open_failures: AtomicU32,
    send_failures: AtomicU32,
    read_failures: AtomicU32,
    responder: Mutex<Option<Responder>>,
}

impl TestTransport {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            receive_calls: AtomicU64::new(0),
            open_failures: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            read_failures: AtomicU32::new(0),
            responder: Mutex::new(None),
        })
    }

    /// Feed one inbound datagram to the engine
    pub fn push_inbound(&self, datagram: Bytes) {
        let _ = self.inbound_tx.send(datagram);
    }

    /// All datagrams sent so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Number of receive() calls observed (0 means the receiver loop never
    /// started)
    pub fn receive_calls(&self) -> u64 {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// Script a reply: called with (send index, datagram), a `Some` return
    /// is queued as an inbound datagram
    pub fn respond_with(&self, responder: impl Fn(usize, &[u8]) -> Option<Bytes> + Send + Sync + 'static) {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Fail the next `n` open attempts with an I/O error
    pub fn fail_opens(&self, n: u32) {
        self.open_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` sends with an I/O error
    pub fn fail_sends(&self, n: u32) {
        self.send_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with an I/O error
    pub fn fail_reads(&self, n: u32) {
        self.read_failures.store(n, Ordering::SeqCst);
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
}

impl Transport for TestTransport {
    fn open(&self) -> ControlFuture<'_> {
        Box::pin(async move {
            if take_failure(&self.open_failures) {
                return Err(std::io::Error::other("injected open failure"));
            }
            Ok(())
        })
    }

    fn send<'a>(&'a self, buf: &'a [u8]) -> SendFuture<'a> {
        Box::pin(async move {
            if take_failure(&self.send_failures) {
                return Err(std::io::Error::other("injected send failure"));
            }
            let index = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(Bytes::copy_from_slice(buf));
                sent.len() - 1
            };
            let reply = {
                let responder = self.responder.lock().unwrap();
                responder.as_ref().and_then(|respond| respond(index, buf))
            };
            if let Some(reply) = reply {
                let _ = self.inbound_tx.send(reply);
            }
            Ok(buf.len())
        })
    }

    fn receive<'a>(&'a self, buf: &'a mut [u8], timeout: Duration) -> RecvFuture<'a> {
        Box::pin(async move {
            self.receive_calls.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.read_failures) {
                return Err(std::io::Error::other("injected read failure"));
            }
            let mut inbound = self.inbound_rx.lock().await;
            match tokio::time::timeout(timeout, inbound.recv()).await {
                Ok(Some(datagram)) => {
                    let len = datagram.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    Ok(Some(len))
                }
                Ok(None) | Err(_) => Ok(None),
            }
        })
    }

    fn close(&self) -> ControlFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// Callback recorder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CallbackLog {
    entries: Mutex<Vec<Option<Message>>>,
}

impl CallbackLog {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn entries(&self) -> Vec<Option<Message>> {
        self.entries.lock().unwrap().clone()
    }
}

/// Build a response callback that records every invocation
pub fn callback_log() -> (ResponseCallback, Arc<CallbackLog>) {
    let log = Arc::new(CallbackLog::default());
    let sink = log.clone();
    let callback: ResponseCallback = Arc::new(move |response| {
        sink.entries.lock().unwrap().push(response);
    });
    (callback, log)
}

// ---------------------------------------------------------------------------
// Timing helpers and fixtures
// ---------------------------------------------------------------------------

/// Deterministic fast timing for tests: no randomization spread, short
/// backoff, tight receive polling.
pub fn fast_config() -> DeliveryConfig {
    DeliveryConfig::new()
        .ack_timeout(Duration::from_millis(20))
        .ack_random_factor(1.0)
        .max_retransmit(3)
        .receive_timeout(Duration::from_millis(5))
}

/// Poll `cond` until it holds or `timeout` elapses; returns the final state.
pub async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Build an empty acknowledgement datagram for the request inside `datagram`
pub fn ack_for(datagram: &[u8]) -> Bytes {
    let request = decode(datagram);
    let mid = request.mid.expect("request on the wire carries a mid");
    encode(&Message::empty_ack(mid))
}

/// Build an empty reset datagram for the request inside `datagram`
pub fn rst_for(datagram: &[u8]) -> Bytes {
    let request = decode(datagram);
    let mid = request.mid.expect("request on the wire carries a mid");
    encode(&Message::empty_rst(mid))
}

/// Build a piggybacked response (Ack carrying a payload) for the request
/// inside `datagram`
pub fn piggybacked_response_for(datagram: &[u8], payload: &'static [u8]) -> Bytes {
    let request = decode(datagram);
    let mut response = Message::new(MessageType::Ack);
    response.mid = request.mid;
    response.token = request.token;
    response.payload = Bytes::from_static(payload);
    encode(&response)
}
