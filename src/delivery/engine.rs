//! Delivery engine façade
//!
//! [`DeliveryEngine`] composes the transaction table, the receiver loop, and
//! the per-message retransmission tasks over one [`Transport`]: it assigns
//! message ids, registers transactions, starts the receiver loop lazily on
//! the first send that expects a response, arms retransmission for
//! confirmable messages, and tears everything down on [`close`].
//!
//! [`close`]: DeliveryEngine::close

use crate::codec::MessageCodec;
use crate::config::DeliveryConfig;
use crate::delivery::receiver;
use crate::delivery::retransmit;
use crate::delivery::transaction::{Transaction, TransactionTable};
use crate::error::{DeliveryError, Result};
use crate::layers::{
    BlockHandler, IoDecision, NoopBlockHandler, NoopObserveHandler, ObserveHandler,
    ReadErrorPolicy, ResponseCallback, WriteErrorPolicy,
};
use crate::message::{Message, MessageType, Mid};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::transport::Transport;

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Engine state shared with the receiver loop and every retransmission task.
///
/// Owned by the [`DeliveryEngine`] and handed out by `Arc` - never ambient.
pub(crate) struct EngineShared {
    pub config: DeliveryConfig,
    pub transport: Arc<dyn Transport>,
    pub codec: Arc<dyn MessageCodec>,
    pub callback: ResponseCallback,
    pub block: Arc<dyn BlockHandler>,
    pub observe: Arc<dyn ObserveHandler>,
    pub read_policy: Option<ReadErrorPolicy>,
    pub write_policy: Option<WriteErrorPolicy>,

    pub table: TransactionTable,
    pub metrics: EngineMetrics,

    /// Next message id to hand out; wraps modulo 2^16
    pub current_mid: AtomicU16,
    /// Stop signals of all live retransmission tasks, fired together on close
    pub stop_signals: Mutex<HashMap<Mid, watch::Sender<bool>>>,
    /// Global stop flag observed by the receiver loop
    pub stop: watch::Sender<bool>,
    /// Serializes transport writes; half-duplex links must never see
    /// interleaved writers
    write_lock: Mutex<()>,
}

impl EngineShared {
    /// Hand out the next message id, wrapping at 2^16.
    pub(crate) fn next_mid(&self) -> Mid {
        self.current_mid.fetch_add(1, Ordering::Relaxed)
    }

    /// True once the global stop flag is set
    pub(crate) fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Write one datagram to the transport.
    ///
    /// A write failure consults the injected write policy: `Continue` turns
    /// the send into best-effort fire-and-forget, anything else propagates.
    pub(crate) async fn send_raw(&self, datagram: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.transport.send(datagram).await {
            Ok(_) => {
                self.metrics.record_send();
                Ok(())
            }
            Err(e) => match self.write_policy.as_ref().map(|policy| policy(&e)) {
                Some(IoDecision::Continue) => {
                    debug!(error = %e, "write failure swallowed by policy");
                    Ok(())
                }
                _ => Err(DeliveryError::TransportWrite(e)),
            },
        }
    }
}

struct ReceiverSlot {
    started: bool,
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// Builder for a [`DeliveryEngine`] with injected collaborators.
pub struct EngineBuilder {
    config: DeliveryConfig,
    block: Arc<dyn BlockHandler>,
    observe: Arc<dyn ObserveHandler>,
    read_policy: Option<ReadErrorPolicy>,
    write_policy: Option<WriteErrorPolicy>,
}

impl EngineBuilder {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            block: Arc::new(NoopBlockHandler),
            observe: Arc::new(NoopObserveHandler),
            read_policy: None,
            write_policy: None,
        }
    }

    /// Inject the block-wise transfer collaborator
    pub fn block_handler(mut self, handler: Arc<dyn BlockHandler>) -> Self {
        self.block = handler;
        self
    }

    /// Inject the observe/subscription collaborator
    pub fn observe_handler(mut self, handler: Arc<dyn ObserveHandler>) -> Self {
        self.observe = handler;
        self
    }

    /// Inject the policy consulted on transport read failures
    pub fn read_error_policy(mut self, policy: ReadErrorPolicy) -> Self {
        self.read_policy = Some(policy);
        self
    }

    /// Inject the policy consulted on transport write failures
    pub fn write_error_policy(mut self, policy: WriteErrorPolicy) -> Self {
        self.write_policy = Some(policy);
        self
    }

    /// Open the transport and assemble the engine.
    pub async fn open(
        self,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
        callback: ResponseCallback,
    ) -> Result<DeliveryEngine> {
        self.config.validate()?;

        transport
            .open()
            .await
            .map_err(DeliveryError::TransportUnavailable)?;

        let starting_mid = self
            .config
            .starting_mid
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..=u16::MAX));

        let (stop, _) = watch::channel(false);

        let shared = Arc::new(EngineShared {
            config: self.config,
            transport,
            codec,
            callback,
            block: self.block,
            observe: self.observe,
            read_policy: self.read_policy,
            write_policy: self.write_policy,
            table: TransactionTable::new(),
            metrics: EngineMetrics::default(),
            current_mid: AtomicU16::new(starting_mid),
            stop_signals: Mutex::new(HashMap::new()),
            stop,
            write_lock: Mutex::new(()),
        });

        info!(starting_mid, "delivery engine open");

        Ok(DeliveryEngine {
            shared,
            receiver: Mutex::new(ReceiverSlot {
                started: false,
                handle: None,
            }),
            closed: AtomicBool::new(false),
        })
    }
}

/// Reliable-delivery engine over one point-to-point datagram transport.
pub struct DeliveryEngine {
    shared: Arc<EngineShared>,
    receiver: Mutex<ReceiverSlot>,
    closed: AtomicBool,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    /// Open an engine with default collaborators and policies.
    pub async fn open(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
        callback: ResponseCallback,
        config: DeliveryConfig,
    ) -> Result<Self> {
        EngineBuilder::new(config).open(transport, codec, callback).await
    }

    /// Send one message.
    ///
    /// Con/Non messages take the request path: collaborator layers, message
    /// id assignment, transaction registration, and - for Con -
    /// retransmission. Ack/Rst messages are control traffic sent directly
    /// with no transaction.
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }

        match message.mtype {
            MessageType::Con | MessageType::Non => self.send_request(message).await,
            MessageType::Ack | MessageType::Rst => self.send_control(message).await,
        }
    }

    async fn send_request(&self, request: Message) -> Result<()> {
        let shared = &self.shared;

        // Collaborator layers see the request before it is encoded
        let request = shared.observe.on_send(request);
        let mut request = shared.block.on_send(request);

        // Assign a fresh mid unless the caller pinned one
        let mid = match request.mid {
            Some(mid) => mid,
            None => {
                let mid = shared.next_mid();
                request.mid = Some(mid);
                mid
            }
        };

        let confirmable = request.is_confirmable();
        let suppress = request.suppresses_response();
        let mtype = request.mtype.as_str();
        let datagram = shared.codec.encode(&request)?;

        let transaction = Arc::new(Transaction::new(
            mid,
            request.token.clone(),
            request,
            datagram.clone(),
        ));
        shared.table.register(transaction.clone()).await?;

        debug!(mid, mtype, bytes = datagram.len(), "sending request");

        if let Err(e) = shared.send_raw(&datagram).await {
            shared.table.remove(mid).await;
            return Err(e);
        }

        if confirmable {
            retransmit::arm(shared, &transaction).await;
        }

        // The peer was asked for no response at all; do not start a receiver
        // on its account (a running one stays running).
        if suppress {
            return Ok(());
        }

        self.ensure_receiver().await;
        Ok(())
    }

    async fn send_control(&self, message: Message) -> Result<()> {
        let shared = &self.shared;

        let mut message = shared.observe.on_send_empty(message);
        if message.mid.is_none() {
            message.mid = Some(shared.next_mid());
        }

        let datagram = shared.codec.encode(&message)?;
        debug!(
            mid = message.mid.unwrap_or_default(),
            mtype = message.mtype.as_str(),
            "sending control message"
        );
        shared.send_raw(&datagram).await?;

        if message.suppresses_response() {
            return Ok(());
        }

        self.ensure_receiver().await;
        Ok(())
    }

    /// Start the receiver loop exactly once per engine.
    async fn ensure_receiver(&self) {
        let mut slot = self.receiver.lock().await;
        if slot.started {
            return;
        }
        slot.started = true;
        slot.handle = Some(tokio::spawn(receiver::run(self.shared.clone())));
        debug!("receiver loop spawned");
    }

    /// Stop the engine: fire the global stop flag and every live
    /// retransmission stop signal, join all background tasks, release the
    /// transport. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.stop.send_replace(true);

        // Unblock every in-flight retransmission wait
        let signals: Vec<_> = {
            let signals = self.shared.stop_signals.lock().await;
            signals.values().cloned().collect()
        };
        for signal in &signals {
            signal.send_replace(true);
        }

        // Join the retransmission tasks so no background work survives close
        for transaction in self.shared.table.transactions().await {
            let handle = {
                let mut state = transaction.state.lock().await;
                state.retransmit_task.take()
            };
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }

        // Join the receiver loop
        let handle = {
            let mut slot = self.receiver.lock().await;
            slot.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.shared.table.clear().await;

        if let Err(e) = self.shared.transport.close().await {
            warn!(error = %e, "transport close failed");
        }

        info!("delivery engine closed");
        Ok(())
    }

    /// The message id the next request will be assigned
    pub fn current_mid(&self) -> Mid {
        self.shared.current_mid.load(Ordering::Relaxed)
    }

    /// Override the message id counter (deterministic test setups)
    pub fn set_current_mid(&self, mid: Mid) {
        self.shared.current_mid.store(mid, Ordering::Relaxed);
    }

    /// Number of in-flight transactions
    pub async fn pending_transactions(&self) -> usize {
        self.shared.table.len().await
    }

    /// True once [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Point-in-time snapshot of the delivery counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        // Best-effort stop for an engine dropped without close(): background
        // tasks observe the signals and wind down on their own.
        self.shared.stop.send_replace(true);
        if let Ok(signals) = self.shared.stop_signals.try_lock() {
            for signal in signals.values() {
                signal.send_replace(true);
            }
        }
    }
}
