//! Transaction bookkeeping
//!
//! A [`Transaction`] binds one outbound message to its eventual resolution;
//! the [`TransactionTable`] owns the set of in-flight transactions, keyed by
//! message id with a secondary token index for separate responses.

use crate::error::{DeliveryError, Result};
use crate::message::{Message, Mid, Token};

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

/// Mutable per-transaction state, guarded by the transaction's own lock.
///
/// The receiver loop and the retransmission task both mutate this; the lock
/// is what makes "check outcome, maybe resend" atomic against "mark
/// acknowledged, stop retransmission".
pub(crate) struct TransactionState {
    /// The owning request
    pub request: Message,
    /// The original encoded datagram; retransmissions resend exactly these
    /// bytes
    pub datagram: Bytes,
    /// The response, once one has arrived
    pub response: Option<Message>,
    /// Handle of the active retransmission task, if one is running
    pub retransmit_task: Option<tokio::task::JoinHandle<()>>,
    /// Stop signal for the active retransmission task
    pub retransmit_stop: Option<watch::Sender<bool>>,
    /// Retransmissions performed so far
    pub retry_count: u32,
    /// The block-transfer collaborator flagged the exchange as incomplete
    pub block_in_progress: bool,
    /// The observe collaborator flagged this as an active subscription
    pub observed: bool,
}

/// One outbound message tracked through to resolution.
pub struct Transaction {
    mid: Mid,
    token: Token,
    pub(crate) state: Mutex<TransactionState>,
}

impl Transaction {
    /// Create a transaction for an encoded outbound request.
    pub(crate) fn new(mid: Mid, token: Token, request: Message, datagram: Bytes) -> Self {
        Self {
            mid,
            token,
            state: Mutex::new(TransactionState {
                request,
                datagram,
                response: None,
                retransmit_task: None,
                retransmit_stop: None,
                retry_count: 0,
                block_in_progress: false,
                observed: false,
            }),
        }
    }

    /// Message id of the owning request
    pub fn mid(&self) -> Mid {
        self.mid
    }

    /// Correlation token of the owning request
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The response, once one has arrived
    pub async fn response(&self) -> Option<Message> {
        self.state.lock().await.response.clone()
    }

    /// True when the observe collaborator flagged this exchange as an
    /// active subscription
    pub async fn is_observed(&self) -> bool {
        self.state.lock().await.observed
    }
}

struct TableInner {
    by_mid: HashMap<Mid, Arc<Transaction>>,
    by_token: HashMap<Token, Mid>,
}

/// In-flight transaction map.
///
/// Safe to call from the receiver loop and any retransmission task
/// concurrently; a single guard over both indexes keeps them consistent.
pub struct TransactionTable {
    inner: RwLock<TableInner>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner {
                by_mid: HashMap::new(),
                by_token: HashMap::new(),
            }),
        }
    }

    /// Insert a transaction. Fails with [`DeliveryError::DuplicateMid`] when
    /// a live entry already holds the key; the caller must pick a fresh mid.
    pub async fn register(&self, transaction: Arc<Transaction>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mid = transaction.mid();
        if inner.by_mid.contains_key(&mid) {
            return Err(DeliveryError::DuplicateMid { mid });
        }
        if !transaction.token().is_empty() {
            inner.by_token.insert(transaction.token().clone(), mid);
        }
        inner.by_mid.insert(mid, transaction);
        Ok(())
    }

    /// Look up a transaction by message id
    pub async fn lookup_by_mid(&self, mid: Mid) -> Option<Arc<Transaction>> {
        let inner = self.inner.read().await;
        inner.by_mid.get(&mid).cloned()
    }

    /// Look up a transaction by its request token
    pub async fn lookup_by_token(&self, token: &[u8]) -> Option<Arc<Transaction>> {
        let inner = self.inner.read().await;
        let mid = inner.by_token.get(token)?;
        inner.by_mid.get(mid).cloned()
    }

    /// Remove a transaction; no-op when absent
    pub async fn remove(&self, mid: Mid) -> Option<Arc<Transaction>> {
        let mut inner = self.inner.write().await;
        let transaction = inner.by_mid.remove(&mid)?;
        // Only drop the token entry if it still points at this transaction;
        // a newer exchange may have reused the token.
        if let Some(indexed) = inner.by_token.get(transaction.token()) {
            if *indexed == mid {
                let token = transaction.token().clone();
                inner.by_token.remove(&token);
            }
        }
        Some(transaction)
    }

    /// Drop every entry; used at engine shutdown
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.by_mid.clear();
        inner.by_token.clear();
    }

    /// All live transactions
    pub async fn transactions(&self) -> Vec<Arc<Transaction>> {
        let inner = self.inner.read().await;
        inner.by_mid.values().cloned().collect()
    }

    /// Number of live transactions
    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.by_mid.len()
    }

    /// True when no transactions are in flight
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}
