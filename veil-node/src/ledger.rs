use veil_common::{
    crypto::short, FinalizedTransaction, Hash, LedgerReceipt, LedgerStatus,
};
use veil_network::{Client, Envelope, Server};

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};
use futures::{future::BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc::Sender, oneshot, Notify};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unreachable: {0}")]
    Transport(String),
    #[error("no receipt within {0:?}")]
    Timeout(Duration),
}

/// Outbound boundary to the shared public ledger.
///
/// Only finalized transactions go out and only their receipts come back;
/// there is no channel to read public state.
pub trait PublicLedger: Send + Sync {
    fn submit(&self, tx: FinalizedTransaction) -> BoxFuture<'_, Result<LedgerReceipt, LedgerError>>;
}

/// In-process ledger. Backs the stub ledger binary and the tests.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<MemoryLedgerInner>>,
    gate: Option<Arc<Notify>>,
}

#[derive(Default)]
struct MemoryLedgerInner {
    committed: Vec<FinalizedTransaction>,
    seen: HashSet<Hash>,
    submissions: usize,
    fail_next: Option<String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission waits for one `notify_one` on `gate` first.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next submission fails at the transport level with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.lock().fail_next = Some(reason.into());
    }

    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    pub fn committed(&self) -> Vec<FinalizedTransaction> {
        self.lock().committed.clone()
    }

    /// Includes `tx` unless it was seen before or carries no endorsements.
    pub fn receive(&self, tx: FinalizedTransaction) -> LedgerReceipt {
        let mut inner = self.lock();
        inner.submissions += 1;
        let input_hash = tx.input_hash;
        let status = if tx.endorsements.is_empty() {
            LedgerStatus::Rejected("no endorsements".into())
        } else if !inner.seen.insert(input_hash) {
            LedgerStatus::Rejected("duplicate submission".into())
        } else {
            for call in &tx.outbound_calls {
                info!(
                    "outbound call to {} ({} bytes)",
                    String::from_utf8_lossy(&call.target),
                    call.payload.len()
                );
            }
            inner.committed.push(tx);
            LedgerStatus::Committed
        };
        debug!("ledger {:?} for {}", status, short(&input_hash));
        LedgerReceipt { input_hash, status }
    }
}

impl PublicLedger for MemoryLedger {
    fn submit(&self, tx: FinalizedTransaction) -> BoxFuture<'_, Result<LedgerReceipt, LedgerError>> {
        async move {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let failure = {
                let mut inner = self.lock();
                inner.fail_next.take().map(|reason| {
                    inner.submissions += 1;
                    reason
                })
            };
            match failure {
                Some(reason) => Err(LedgerError::Transport(reason)),
                None => Ok(self.receive(tx)),
            }
        }
        .boxed()
    }
}

/// Serves `ledger` on `addr`: each frame is a finalized transaction and is
/// answered with its receipt.
pub async fn serve(addr: SocketAddr, ledger: MemoryLedger) -> io::Result<()> {
    let (reply, mut requests) = Server::spawn(addr).await?;
    tokio::spawn(async move {
        while let Some((from, bytes)) = requests.recv().await {
            let tx = match FinalizedTransaction::try_from_slice(&bytes) {
                Ok(tx) => tx,
                Err(e) => {
                    error!("bad transaction from {}: {}", from, e);
                    continue;
                }
            };
            let receipt = match ledger.receive(tx).try_to_vec() {
                Ok(receipt) => receipt,
                Err(e) => {
                    error!("encode receipt: {}", e);
                    continue;
                }
            };
            if reply.send((from, receipt.into())).await.is_err() {
                return;
            }
        }
    });
    Ok(())
}

type Waiters = Arc<Mutex<HashMap<Hash, oneshot::Sender<LedgerReceipt>>>>;

/// Talks to a ledger endpoint over the framed TCP transport.
pub struct TcpLedgerClient {
    ledger_addr: SocketAddr,
    timeout: Duration,
    sender: Sender<Envelope>,
    waiters: Waiters,
}

impl TcpLedgerClient {
    /// Must be called inside a tokio runtime.
    pub fn spawn(ledger_addr: SocketAddr, timeout: Duration) -> Self {
        let (sender, mut receiver) = Client::spawn();
        let waiters: Waiters = Default::default();
        let dispatch = waiters.clone();
        tokio::spawn(async move {
            while let Some((addr, bytes)) = receiver.recv().await {
                match LedgerReceipt::try_from_slice(&bytes) {
                    Ok(receipt) => {
                        let waiter = dispatch
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&receipt.input_hash);
                        match waiter {
                            Some(waiter) => {
                                let _ = waiter.send(receipt);
                            }
                            None => warn!("unexpected receipt {}", short(&receipt.input_hash)),
                        }
                    }
                    Err(e) => error!("bad receipt from {}: {}", addr, e),
                }
            }
        });
        Self {
            ledger_addr,
            timeout,
            sender,
            waiters,
        }
    }

    fn forget(&self, input_hash: &Hash) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(input_hash);
    }

    async fn submit_once(&self, tx: FinalizedTransaction) -> Result<LedgerReceipt, LedgerError> {
        let input_hash = tx.input_hash;
        let bytes = tx
            .try_to_vec()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let (waiter, receipt) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(input_hash, waiter);
        if self
            .sender
            .send((self.ledger_addr, bytes.into()))
            .await
            .is_err()
        {
            self.forget(&input_hash);
            return Err(LedgerError::Transport("transport closed".into()));
        }
        match tokio::time::timeout(self.timeout, receipt).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(_)) => Err(LedgerError::Transport("receipt channel dropped".into())),
            Err(_) => {
                self.forget(&input_hash);
                Err(LedgerError::Timeout(self.timeout))
            }
        }
    }
}

impl PublicLedger for TcpLedgerClient {
    fn submit(&self, tx: FinalizedTransaction) -> BoxFuture<'_, Result<LedgerReceipt, LedgerError>> {
        self.submit_once(tx).boxed()
    }
}
