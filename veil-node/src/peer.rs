use crate::endorsement::{GroupMember, LocalMember};
use crate::error::CoordinatorError;
use veil_common::{
    crypto::short, EndorseResponse, Endorsement, ExecutionResult, Hash, MemberId, PeerMessage,
    TransactionProposal,
};
use veil_network::{Client, Envelope, Server};

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use borsh::{BorshDeserialize, BorshSerialize};
use futures::{future::BoxFuture, FutureExt};
use log::{error, trace, warn};
use tokio::sync::{
    mpsc::{Receiver, Sender},
    oneshot,
};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<EndorseResponse>>>>;

/// Outgoing side of the member-to-member protocol. Endorse responses are
/// matched to their requests by request id.
#[derive(Clone)]
pub struct PeerRouter {
    sender: Sender<Envelope>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
}

impl PeerRouter {
    pub fn spawn() -> Self {
        let (sender, receiver) = Client::spawn();
        let pending: Pending = Default::default();
        tokio::spawn(dispatch_responses(receiver, pending.clone()));
        Self {
            sender,
            pending,
            next_id: Default::default(),
        }
    }

    async fn send(&self, addr: SocketAddr, msg: &PeerMessage) -> Result<(), CoordinatorError> {
        let bytes = msg
            .try_to_vec()
            .map_err(|e| CoordinatorError::Network(e.to_string()))?;
        self.sender
            .send((addr, bytes.into()))
            .await
            .map_err(|_| CoordinatorError::Network("peer transport closed".into()))
    }

    async fn request_endorsement(
        &self,
        addr: SocketAddr,
        proposal: &TransactionProposal,
        result_hash: Hash,
    ) -> Result<EndorseResponse, CoordinatorError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, tx);
        // Dropped with the future, so timed out requests leave nothing behind.
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };
        let msg = PeerMessage::EndorseRequest {
            request_id,
            proposal: proposal.clone(),
            result_hash,
        };
        self.send(addr, &msg).await?;
        rx.await
            .map_err(|_| CoordinatorError::Network("response channel dropped".into()))
    }
}

struct PendingGuard<'a> {
    pending: &'a Pending,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}

async fn dispatch_responses(mut receiver: Receiver<Envelope>, pending: Pending) {
    while let Some((addr, bytes)) = receiver.recv().await {
        match PeerMessage::try_from_slice(&bytes) {
            Ok(PeerMessage::EndorseResponse {
                request_id,
                response,
            }) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => trace!("late endorse response {} from {}", request_id, addr),
                }
            }
            Ok(_) => warn!("unexpected peer message from {}", addr),
            Err(e) => error!("bad peer message from {}: {}", addr, e),
        }
    }
}

/// A group member reached over the network.
pub struct RemoteMember {
    id: MemberId,
    addr: SocketAddr,
    router: PeerRouter,
}

impl RemoteMember {
    pub fn new(id: MemberId, addr: SocketAddr, router: PeerRouter) -> Self {
        Self { id, addr, router }
    }
}

impl GroupMember for RemoteMember {
    fn id(&self) -> MemberId {
        self.id
    }

    fn endorse<'a>(
        &'a self,
        proposal: &'a TransactionProposal,
        result_hash: Hash,
    ) -> BoxFuture<'a, Result<EndorseResponse, CoordinatorError>> {
        async move {
            let response = self
                .router
                .request_endorsement(self.addr, proposal, result_hash)
                .await?;
            if response.member() != self.id {
                return Err(CoordinatorError::InvalidEndorsement {
                    member: response.member(),
                });
            }
            Ok(response)
        }
        .boxed()
    }

    fn notify_committed<'a>(
        &'a self,
        result: &'a ExecutionResult,
        endorsements: &'a [Endorsement],
    ) -> BoxFuture<'a, Result<(), CoordinatorError>> {
        async move {
            let msg = PeerMessage::Committed {
                result: result.clone(),
                endorsements: endorsements.to_vec(),
            };
            self.router.send(self.addr, &msg).await
        }
        .boxed()
    }
}

/// Serves endorse requests and commit notifications from other members.
pub struct PeerActor {
    member: Arc<LocalMember>,
    net_sender: Sender<Envelope>,
    net_receiver: Receiver<Envelope>,
}

impl PeerActor {
    pub async fn spawn(listen_addr: SocketAddr, member: Arc<LocalMember>) -> io::Result<()> {
        let (net_sender, net_receiver) = Server::spawn(listen_addr).await?;
        tokio::spawn(async move {
            Self {
                member,
                net_sender,
                net_receiver,
            }
            .run()
            .await
        });
        Ok(())
    }

    async fn run(&mut self) {
        while let Some((addr, bytes)) = self.net_receiver.recv().await {
            match PeerMessage::try_from_slice(&bytes) {
                Ok(PeerMessage::EndorseRequest {
                    request_id,
                    proposal,
                    result_hash,
                }) => {
                    trace!("endorse request {} from {}", request_id, addr);
                    let member = self.member.clone();
                    let net_sender = self.net_sender.clone();
                    tokio::spawn(async move {
                        let response = member.endorse_now(&proposal, result_hash);
                        let reply = PeerMessage::EndorseResponse {
                            request_id,
                            response,
                        };
                        match reply.try_to_vec() {
                            Ok(bytes) => {
                                if net_sender.send((addr, bytes.into())).await.is_err() {
                                    warn!("peer server closed before replying to {}", addr);
                                }
                            }
                            Err(e) => error!("encode endorse response: {}", e),
                        }
                    });
                }
                Ok(PeerMessage::Committed {
                    result,
                    endorsements,
                }) => {
                    if let Err(e) = self.member.apply_committed(&result, &endorsements) {
                        warn!(
                            "ignored commit of {} from {}: {}",
                            short(&result.proposal),
                            addr,
                            e
                        );
                    }
                }
                Ok(PeerMessage::EndorseResponse { .. }) => {
                    warn!("endorse response arrived on the server side from {}", addr)
                }
                Err(e) => error!("bad peer message from {}: {}", addr, e),
            }
        }
    }
}
