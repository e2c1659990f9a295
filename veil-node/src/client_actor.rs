use crate::coordinator::Coordinator;
use veil_common::{crypto::short, ClientRequest, ClientResponse};
use veil_network::{Envelope, Server};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use log::{error, trace, warn};
use tokio::sync::mpsc::{Receiver, Sender};

/// Accepts proposals from clients. Every proposal gets its own pipeline task
/// and the receipt goes back to the connection it came from.
pub struct ClientActor {
    coordinator: Arc<Coordinator>,
    net_sender: Sender<Envelope>,
    net_receiver: Receiver<Envelope>,
}

impl ClientActor {
    pub async fn spawn(listen_addr: SocketAddr, coordinator: Arc<Coordinator>) -> io::Result<()> {
        let (net_sender, net_receiver) = Server::spawn(listen_addr).await?;
        tokio::spawn(async move {
            Self {
                coordinator,
                net_sender,
                net_receiver,
            }
            .run()
            .await
        });
        Ok(())
    }

    async fn run(&mut self) {
        while let Some((addr, msg_bytes)) = self.net_receiver.recv().await {
            let request = match ClientRequest::try_from_slice(&msg_bytes) {
                Ok(request) => request,
                Err(e) => {
                    error!("bad client request from {}: {}", addr, e);
                    continue;
                }
            };
            match request {
                ClientRequest::Propose(proposal) => {
                    trace!("received proposal {} from {}", short(&proposal.id()), addr);
                    let coordinator = self.coordinator.clone();
                    let net_sender = self.net_sender.clone();
                    tokio::spawn(async move {
                        let receipt = coordinator.propose(proposal).await;
                        reply(&net_sender, addr, ClientResponse::Receipt(receipt)).await;
                    });
                }
                ClientRequest::Withdraw(proposal) => {
                    if let Err(e) = self.coordinator.withdraw(&proposal) {
                        warn!("withdraw {} from {}: {}", short(&proposal), addr, e);
                    }
                    let status = self.coordinator.status(&proposal);
                    reply(
                        &self.net_sender,
                        addr,
                        ClientResponse::Status { proposal, status },
                    )
                    .await;
                }
                ClientRequest::Status(proposal) => {
                    let status = self.coordinator.status(&proposal);
                    reply(
                        &self.net_sender,
                        addr,
                        ClientResponse::Status { proposal, status },
                    )
                    .await;
                }
            }
        }
    }
}

async fn reply(net_sender: &Sender<Envelope>, addr: SocketAddr, response: ClientResponse) {
    match response.try_to_vec() {
        Ok(bytes) => {
            if net_sender.send((addr, bytes.into())).await.is_err() {
                warn!("client server closed before replying to {}", addr);
            }
        }
        Err(e) => error!("encode client response: {}", e),
    }
}
