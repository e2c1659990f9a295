use crate::{config::Config, transaction::{CallTemplate, TransactionManager}};
use veil_common::{crypto::short, ClientRequest, ClientResponse, ProposalId, ProposalStatus};
use veil_network::Envelope;

use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use log::{info, trace, warn};
use tokio::sync::mpsc::{Receiver, Sender};

/// Drives proposals against one node, keeping at most `window` in flight.
pub struct Client {
    node_addr: SocketAddr,
    net_sender: Sender<Envelope>,
    net_receiver: Receiver<Envelope>,
    pub transaction_manager: TransactionManager,
}

impl Client {
    pub fn new(config: &Config, template: CallTemplate) -> Self {
        trace!("new client with config: {:?}", config);
        let (net_sender, net_receiver) = veil_network::Client::spawn();
        Self {
            node_addr: config.node_addr,
            net_sender,
            net_receiver,
            transaction_manager: TransactionManager::new(config.group_id, config.caller, template),
        }
    }

    pub async fn run(&mut self, count: u64, window: u64) -> Result<()> {
        let mut sent = 0;
        while sent < count || self.transaction_manager.pending_sum() > 0 {
            while sent < count && self.transaction_manager.pending_sum() < window.max(1) {
                let proposal = self.transaction_manager.next();
                trace!("sending proposal {}", short(&proposal.id()));
                self.send(ClientRequest::Propose(proposal)).await?;
                sent += 1;
            }
            match self.receive().await? {
                ClientResponse::Receipt(receipt) => {
                    self.transaction_manager.collect_receipt(receipt)?
                }
                ClientResponse::Status { proposal, status } => {
                    warn!("unexpected status for {}: {:?}", short(&proposal), status)
                }
            }
        }
        let m = &self.transaction_manager;
        info!(
            "{} committed, {} rejected, average latency {} ms",
            m.committed_sum(),
            m.rejected_sum(),
            m.average_latency()
                .map_or(0, |latency| latency.num_milliseconds())
        );
        Ok(())
    }

    /// Asks the node to withdraw a proposal and returns its state afterwards.
    pub async fn withdraw(&mut self, id: ProposalId) -> Result<Option<ProposalStatus>> {
        self.send(ClientRequest::Withdraw(id)).await?;
        self.await_status(id).await
    }

    pub async fn status(&mut self, id: ProposalId) -> Result<Option<ProposalStatus>> {
        self.send(ClientRequest::Status(id)).await?;
        self.await_status(id).await
    }

    async fn await_status(&mut self, id: ProposalId) -> Result<Option<ProposalStatus>> {
        loop {
            match self.receive().await? {
                ClientResponse::Status { proposal, status } if proposal == id => return Ok(status),
                ClientResponse::Receipt(receipt) => {
                    self.transaction_manager.collect_receipt(receipt)?
                }
                ClientResponse::Status { .. } => {}
            }
        }
    }

    async fn send(&self, request: ClientRequest) -> Result<()> {
        let bytes = request.try_to_vec()?;
        self.net_sender
            .send((self.node_addr, bytes.into()))
            .await
            .map_err(|_| anyhow!("network disconnected"))
    }

    async fn receive(&mut self) -> Result<ClientResponse> {
        let (addr, bytes) = self
            .net_receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("network disconnected"))?;
        trace!("response from {}", addr);
        Ok(ClientResponse::try_from_slice(&bytes)?)
    }
}
