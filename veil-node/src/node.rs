use crate::client_actor::ClientActor;
use crate::config::Config;
use crate::contracts::StorageContract;
use crate::coordinator::Coordinator;
use crate::endorsement::{EndorsementService, GroupMember, LocalMember};
use crate::executor::{ContractRegistry, Executor};
use crate::ledger::TcpLedgerClient;
use crate::peer::{PeerActor, PeerRouter, RemoteMember};
use crate::state_store::PrivateStateStore;
use veil_common::crypto::publickey_to_base64;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::info;

pub fn contracts(config: &Config) -> ContractRegistry {
    ContractRegistry::new().register(
        "storage",
        StorageContract::new(config.public_storage_contract.clone()),
    )
}

/// A running member node: its coordinator and the member answering peers.
pub struct Node {
    pub coordinator: Arc<Coordinator>,
    pub member: Arc<LocalMember>,
}

/// Wires the node together and starts its peer and client listeners.
/// Must be called inside a tokio runtime.
pub async fn start(mut config: Config) -> Result<Node> {
    let keypair = config
        .my_keypair
        .take()
        .ok_or_else(|| anyhow!("my keypair not initialized"))?;
    let me = keypair.public.to_bytes();
    let group = Arc::new(config.group());
    let store = PrivateStateStore::new();
    let executor = Executor::new(contracts(&config));

    let member = Arc::new(LocalMember::new(
        Arc::new(keypair),
        group.clone(),
        store.clone(),
        executor.clone(),
    ));
    let router = PeerRouter::spawn();
    let mut members: Vec<Arc<dyn GroupMember>> = vec![member.clone()];
    for (id, addr) in &config.peer_addresses {
        if *id != me {
            members.push(Arc::new(RemoteMember::new(*id, *addr, router.clone())));
        }
    }
    let endorsement = EndorsementService::new(group.clone(), members, config.endorsement_timeout)?;
    let ledger = Arc::new(TcpLedgerClient::spawn(
        config.ledger_addr,
        config.ledger_timeout,
    ));
    let coordinator = Arc::new(Coordinator::new(
        me,
        store,
        executor,
        endorsement,
        ledger,
    )?);

    PeerActor::spawn(config.peer_listen_addr, member.clone()).await?;
    ClientActor::spawn(config.client_listen_addr, coordinator.clone()).await?;
    info!(
        "node {} up, group {} with {} members, peers on {}, clients on {}",
        publickey_to_base64(me),
        group.name,
        group.len(),
        config.peer_listen_addr,
        config.client_listen_addr
    );
    Ok(Node {
        coordinator,
        member,
    })
}
