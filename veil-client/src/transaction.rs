use veil_common::{
    crypto::short, GroupId, MemberId, ProposalId, ProposalReceipt, ProposalStatus,
    TransactionProposal,
};

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Local};
use log::{error, info, warn};
use rand::{thread_rng, Rng};

type TransactionTimestamp = (DateTime<Local>, DateTime<Local>);

/// What every generated proposal calls.
#[derive(Clone, Debug)]
pub struct CallTemplate {
    pub contract: String,
    pub method: String,
    pub args: BTreeMap<String, Vec<u8>>,
    pub public_inputs: BTreeMap<String, Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct TransactionManager {
    group: GroupId,
    caller: MemberId,
    template: CallTemplate,
    nonce: u64,
    pending_transactions: HashMap<ProposalId, DateTime<Local>>,
    committed_transactions: HashMap<ProposalId, TransactionTimestamp>,
    rejected_transactions: HashMap<ProposalId, String>,
}

impl TransactionManager {
    pub fn new(group: GroupId, caller: MemberId, template: CallTemplate) -> Self {
        Self {
            group,
            caller,
            template,
            // Random start so restarted clients don't collide with earlier ids.
            nonce: thread_rng().gen(),
            pending_transactions: Default::default(),
            committed_transactions: Default::default(),
            rejected_transactions: Default::default(),
        }
    }

    pub fn next(&mut self) -> TransactionProposal {
        let proposal = TransactionProposal {
            group: self.group,
            caller: self.caller,
            contract: self.template.contract.clone(),
            method: self.template.method.clone(),
            args: self.template.args.clone(),
            public_inputs: self.template.public_inputs.clone(),
            nonce: self.nonce,
        };
        self.nonce = self.nonce.wrapping_add(1);
        self.pending_transactions.insert(proposal.id(), Local::now());
        proposal
    }

    pub fn collect_receipt(&mut self, receipt: ProposalReceipt) -> Result<()> {
        let Some(start) = self.pending_transactions.remove(&receipt.proposal) else {
            error!("unknown proposal id: {}", short(&receipt.proposal));
            return Ok(());
        };
        match receipt.status {
            ProposalStatus::Committed => {
                let end = Local::now();
                info!(
                    "proposal {} committed in {} ms",
                    short(&receipt.proposal),
                    (end - start).num_milliseconds()
                );
                if let Some(value) = receipt
                    .output
                    .as_deref()
                    .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                {
                    info!(
                        "proposal {} returned {}",
                        short(&receipt.proposal),
                        u64::from_le_bytes(value)
                    );
                }
                self.committed_transactions
                    .insert(receipt.proposal, (start, end));
            }
            ProposalStatus::Rejected => {
                let reason = receipt.reason.unwrap_or_default();
                warn!("proposal {} rejected: {}", short(&receipt.proposal), reason);
                self.rejected_transactions.insert(receipt.proposal, reason);
            }
            status => {
                self.pending_transactions.insert(receipt.proposal, start);
                return Err(anyhow!(
                    "receipt for {} carries non-final status {:?}",
                    short(&receipt.proposal),
                    status
                ));
            }
        }
        Ok(())
    }

    pub fn pending_sum(&self) -> u64 {
        self.pending_transactions.len() as u64
    }

    pub fn committed_sum(&self) -> u64 {
        self.committed_transactions.len() as u64
    }

    pub fn rejected_sum(&self) -> u64 {
        self.rejected_transactions.len() as u64
    }

    pub fn rejection(&self, id: &ProposalId) -> Option<&str> {
        self.rejected_transactions.get(id).map(String::as_str)
    }

    pub fn average_latency(&self) -> Option<Duration> {
        let n = self.committed_transactions.len() as i32;
        if n == 0 {
            return None;
        }
        let total = self
            .committed_transactions
            .values()
            .fold(Duration::zero(), |acc, (start, end)| acc + (*end - *start));
        Some(total / n)
    }
}
