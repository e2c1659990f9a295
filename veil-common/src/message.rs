use crate::types::{
    Endorsement, ExecutionResult, Hash, MemberId, ProposalId, ProposalReceipt, ProposalStatus,
    TransactionProposal,
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Sent by clients to a node's client port.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum ClientRequest {
    Propose(TransactionProposal),
    Withdraw(ProposalId),
    Status(ProposalId),
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum ClientResponse {
    Receipt(ProposalReceipt),
    Status {
        proposal: ProposalId,
        status: Option<ProposalStatus>,
    },
}

/// Traffic between members of one privacy group.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum PeerMessage {
    EndorseRequest {
        request_id: u64,
        proposal: TransactionProposal,
        result_hash: Hash,
    },
    EndorseResponse {
        request_id: u64,
        response: EndorseResponse,
    },
    /// A transaction the ledger committed, with the endorsements that make
    /// its delta safe to apply on every replica.
    Committed {
        result: ExecutionResult,
        endorsements: Vec<Endorsement>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum EndorseResponse {
    Endorsed(Endorsement),
    /// Re-execution produced a different output hash.
    Mismatch { member: MemberId, actual: Hash },
    /// The member could not execute the proposal at all.
    Refused { member: MemberId, reason: String },
}

impl EndorseResponse {
    pub fn member(&self) -> MemberId {
        match self {
            EndorseResponse::Endorsed(endorsement) => endorsement.member,
            EndorseResponse::Mismatch { member, .. } | EndorseResponse::Refused { member, .. } => {
                *member
            }
        }
    }
}
