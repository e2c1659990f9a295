use crate::crypto;

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};

/// Public key bytes of a privacy group member node.
pub type MemberId = [u8; 32];
pub type Hash = [u8; 32];
pub type GroupId = [u8; 32];
pub type ProposalId = Hash;

/// Writes produced by a private execution, `None` deletes the key.
pub type StateDelta = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Closed set of nodes allowed to execute and endorse private transactions.
///
/// Membership is managed outside the node and is never mutated by it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PrivacyGroup {
    pub name: String,
    pub members: BTreeSet<MemberId>,
}

impl PrivacyGroup {
    pub fn new(name: impl Into<String>, members: impl IntoIterator<Item = MemberId>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().collect(),
        }
    }

    pub fn id(&self) -> GroupId {
        crypto::hash_of(self)
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionProposal {
    pub group: GroupId,
    pub caller: [u8; 32],
    pub contract: String,
    pub method: String,
    pub args: BTreeMap<String, Vec<u8>>,
    /// Public ledger data the caller read beforehand and hands in explicitly.
    pub public_inputs: BTreeMap<String, Vec<u8>>,
    pub nonce: u64,
}

impl TransactionProposal {
    /// The input hash, doubles as the proposal id.
    pub fn id(&self) -> ProposalId {
        crypto::hash_of(self)
    }
}

/// One-directional write from the private context to the public ledger.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OutboundCall {
    pub target: Vec<u8>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExecutionResult {
    pub proposal: ProposalId,
    pub delta: StateDelta,
    /// Version of every delta key in the state the result was computed on.
    /// Replicas apply the delta only on top of exactly these versions.
    pub base_versions: BTreeMap<Vec<u8>, u64>,
    pub outbound_calls: Vec<OutboundCall>,
    /// Return data of the call, handed back to the caller in its receipt.
    pub output: Vec<u8>,
}

impl ExecutionResult {
    /// The output hash every endorser has to reproduce.
    pub fn hash(&self) -> Hash {
        crypto::hash_of(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Endorsement {
    pub member: MemberId,
    pub signature: Vec<u8>,
}

impl Endorsement {
    /// Bytes a member signs when endorsing `output_hash` for `proposal`.
    pub fn message(group: &GroupId, proposal: &ProposalId, output_hash: &Hash) -> Vec<u8> {
        let mut msg = Vec::with_capacity(96);
        msg.extend_from_slice(group);
        msg.extend_from_slice(proposal);
        msg.extend_from_slice(output_hash);
        msg
    }

    pub fn verify(&self, group: &GroupId, proposal: &ProposalId, output_hash: &Hash) -> bool {
        crypto::verify(
            &self.member,
            &Self::message(group, proposal, output_hash),
            &self.signature,
        )
    }
}

/// What the public ledger sees of a private transaction: commitments,
/// signatures and outbound calls, never private state.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FinalizedTransaction {
    pub group: GroupId,
    pub input_hash: Hash,
    pub output_hash: Hash,
    pub endorsements: Vec<Endorsement>,
    pub outbound_calls: Vec<OutboundCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum LedgerStatus {
    Committed,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerReceipt {
    pub input_hash: Hash,
    pub status: LedgerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ProposalStatus {
    Proposed,
    Assembled,
    Endorsed,
    Submitted,
    Committed,
    Rejected,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Committed | ProposalStatus::Rejected)
    }

    /// Withdrawal is only possible while nothing has reached the ledger.
    pub fn can_withdraw(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Proposed | ProposalStatus::Assembled | ProposalStatus::Endorsed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalReceipt {
    pub proposal: ProposalId,
    pub status: ProposalStatus,
    pub reason: Option<String>,
    /// Return data of a committed call.
    pub output: Option<Vec<u8>>,
}
