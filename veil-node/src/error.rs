use crate::executor::ExecutionError;
use crate::state_store::StoreError;
use veil_common::{crypto::publickey_to_base64, MemberId, ProposalStatus};

use thiserror::Error;

fn member_b64(id: &MemberId) -> String {
    publickey_to_base64(*id)
}

/// Why a proposal did not reach `Committed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("proposal targets another privacy group")]
    WrongGroup,
    #[error("proposal is already known to this coordinator")]
    DuplicateProposal,
    #[error("unknown proposal")]
    UnknownProposal,
    #[error("public input {0} must be supplied with the proposal")]
    MissingPublicInput(String),
    #[error("assembly failed: {0}")]
    Execution(ExecutionError),
    #[error("state conflict: {0}")]
    State(#[from] StoreError),
    #[error("member {} computed a different result", member_b64(.member))]
    EndorsementMismatch { member: MemberId },
    #[error("member {} refused to endorse: {reason}", member_b64(.member))]
    EndorsementRefused { member: MemberId, reason: String },
    #[error("invalid endorsement from member {}", member_b64(.member))]
    InvalidEndorsement { member: MemberId },
    #[error("endorsement timed out, {} member(s) did not answer", .missing.len())]
    EndorsementTimeout { missing: Vec<MemberId> },
    #[error("no handle for group member {}", member_b64(.0))]
    IncompleteGroup(MemberId),
    #[error("{} is not a member of the privacy group", member_b64(.0))]
    NotGroupMember(MemberId),
    #[error("ledger submission failed: {0}")]
    LedgerSubmissionFailure(String),
    #[error("proposal was withdrawn")]
    Withdrawn,
    #[error("proposal is {0:?} and can no longer be withdrawn")]
    CannotWithdraw(ProposalStatus),
    #[error("proposal was already submitted to the ledger")]
    AlreadySubmitted,
    #[error("peer transport: {0}")]
    Network(String),
}

impl From<ExecutionError> for CoordinatorError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::MissingPublicInput(name) => CoordinatorError::MissingPublicInput(name),
            other => CoordinatorError::Execution(other),
        }
    }
}

#[cfg(test)]
mod error_test {
    use super::*;

    #[test]
    fn member_errors_name_the_member_in_base64() {
        let member = [3; 32];
        let b64 = publickey_to_base64(member);
        assert_eq!(
            CoordinatorError::EndorsementMismatch { member }.to_string(),
            format!("member {} computed a different result", b64)
        );
        assert!(CoordinatorError::EndorsementRefused {
            member,
            reason: "busy".into()
        }
        .to_string()
        .ends_with(&format!("{} refused to endorse: busy", b64)));
        assert!(CoordinatorError::NotGroupMember(member)
            .to_string()
            .starts_with(&b64));
    }

    #[test]
    fn missing_public_input_keeps_its_own_variant() {
        assert_eq!(
            CoordinatorError::from(ExecutionError::MissingPublicInput("y".into())),
            CoordinatorError::MissingPublicInput("y".into())
        );
        assert_eq!(
            CoordinatorError::from(ExecutionError::Reverted("no".into())),
            CoordinatorError::Execution(ExecutionError::Reverted("no".into()))
        );
    }
}
