use crate::error::CoordinatorError;
use crate::executor::Executor;
use crate::state_store::{PrivateStateStore, StoreError};
use veil_common::{
    crypto::{self, short},
    EndorseResponse, Endorsement, ExecutionResult, Hash, MemberId, PrivacyGroup,
    TransactionProposal,
};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ed25519_dalek::Keypair;
use futures::{
    future::{self, BoxFuture},
    stream::FuturesUnordered,
    FutureExt, StreamExt,
};
use log::{debug, trace, warn};
use tokio::time::{timeout_at, Instant};

/// One member of the privacy group as seen by a coordinator.
pub trait GroupMember: Send + Sync {
    fn id(&self) -> MemberId;

    /// Re-executes `proposal` on the member's own state and endorses it if
    /// the output hash equals `result_hash`.
    fn endorse<'a>(
        &'a self,
        proposal: &'a TransactionProposal,
        result_hash: Hash,
    ) -> BoxFuture<'a, Result<EndorseResponse, CoordinatorError>>;

    /// Hands a ledger-committed result to the member so it can apply the delta.
    fn notify_committed<'a>(
        &'a self,
        result: &'a ExecutionResult,
        endorsements: &'a [Endorsement],
    ) -> BoxFuture<'a, Result<(), CoordinatorError>>;
}

/// Committed results that arrived before one of their predecessors.
const MAX_PARKED: usize = 256;

/// The member running in this process, with its own store copy and executor.
pub struct LocalMember {
    keypair: Arc<Keypair>,
    group: Arc<PrivacyGroup>,
    store: PrivateStateStore,
    executor: Executor,
    parked: Mutex<Vec<ExecutionResult>>,
}

impl LocalMember {
    pub fn new(
        keypair: Arc<Keypair>,
        group: Arc<PrivacyGroup>,
        store: PrivateStateStore,
        executor: Executor,
    ) -> Self {
        Self {
            keypair,
            group,
            store,
            executor,
            parked: Default::default(),
        }
    }

    pub fn store(&self) -> &PrivateStateStore {
        &self.store
    }

    pub fn endorse_now(&self, proposal: &TransactionProposal, result_hash: Hash) -> EndorseResponse {
        let member = self.id();
        let group_id = self.group.id();
        if proposal.group != group_id {
            return EndorseResponse::Refused {
                member,
                reason: "proposal targets another privacy group".into(),
            };
        }
        let result = match self.executor.execute(proposal, &self.store.snapshot()) {
            Ok(result) => result,
            Err(e) => {
                return EndorseResponse::Refused {
                    member,
                    reason: e.to_string(),
                }
            }
        };
        let proposal_id = proposal.id();
        if let Some(key) = self.store.conflict(&proposal_id, &result.delta) {
            return EndorseResponse::Refused {
                member,
                reason: format!("key {key} is locked by another proposal"),
            };
        }
        let actual = result.hash();
        if actual != result_hash {
            debug!(
                "proposal {} re-executed to {}, expected {}",
                short(&proposal_id),
                short(&actual),
                short(&result_hash)
            );
            return EndorseResponse::Mismatch { member, actual };
        }
        let signature = crypto::sign(
            &self.keypair,
            &Endorsement::message(&group_id, &proposal_id, &actual),
        );
        EndorseResponse::Endorsed(Endorsement { member, signature })
    }

    /// Applies a committed delta after checking that every member endorsed it.
    ///
    /// Deltas apply in version order. One that overtook an earlier commit is
    /// parked until that commit arrives; a duplicate or superseded one is
    /// refused without touching the store.
    pub fn apply_committed(
        &self,
        result: &ExecutionResult,
        endorsements: &[Endorsement],
    ) -> Result<(), CoordinatorError> {
        verify_unanimous(&self.group, result, endorsements)?;
        let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        match self
            .store
            .apply_committed(&result.delta, &result.base_versions)
        {
            Ok(()) => {
                trace!("applied committed proposal {}", short(&result.proposal));
                self.drain_parked(&mut parked);
                Ok(())
            }
            Err(StoreError::OutOfOrder { key }) => {
                debug!(
                    "parked committed proposal {}, key {} is behind",
                    short(&result.proposal),
                    key
                );
                if parked.len() >= MAX_PARKED {
                    let dropped = parked.remove(0);
                    warn!("dropped parked proposal {}", short(&dropped.proposal));
                }
                parked.push(result.clone());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn drain_parked(&self, parked: &mut Vec<ExecutionResult>) {
        loop {
            let mut progressed = false;
            parked.retain(|result| {
                match self
                    .store
                    .apply_committed(&result.delta, &result.base_versions)
                {
                    Ok(()) => {
                        trace!("applied parked proposal {}", short(&result.proposal));
                        progressed = true;
                        false
                    }
                    Err(StoreError::OutOfOrder { .. }) => true,
                    Err(e) => {
                        warn!("discarded parked proposal {}: {}", short(&result.proposal), e);
                        false
                    }
                }
            });
            if !progressed {
                break;
            }
        }
    }

    pub fn parked(&self) -> usize {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl GroupMember for LocalMember {
    fn id(&self) -> MemberId {
        self.keypair.public.to_bytes()
    }

    fn endorse<'a>(
        &'a self,
        proposal: &'a TransactionProposal,
        result_hash: Hash,
    ) -> BoxFuture<'a, Result<EndorseResponse, CoordinatorError>> {
        future::ready(Ok(self.endorse_now(proposal, result_hash))).boxed()
    }

    fn notify_committed<'a>(
        &'a self,
        result: &'a ExecutionResult,
        endorsements: &'a [Endorsement],
    ) -> BoxFuture<'a, Result<(), CoordinatorError>> {
        future::ready(self.apply_committed(result, endorsements)).boxed()
    }
}

/// Checks that `endorsements` holds exactly one valid signature over
/// `result` from every group member and nothing else.
pub fn verify_unanimous(
    group: &PrivacyGroup,
    result: &ExecutionResult,
    endorsements: &[Endorsement],
) -> Result<(), CoordinatorError> {
    let group_id = group.id();
    let output_hash = result.hash();
    let mut signers = BTreeSet::new();
    for endorsement in endorsements {
        if !group.contains(&endorsement.member)
            || !endorsement.verify(&group_id, &result.proposal, &output_hash)
            || !signers.insert(endorsement.member)
        {
            return Err(CoordinatorError::InvalidEndorsement {
                member: endorsement.member,
            });
        }
    }
    let missing: Vec<_> = group
        .members
        .iter()
        .filter(|m| !signers.contains(*m))
        .copied()
        .collect();
    if let Some(first) = missing.first() {
        return Err(CoordinatorError::InvalidEndorsement { member: *first });
    }
    Ok(())
}

/// Collects endorsements from every member of the group.
///
/// Unanimity is required: one mismatching or refusing member rejects the
/// proposal, and a member that has not answered when the timeout elapses
/// rejects it as well. Partial quorums are never accepted.
pub struct EndorsementService {
    group: Arc<PrivacyGroup>,
    members: Vec<Arc<dyn GroupMember>>,
    timeout: Duration,
}

impl EndorsementService {
    pub fn new(
        group: Arc<PrivacyGroup>,
        members: Vec<Arc<dyn GroupMember>>,
        timeout: Duration,
    ) -> Result<Self, CoordinatorError> {
        if let Some(outsider) = members.iter().map(|m| m.id()).find(|id| !group.contains(id)) {
            return Err(CoordinatorError::NotGroupMember(outsider));
        }
        if let Some(missing) = group
            .members
            .iter()
            .find(|id| !members.iter().any(|m| m.id() == **id))
        {
            return Err(CoordinatorError::IncompleteGroup(*missing));
        }
        Ok(Self {
            group,
            members,
            timeout,
        })
    }

    pub fn group(&self) -> &PrivacyGroup {
        &self.group
    }

    pub async fn request_endorsement(
        &self,
        proposal: &TransactionProposal,
        result: &ExecutionResult,
    ) -> Result<Vec<Endorsement>, CoordinatorError> {
        let group_id = self.group.id();
        let proposal_id = proposal.id();
        let output_hash = result.hash();
        let deadline = Instant::now() + self.timeout;

        let mut pending: FuturesUnordered<_> = self
            .members
            .iter()
            .map(|member| {
                let asked = member.id();
                member
                    .endorse(proposal, output_hash)
                    .map(move |response| (asked, response))
            })
            .collect();

        let mut endorsements: BTreeMap<MemberId, Endorsement> = BTreeMap::new();
        loop {
            let (asked, response) = match timeout_at(deadline, pending.next()).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => {
                    let missing: Vec<_> = self
                        .group
                        .members
                        .iter()
                        .filter(|m| !endorsements.contains_key(*m))
                        .copied()
                        .collect();
                    warn!(
                        "endorsement of {} timed out, {} member(s) silent",
                        short(&proposal_id),
                        missing.len()
                    );
                    return Err(CoordinatorError::EndorsementTimeout { missing });
                }
            };
            match response {
                Ok(EndorseResponse::Endorsed(endorsement)) => {
                    if endorsement.member != asked
                        || !endorsement.verify(&group_id, &proposal_id, &output_hash)
                        || endorsements.contains_key(&asked)
                    {
                        return Err(CoordinatorError::InvalidEndorsement { member: asked });
                    }
                    trace!("{} endorsed {}", short(&asked), short(&proposal_id));
                    endorsements.insert(asked, endorsement);
                }
                Ok(EndorseResponse::Mismatch { actual, .. }) => {
                    warn!(
                        "{} computed {} for {}, expected {}",
                        short(&asked),
                        short(&actual),
                        short(&proposal_id),
                        short(&output_hash)
                    );
                    return Err(CoordinatorError::EndorsementMismatch { member: asked });
                }
                Ok(EndorseResponse::Refused { reason, .. }) => {
                    return Err(CoordinatorError::EndorsementRefused {
                        member: asked,
                        reason,
                    })
                }
                Err(e) => {
                    return Err(CoordinatorError::EndorsementRefused {
                        member: asked,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(endorsements.into_values().collect())
    }

    /// Best effort. A member that misses a notification stays behind on the
    /// keys it touched: later deltas on those keys park on it and its
    /// endorsements of proposals reading them mismatch.
    pub async fn notify_committed(
        &self,
        skip: &MemberId,
        result: &ExecutionResult,
        endorsements: &[Endorsement],
    ) {
        let notifications = self
            .members
            .iter()
            .filter(|member| member.id() != *skip)
            .map(|member| {
                let id = member.id();
                member
                    .notify_committed(result, endorsements)
                    .map(move |outcome| (id, outcome))
            });
        for (id, outcome) in future::join_all(notifications).await {
            if let Err(e) = outcome {
                warn!("commit notification to {} failed: {}", short(&id), e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod endorsement_test {
    use super::*;
    use crate::contracts::StorageContract;
    use crate::executor::{encode_u64, ContractRegistry, ExecutionContext, ExecutionError, PrivateContract};

    /// Storage contract of a diverging code version: stores one more than asked.
    pub(crate) struct OffByOne;

    impl PrivateContract for OffByOne {
        fn required_public_inputs(&self, method: &str) -> Option<&'static [&'static str]> {
            StorageContract::new("public").required_public_inputs(method)
        }

        fn call(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
            let x = ctx.arg_u64("x")?;
            let y = ctx.public_u64("y")?;
            ctx.set(b"value", encode_u64(x + y + 1));
            Ok(())
        }
    }

    /// Never answers.
    pub(crate) struct SilentMember(pub MemberId);

    impl GroupMember for SilentMember {
        fn id(&self) -> MemberId {
            self.0
        }

        fn endorse<'a>(
            &'a self,
            _proposal: &'a TransactionProposal,
            _result_hash: Hash,
        ) -> BoxFuture<'a, Result<EndorseResponse, CoordinatorError>> {
            future::pending().boxed()
        }

        fn notify_committed<'a>(
            &'a self,
            _result: &'a ExecutionResult,
            _endorsements: &'a [Endorsement],
        ) -> BoxFuture<'a, Result<(), CoordinatorError>> {
            future::ready(Ok(())).boxed()
        }
    }

    pub(crate) fn storage_executor() -> Executor {
        Executor::new(ContractRegistry::new().register("storage", StorageContract::new("public")))
    }

    pub(crate) fn member(
        keypair: Keypair,
        group: &Arc<PrivacyGroup>,
        executor: Executor,
    ) -> Arc<LocalMember> {
        Arc::new(LocalMember::new(
            Arc::new(keypair),
            group.clone(),
            PrivateStateStore::new(),
            executor,
        ))
    }

    pub(crate) fn proposal(group: &PrivacyGroup, x: u64, y: u64) -> TransactionProposal {
        TransactionProposal {
            group: group.id(),
            caller: [9; 32],
            contract: "storage".into(),
            method: "store_with_public_data".into(),
            args: [("x".to_string(), encode_u64(x))].into(),
            public_inputs: [("y".to_string(), encode_u64(y))].into(),
            nonce: 0,
        }
    }

    fn two_members(b_executor: Executor) -> (Arc<PrivacyGroup>, Arc<LocalMember>, Arc<LocalMember>) {
        let (ka, kb) = (crypto::generate_keypair(), crypto::generate_keypair());
        let group = Arc::new(PrivacyGroup::new(
            "ab",
            [ka.public.to_bytes(), kb.public.to_bytes()],
        ));
        let a = member(ka, &group, storage_executor());
        let b = member(kb, &group, b_executor);
        (group, a, b)
    }

    fn service(group: &Arc<PrivacyGroup>, members: Vec<Arc<dyn GroupMember>>) -> EndorsementService {
        EndorsementService::new(group.clone(), members, Duration::from_millis(200)).unwrap()
    }

    #[tokio::test]
    async fn unanimous_group_endorses() {
        let (group, a, b) = two_members(storage_executor());
        let p = proposal(&group, 5, 10);
        let result = storage_executor().execute(&p, &Default::default()).unwrap();
        let endorsements = service(&group, vec![a as Arc<dyn GroupMember>, b as Arc<dyn GroupMember>])
            .request_endorsement(&p, &result)
            .await
            .unwrap();
        assert_eq!(endorsements.len(), 2);
        verify_unanimous(&group, &result, &endorsements).unwrap();
    }

    #[tokio::test]
    async fn diverging_member_is_named() {
        let (group, a, b) = two_members(Executor::new(
            ContractRegistry::new().register("storage", OffByOne),
        ));
        let p = proposal(&group, 5, 10);
        let result = storage_executor().execute(&p, &Default::default()).unwrap();
        let err = service(&group, vec![a as Arc<dyn GroupMember>, b.clone() as Arc<dyn GroupMember>])
            .request_endorsement(&p, &result)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::EndorsementMismatch { member: b.id() });
    }

    #[tokio::test]
    async fn silent_member_fails_closed() {
        let (group, a, b) = two_members(storage_executor());
        let p = proposal(&group, 5, 10);
        let result = storage_executor().execute(&p, &Default::default()).unwrap();
        let silent: Arc<dyn GroupMember> = Arc::new(SilentMember(b.id()));
        let err = service(&group, vec![a as Arc<dyn GroupMember>, silent])
            .request_endorsement(&p, &result)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::EndorsementTimeout {
                missing: vec![b.id()]
            }
        );
    }

    #[tokio::test]
    async fn member_holding_a_lock_refuses() {
        let (group, a, b) = two_members(storage_executor());
        let p = proposal(&group, 5, 10);
        let result = storage_executor().execute(&p, &Default::default()).unwrap();
        b.store()
            .lock([42; 32], &result.delta, &b.store().snapshot())
            .unwrap();
        let err = service(&group, vec![a as Arc<dyn GroupMember>, b.clone() as Arc<dyn GroupMember>])
            .request_endorsement(&p, &result)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::EndorsementRefused { member, .. } if member == b.id()));
    }

    #[test]
    fn service_needs_exactly_the_group() {
        let (group, a, _b) = two_members(storage_executor());
        assert!(matches!(
            EndorsementService::new(
                group.clone(),
                vec![a.clone() as Arc<dyn GroupMember>],
                Duration::from_secs(1)
            ),
            Err(CoordinatorError::IncompleteGroup(_))
        ));
        let outsider = member(crypto::generate_keypair(), &group, storage_executor());
        assert!(matches!(
            EndorsementService::new(
                group,
                vec![a as Arc<dyn GroupMember>, outsider as Arc<dyn GroupMember>],
                Duration::from_secs(1)
            ),
            Err(CoordinatorError::NotGroupMember(_))
        ));
    }

    #[test]
    fn commit_needs_every_signature() {
        let (group, a, b) = two_members(storage_executor());
        let p = proposal(&group, 5, 10);
        let result = storage_executor().execute(&p, &Default::default()).unwrap();
        let EndorseResponse::Endorsed(only_a) = a.endorse_now(&p, result.hash()) else {
            panic!("a should endorse");
        };
        assert!(b.apply_committed(&result, &[only_a.clone()]).is_err());
        assert!(b.store().get(b"storage/value").is_none());

        let EndorseResponse::Endorsed(from_b) = b.endorse_now(&p, result.hash()) else {
            panic!("b should endorse");
        };
        b.apply_committed(&result, &[only_a, from_b]).unwrap();
        assert_eq!(b.store().get(b"storage/value"), Some(encode_u64(5)));
    }

    fn endorsed(
        members: &[&Arc<LocalMember>],
        p: &TransactionProposal,
        result: &ExecutionResult,
    ) -> Vec<Endorsement> {
        members
            .iter()
            .map(|m| match m.endorse_now(p, result.hash()) {
                EndorseResponse::Endorsed(e) => e,
                other => panic!("expected an endorsement, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn late_commit_never_rolls_a_replica_back() {
        let (group, a, b) = two_members(storage_executor());
        let c = member(crypto::generate_keypair(), &group, storage_executor());

        // First commit, executed and endorsed on fresh state.
        let p1 = proposal(&group, 1, 0);
        let r1 = storage_executor().execute(&p1, &a.store().snapshot()).unwrap();
        let e1 = endorsed(&[&a, &b], &p1, &r1);
        a.apply_committed(&r1, &e1).unwrap();
        b.apply_committed(&r1, &e1).unwrap();

        // Second commit, on top of the first.
        let mut p2 = proposal(&group, 2, 0);
        p2.nonce = 1;
        let r2 = storage_executor().execute(&p2, &a.store().snapshot()).unwrap();
        let e2 = endorsed(&[&a, &b], &p2, &r2);

        // A replica hearing of the second commit first parks it...
        c.apply_committed(&r2, &e2).unwrap();
        assert_eq!(c.parked(), 1);
        assert_eq!(c.store().get(b"storage/value"), None);

        // ...and applies both in order once the first arrives.
        c.apply_committed(&r1, &e1).unwrap();
        assert_eq!(c.parked(), 0);
        assert_eq!(c.store().get(b"storage/value"), Some(encode_u64(2)));

        // A repeated notification is refused and changes nothing.
        assert_eq!(
            c.apply_committed(&r1, &e1),
            Err(CoordinatorError::State(StoreError::AlreadyApplied {
                key: "storage/owner".into()
            }))
        );
        assert_eq!(c.store().get(b"storage/value"), Some(encode_u64(2)));
    }
}
