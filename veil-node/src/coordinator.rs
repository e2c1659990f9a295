use crate::endorsement::EndorsementService;
use crate::error::CoordinatorError;
use crate::executor::Executor;
use crate::ledger::PublicLedger;
use crate::state_store::PrivateStateStore;
use veil_common::{
    crypto::short, FinalizedTransaction, LedgerStatus, MemberId, PrivacyGroup, ProposalId,
    ProposalReceipt, ProposalStatus, TransactionProposal,
};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace, warn};
use tokio_util::sync::CancellationToken;

/// Terminal proposals remembered for status queries and duplicate checks.
pub const HISTORY_LIMIT: usize = 10_000;

struct Record {
    status: ProposalStatus,
    reason: Option<String>,
    cancel: CancellationToken,
    finalized: Option<FinalizedTransaction>,
    // Set while the pipeline that registered the record still runs.
    live: bool,
}

impl Record {
    fn new() -> Self {
        Self {
            status: ProposalStatus::Proposed,
            reason: None,
            cancel: CancellationToken::new(),
            finalized: None,
            live: true,
        }
    }
}

#[derive(Default)]
struct Records {
    by_id: HashMap<ProposalId, Record>,
    // Finished pipelines, oldest first.
    finished: VecDeque<ProposalId>,
}

/// Drives proposals through assemble, endorse and prepare/submit.
///
/// ```text
/// Proposed -> Assembled -> Endorsed -> Submitted -> Committed
///     \___________\____________\___________\______-> Rejected
/// ```
///
/// Every proposal runs as its own pipeline; only the state store is shared
/// between them. A rejected proposal is never retried here.
pub struct Coordinator {
    me: MemberId,
    group: Arc<PrivacyGroup>,
    store: PrivateStateStore,
    executor: Executor,
    endorsement: EndorsementService,
    ledger: Arc<dyn PublicLedger>,
    proposals: Mutex<Records>,
    history_limit: usize,
}

impl Coordinator {
    pub fn new(
        me: MemberId,
        store: PrivateStateStore,
        executor: Executor,
        endorsement: EndorsementService,
        ledger: Arc<dyn PublicLedger>,
    ) -> Result<Self, CoordinatorError> {
        let group = Arc::new(endorsement.group().clone());
        if !group.contains(&me) {
            return Err(CoordinatorError::NotGroupMember(me));
        }
        Ok(Self {
            me,
            group,
            store,
            executor,
            endorsement,
            ledger,
            proposals: Default::default(),
            history_limit: HISTORY_LIMIT,
        })
    }

    /// Keeps at most `limit` finished proposals. Older ones are forgotten;
    /// the ledger still refuses their resubmission.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn group(&self) -> &PrivacyGroup {
        &self.group
    }

    pub fn store(&self) -> &PrivateStateStore {
        &self.store
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.proposals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, id: &ProposalId) -> Option<ProposalStatus> {
        self.records().by_id.get(id).map(|record| record.status)
    }

    pub fn finalized(&self, id: &ProposalId) -> Option<FinalizedTransaction> {
        self.records()
            .by_id
            .get(id)
            .and_then(|record| record.finalized.clone())
    }

    /// Runs `proposal` to a terminal state and reports it.
    pub async fn propose(&self, proposal: TransactionProposal) -> ProposalReceipt {
        let id = proposal.id();
        let cancel = match self.register(id) {
            Ok(cancel) => cancel,
            Err(e) => {
                debug!("proposal {} not accepted: {}", short(&id), e);
                return ProposalReceipt {
                    proposal: id,
                    status: ProposalStatus::Rejected,
                    reason: Some(e.to_string()),
                    output: None,
                };
            }
        };
        let receipt = match self.run(id, &proposal, cancel).await {
            Ok(output) => {
                info!("proposal {} committed", short(&id));
                ProposalReceipt {
                    proposal: id,
                    status: ProposalStatus::Committed,
                    reason: None,
                    output: Some(output),
                }
            }
            Err(e) => {
                let reason = self.reject(&id, e);
                ProposalReceipt {
                    proposal: id,
                    status: ProposalStatus::Rejected,
                    reason: Some(reason),
                    output: None,
                }
            }
        };
        self.finish(&id);
        receipt
    }

    /// Withdraws a proposal that has not reached the ledger yet.
    pub fn withdraw(&self, id: &ProposalId) -> Result<(), CoordinatorError> {
        {
            let mut records = self.records();
            let record = records
                .by_id
                .get_mut(id)
                .ok_or(CoordinatorError::UnknownProposal)?;
            if !record.status.can_withdraw() {
                return Err(CoordinatorError::CannotWithdraw(record.status));
            }
            record.status = ProposalStatus::Rejected;
            record.reason = Some(CoordinatorError::Withdrawn.to_string());
            record.cancel.cancel();
        }
        self.store.release(id);
        info!("proposal {} withdrawn", short(id));
        Ok(())
    }

    /// A proposal that was rejected without reaching the ledger may be
    /// proposed again once its pipeline has exited; anything else with the
    /// same id is a duplicate.
    fn register(&self, id: ProposalId) -> Result<CancellationToken, CoordinatorError> {
        let mut records = self.records();
        if let Some(existing) = records.by_id.get(&id) {
            let retryable =
                existing.status.is_terminal() && existing.finalized.is_none() && !existing.live;
            if !retryable {
                return Err(CoordinatorError::DuplicateProposal);
            }
        }
        let record = Record::new();
        let cancel = record.cancel.clone();
        records.by_id.insert(id, record);
        Ok(cancel)
    }

    /// Marks the pipeline of `id` as exited and forgets the oldest finished
    /// proposals beyond the history limit.
    fn finish(&self, id: &ProposalId) {
        let mut records = self.records();
        if let Some(record) = records.by_id.get_mut(id) {
            record.live = false;
        }
        records.finished.push_back(*id);
        while records.finished.len() > self.history_limit {
            let Some(oldest) = records.finished.pop_front() else {
                break;
            };
            let forget = matches!(
                records.by_id.get(&oldest),
                Some(record) if !record.live && record.status.is_terminal()
            );
            if forget {
                records.by_id.remove(&oldest);
                trace!("forgot proposal {}", short(&oldest));
            }
        }
    }

    /// Moves `id` from `from` to `to`. Fails if the proposal left `from`
    /// behind the pipeline's back, which only a withdrawal does.
    fn advance(
        &self,
        id: &ProposalId,
        from: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<(), CoordinatorError> {
        let mut records = self.records();
        let record = records
            .by_id
            .get_mut(id)
            .ok_or(CoordinatorError::UnknownProposal)?;
        if record.status != from {
            return Err(CoordinatorError::Withdrawn);
        }
        record.status = to;
        debug!("proposal {} {:?} -> {:?}", short(id), from, to);
        Ok(())
    }

    /// Endorsed -> Submitted, recording the transaction. Once this succeeds
    /// the transaction is never handed to the ledger again.
    fn mark_submitted(
        &self,
        id: &ProposalId,
        tx: &FinalizedTransaction,
    ) -> Result<(), CoordinatorError> {
        let mut records = self.records();
        let record = records
            .by_id
            .get_mut(id)
            .ok_or(CoordinatorError::UnknownProposal)?;
        if record.finalized.is_some() {
            return Err(CoordinatorError::AlreadySubmitted);
        }
        if record.status != ProposalStatus::Endorsed {
            return Err(CoordinatorError::Withdrawn);
        }
        record.status = ProposalStatus::Submitted;
        record.finalized = Some(tx.clone());
        Ok(())
    }

    fn reject(&self, id: &ProposalId, error: CoordinatorError) -> String {
        let reason = {
            let mut records = self.records();
            match records.by_id.get_mut(id) {
                // A withdrawal already recorded the reason.
                Some(record) if record.status == ProposalStatus::Rejected => {
                    record.reason.clone().unwrap_or_else(|| error.to_string())
                }
                Some(record) => {
                    record.status = ProposalStatus::Rejected;
                    record.reason = Some(error.to_string());
                    error.to_string()
                }
                None => error.to_string(),
            }
        };
        self.store.release(id);
        warn!("proposal {} rejected: {}", short(id), reason);
        reason
    }

    async fn run(
        &self,
        id: ProposalId,
        proposal: &TransactionProposal,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, CoordinatorError> {
        // Assemble against a snapshot; public data only through the proposal.
        if proposal.group != self.group.id() {
            return Err(CoordinatorError::WrongGroup);
        }
        let snapshot = self.store.snapshot();
        let result = self.executor.execute(proposal, &snapshot)?;
        self.store.lock(id, &result.delta, &snapshot)?;
        self.advance(&id, ProposalStatus::Proposed, ProposalStatus::Assembled)?;

        // Endorse: only this pipeline waits here.
        let endorsements = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoordinatorError::Withdrawn),
            endorsements = self.endorsement.request_endorsement(proposal, &result) => endorsements?,
        };
        if cancel.is_cancelled() {
            return Err(CoordinatorError::Withdrawn);
        }
        self.advance(&id, ProposalStatus::Assembled, ProposalStatus::Endorsed)?;

        // Prepare and submit exactly once.
        let tx = FinalizedTransaction {
            group: self.group.id(),
            input_hash: id,
            output_hash: result.hash(),
            endorsements: endorsements.clone(),
            outbound_calls: result.outbound_calls.clone(),
        };
        self.mark_submitted(&id, &tx)?;
        let receipt = self
            .ledger
            .submit(tx)
            .await
            .map_err(|e| CoordinatorError::LedgerSubmissionFailure(e.to_string()))?;
        if receipt.input_hash != id {
            return Err(CoordinatorError::LedgerSubmissionFailure(
                "receipt for another transaction".into(),
            ));
        }
        if let LedgerStatus::Rejected(reason) = receipt.status {
            return Err(CoordinatorError::LedgerSubmissionFailure(reason));
        }

        self.store.commit(id, &result.delta)?;
        self.advance(&id, ProposalStatus::Submitted, ProposalStatus::Committed)?;
        self.endorsement
            .notify_committed(&self.me, &result, &endorsements)
            .await;
        Ok(result.output)
    }
}

#[cfg(test)]
mod coordinator_test {
    use super::*;
    use crate::endorsement::endorsement_test::{
        member, proposal, storage_executor, OffByOne, SilentMember,
    };
    use crate::endorsement::{GroupMember, LocalMember};
    use crate::contracts::store_call_payload;
    use crate::executor::{encode_u64, ContractRegistry};
    use crate::ledger::MemoryLedger;
    use veil_common::crypto;

    use std::time::Duration;

    use futures::{future::BoxFuture, FutureExt};
    use tokio::sync::Notify;
    use veil_common::{EndorseResponse, Endorsement, ExecutionResult, Hash};

    /// Endorses only after the gate opens.
    struct GatedMember {
        inner: Arc<LocalMember>,
        gate: Arc<Notify>,
    }

    impl GroupMember for GatedMember {
        fn id(&self) -> MemberId {
            self.inner.id()
        }

        fn endorse<'a>(
            &'a self,
            proposal: &'a TransactionProposal,
            result_hash: Hash,
        ) -> BoxFuture<'a, Result<EndorseResponse, CoordinatorError>> {
            async move {
                self.gate.notified().await;
                self.inner.endorse(proposal, result_hash).await
            }
            .boxed()
        }

        fn notify_committed<'a>(
            &'a self,
            result: &'a ExecutionResult,
            endorsements: &'a [Endorsement],
        ) -> BoxFuture<'a, Result<(), CoordinatorError>> {
            self.inner.notify_committed(result, endorsements)
        }
    }

    struct Fixture {
        coordinator: Arc<Coordinator>,
        group: Arc<PrivacyGroup>,
        a: Arc<LocalMember>,
        b_id: MemberId,
        ledger: MemoryLedger,
    }

    enum B {
        Same,
        Diverging,
        Silent,
        Gated(Arc<Notify>),
    }

    fn fixture_with(b: B, ledger: MemoryLedger) -> Fixture {
        let (ka, kb) = (crypto::generate_keypair(), crypto::generate_keypair());
        let a_id = ka.public.to_bytes();
        let b_id = kb.public.to_bytes();
        let group = Arc::new(PrivacyGroup::new("ab", [a_id, b_id]));
        let a = member(ka, &group, storage_executor());
        let b: Arc<dyn GroupMember> = match b {
            B::Same => member(kb, &group, storage_executor()),
            B::Diverging => member(
                kb,
                &group,
                Executor::new(ContractRegistry::new().register("storage", OffByOne)),
            ),
            B::Silent => Arc::new(SilentMember(b_id)),
            B::Gated(gate) => Arc::new(GatedMember {
                inner: member(kb, &group, storage_executor()),
                gate,
            }),
        };
        let endorsement = EndorsementService::new(
            group.clone(),
            vec![a.clone() as Arc<dyn GroupMember>, b],
            Duration::from_millis(200),
        )
        .unwrap();
        let coordinator = Coordinator::new(
            a_id,
            a.store().clone(),
            storage_executor(),
            endorsement,
            Arc::new(ledger.clone()),
        )
        .unwrap();
        Fixture {
            coordinator: Arc::new(coordinator),
            group,
            a,
            b_id,
            ledger,
        }
    }

    fn fixture(b: B) -> Fixture {
        fixture_with(b, MemoryLedger::new())
    }

    #[tokio::test]
    async fn two_member_group_commits_sum() {
        let f = fixture(B::Same);
        let p = proposal(&f.group, 5, 10);
        let receipt = f.coordinator.propose(p.clone()).await;
        assert_eq!(receipt.status, ProposalStatus::Committed, "{:?}", receipt.reason);
        assert_eq!(f.coordinator.status(&p.id()), Some(ProposalStatus::Committed));
        // The private slot keeps x, only the sum goes public.
        assert_eq!(f.a.store().get(b"storage/value"), Some(encode_u64(5)));

        let committed = f.ledger.committed();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].outbound_calls.len(), 1);
        assert_eq!(committed[0].outbound_calls[0].payload, store_call_payload(15));
        assert_eq!(committed[0].endorsements.len(), 2);
        assert_eq!(committed[0].input_hash, p.id());
        assert_eq!(f.a.store().locked_keys(), 0);
    }

    #[tokio::test]
    async fn diverging_code_version_is_rejected_naming_b() {
        let f = fixture(B::Diverging);
        let p = proposal(&f.group, 5, 10);
        let receipt = f.coordinator.propose(p.clone()).await;
        assert_eq!(receipt.status, ProposalStatus::Rejected);
        assert_eq!(
            receipt.reason,
            Some(CoordinatorError::EndorsementMismatch { member: f.b_id }.to_string())
        );
        assert_eq!(f.ledger.submissions(), 0);
        assert_eq!(f.a.store().get(b"storage/value"), None);
        assert_eq!(f.a.store().locked_keys(), 0);
    }

    #[tokio::test]
    async fn missing_public_input_never_assembles() {
        let f = fixture(B::Same);
        let mut p = proposal(&f.group, 5, 10);
        p.public_inputs.clear();
        let receipt = f.coordinator.propose(p.clone()).await;
        assert_eq!(receipt.status, ProposalStatus::Rejected);
        assert_eq!(
            receipt.reason,
            Some(CoordinatorError::MissingPublicInput("y".into()).to_string())
        );
        assert_eq!(f.ledger.submissions(), 0);

        // Re-proposing with the input supplied goes through.
        p.public_inputs = [("y".to_string(), encode_u64(10))].into();
        let receipt = f.coordinator.propose(p).await;
        assert_eq!(receipt.status, ProposalStatus::Committed);
    }

    #[tokio::test]
    async fn silent_member_times_out() {
        let f = fixture(B::Silent);
        let receipt = f.coordinator.propose(proposal(&f.group, 5, 10)).await;
        assert_eq!(receipt.status, ProposalStatus::Rejected);
        assert_eq!(
            receipt.reason,
            Some(
                CoordinatorError::EndorsementTimeout {
                    missing: vec![f.b_id]
                }
                .to_string()
            )
        );
    }

    #[tokio::test]
    async fn ledger_failure_is_final() {
        let f = fixture(B::Same);
        f.ledger.fail_next("connection reset");
        let p = proposal(&f.group, 5, 10);
        let receipt = f.coordinator.propose(p.clone()).await;
        assert_eq!(receipt.status, ProposalStatus::Rejected);
        assert!(receipt.reason.unwrap().contains("connection reset"));
        assert!(f.coordinator.finalized(&p.id()).is_some());
        assert_eq!(f.a.store().locked_keys(), 0);

        // Same proposal again is refused, the ledger sees it only once.
        let again = f.coordinator.propose(p).await;
        assert_eq!(
            again.reason,
            Some(CoordinatorError::DuplicateProposal.to_string())
        );
        assert_eq!(f.ledger.submissions(), 1);
    }

    #[tokio::test]
    async fn committed_proposal_is_not_resubmitted() {
        let f = fixture(B::Same);
        let p = proposal(&f.group, 5, 10);
        f.coordinator.propose(p.clone()).await;
        let again = f.coordinator.propose(p).await;
        assert_eq!(again.status, ProposalStatus::Rejected);
        assert_eq!(f.ledger.submissions(), 1);
    }

    #[tokio::test]
    async fn timed_out_proposal_may_be_proposed_again() {
        let f = fixture(B::Silent);
        let p = proposal(&f.group, 5, 10);
        f.coordinator.propose(p.clone()).await;
        let again = f.coordinator.propose(p).await;
        assert!(again
            .reason
            .unwrap()
            .contains("did not answer"));
    }

    #[tokio::test]
    async fn withdraw_during_endorsement() {
        let f = fixture(B::Silent);
        let p = proposal(&f.group, 5, 10);
        let id = p.id();
        let coordinator = f.coordinator.clone();
        let pipeline = tokio::spawn(async move { coordinator.propose(p).await });
        while f.coordinator.status(&id) != Some(ProposalStatus::Assembled) {
            tokio::task::yield_now().await;
        }
        f.coordinator.withdraw(&id).unwrap();
        let receipt = pipeline.await.unwrap();
        assert_eq!(receipt.status, ProposalStatus::Rejected);
        assert_eq!(receipt.reason, Some(CoordinatorError::Withdrawn.to_string()));
        assert_eq!(f.a.store().locked_keys(), 0);
        assert_eq!(f.ledger.submissions(), 0);
    }

    #[tokio::test]
    async fn withdraw_after_submission_is_refused() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(B::Same, MemoryLedger::gated(gate.clone()));
        let p = proposal(&f.group, 5, 10);
        let id = p.id();
        let coordinator = f.coordinator.clone();
        let pipeline = tokio::spawn(async move { coordinator.propose(p).await });
        while f.coordinator.status(&id) != Some(ProposalStatus::Submitted) {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            f.coordinator.withdraw(&id),
            Err(CoordinatorError::CannotWithdraw(ProposalStatus::Submitted))
        );
        gate.notify_one();
        assert_eq!(pipeline.await.unwrap().status, ProposalStatus::Committed);
    }

    #[tokio::test]
    async fn concurrent_proposals_on_one_key_serialize() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(B::Same, MemoryLedger::gated(gate.clone()));
        let first = proposal(&f.group, 1, 1);
        let first_id = first.id();
        let coordinator = f.coordinator.clone();
        let pipeline = tokio::spawn(async move { coordinator.propose(first).await });
        while f.coordinator.status(&first_id) != Some(ProposalStatus::Submitted) {
            tokio::task::yield_now().await;
        }

        let mut second = proposal(&f.group, 2, 2);
        second.nonce = 1;
        let receipt = f.coordinator.propose(second).await;
        assert_eq!(receipt.status, ProposalStatus::Rejected);
        assert!(receipt.reason.unwrap().contains("locked"));

        gate.notify_one();
        assert_eq!(pipeline.await.unwrap().status, ProposalStatus::Committed);
        assert_eq!(f.a.store().get(b"storage/value"), Some(encode_u64(1)));
    }

    #[tokio::test]
    async fn replica_applies_committed_delta() {
        let (ka, kb) = (crypto::generate_keypair(), crypto::generate_keypair());
        let group = Arc::new(PrivacyGroup::new(
            "ab",
            [ka.public.to_bytes(), kb.public.to_bytes()],
        ));
        let b = member(kb, &group, storage_executor());
        let a = member(ka, &group, storage_executor());
        let endorsement = EndorsementService::new(
            group.clone(),
            vec![a.clone() as Arc<dyn GroupMember>, b.clone() as Arc<dyn GroupMember>],
            Duration::from_millis(200),
        )
        .unwrap();
        let ledger = MemoryLedger::new();
        let coordinator = Coordinator::new(
            a.id(),
            a.store().clone(),
            storage_executor(),
            endorsement,
            Arc::new(ledger),
        )
        .unwrap();

        let receipt = coordinator.propose(proposal(&group, 5, 10)).await;
        assert_eq!(receipt.status, ProposalStatus::Committed);
        assert_eq!(b.store().get(b"storage/value"), Some(encode_u64(5)));
        assert_eq!(a.store().get(b"storage/value"), Some(encode_u64(5)));
    }

    #[tokio::test]
    async fn withdrawn_pipeline_never_reaches_the_ledger() {
        let gate = Arc::new(Notify::new());
        let f = fixture(B::Gated(gate.clone()));
        let p = proposal(&f.group, 5, 10);
        let id = p.id();
        let coordinator = f.coordinator.clone();
        let first = p.clone();
        let pipeline = tokio::spawn(async move { coordinator.propose(first).await });
        while f.coordinator.status(&id) != Some(ProposalStatus::Assembled) {
            tokio::task::yield_now().await;
        }
        f.coordinator.withdraw(&id).unwrap();

        // The same id is refused while the withdrawn pipeline is still parked.
        let again = f.coordinator.propose(p.clone()).await;
        assert_eq!(
            again.reason,
            Some(CoordinatorError::DuplicateProposal.to_string())
        );
        gate.notify_one();
        let receipt = pipeline.await.unwrap();
        assert_eq!(receipt.reason, Some(CoordinatorError::Withdrawn.to_string()));
        assert_eq!(f.coordinator.status(&id), Some(ProposalStatus::Rejected));
        assert_eq!(f.ledger.submissions(), 0);
        assert_eq!(f.a.store().locked_keys(), 0);

        // Once it has exited, a fresh attempt runs on its own record.
        gate.notify_one();
        let retried = f.coordinator.propose(p).await;
        assert_eq!(retried.status, ProposalStatus::Committed, "{:?}", retried.reason);
        assert_eq!(f.coordinator.status(&id), Some(ProposalStatus::Committed));
        assert_eq!(f.ledger.submissions(), 1);
    }

    #[tokio::test]
    async fn retrieve_returns_value_in_receipt() {
        let f = fixture(B::Same);
        f.coordinator.propose(proposal(&f.group, 5, 10)).await;
        let mut read = proposal(&f.group, 0, 0);
        read.method = "retrieve".into();
        read.public_inputs.clear();
        read.nonce = 1;
        let receipt = f.coordinator.propose(read).await;
        assert_eq!(receipt.status, ProposalStatus::Committed, "{:?}", receipt.reason);
        assert_eq!(receipt.output, Some(encode_u64(5)));
    }

    #[tokio::test]
    async fn finished_proposals_beyond_the_limit_are_forgotten() {
        let f = fixture(B::Same);
        let coordinator = Arc::try_unwrap(f.coordinator)
            .ok()
            .unwrap()
            .with_history_limit(1);
        let first = proposal(&f.group, 1, 0);
        let mut second = proposal(&f.group, 2, 0);
        second.nonce = 1;
        coordinator.propose(first.clone()).await;
        coordinator.propose(second.clone()).await;
        assert_eq!(coordinator.status(&first.id()), None);
        assert_eq!(coordinator.status(&second.id()), Some(ProposalStatus::Committed));
    }

    #[tokio::test]
    async fn foreign_group_is_refused() {
        let f = fixture(B::Same);
        let mut p = proposal(&f.group, 5, 10);
        p.group = [0; 32];
        let receipt = f.coordinator.propose(p).await;
        assert_eq!(
            receipt.reason,
            Some(CoordinatorError::WrongGroup.to_string())
        );
    }

    #[test]
    fn coordinator_must_belong_to_group() {
        let f = fixture(B::Same);
        let group = Arc::new(f.group.as_ref().clone());
        let endorsement = EndorsementService::new(
            group,
            vec![
                f.a.clone() as Arc<dyn GroupMember>,
                Arc::new(SilentMember(f.b_id)) as Arc<dyn GroupMember>,
            ],
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(matches!(
            Coordinator::new(
                [0; 32],
                PrivateStateStore::new(),
                storage_executor(),
                endorsement,
                Arc::new(MemoryLedger::new()),
            ),
            Err(CoordinatorError::NotGroupMember(_))
        ));
    }
}
