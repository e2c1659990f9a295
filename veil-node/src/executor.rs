use crate::state_store::Snapshot;
use veil_common::{ExecutionResult, OutboundCall, StateDelta, TransactionProposal};

use std::collections::BTreeMap;
use std::sync::Arc;

use log::trace;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("unknown contract {0}")]
    UnknownContract(String),
    #[error("contract {contract} has no method {method}")]
    UnknownMethod { contract: String, method: String },
    #[error("public input {0} was not supplied with the proposal")]
    MissingPublicInput(String),
    #[error("missing argument {0}")]
    MissingArgument(String),
    #[error("invalid argument {0}")]
    InvalidArgument(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
}

/// Contract logic run inside the private executor.
///
/// A contract only sees private state and the proposal. Public ledger data
/// reaches it solely as public inputs named by [`required_public_inputs`].
///
/// [`required_public_inputs`]: PrivateContract::required_public_inputs
pub trait PrivateContract: Send + Sync {
    /// Public inputs `method` reads, `None` if the method does not exist.
    fn required_public_inputs(&self, method: &str) -> Option<&'static [&'static str]>;

    fn call(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError>;
}

#[derive(Clone, Default)]
pub struct ContractRegistry(BTreeMap<String, Arc<dyn PrivateContract>>);

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: impl Into<String>, contract: impl PrivateContract + 'static) -> Self {
        self.0.insert(id.into(), Arc::new(contract));
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn PrivateContract>> {
        self.0.get(id)
    }
}

/// Runs proposals against a state snapshot. Two executors with the same
/// registry produce byte-identical results for the same proposal and snapshot.
#[derive(Clone)]
pub struct Executor {
    contracts: ContractRegistry,
}

impl Executor {
    pub fn new(contracts: ContractRegistry) -> Self {
        Self { contracts }
    }

    pub fn execute(
        &self,
        proposal: &TransactionProposal,
        snapshot: &Snapshot,
    ) -> Result<ExecutionResult, ExecutionError> {
        let contract = self
            .contracts
            .get(&proposal.contract)
            .ok_or_else(|| ExecutionError::UnknownContract(proposal.contract.clone()))?;
        let required = contract
            .required_public_inputs(&proposal.method)
            .ok_or_else(|| ExecutionError::UnknownMethod {
                contract: proposal.contract.clone(),
                method: proposal.method.clone(),
            })?;
        if let Some(missing) = required
            .iter()
            .find(|name| !proposal.public_inputs.contains_key(**name))
        {
            return Err(ExecutionError::MissingPublicInput(missing.to_string()));
        }

        let mut ctx = ExecutionContext::new(proposal, snapshot);
        contract.call(&mut ctx)?;
        trace!(
            "{}.{} wrote {} keys, emitted {} calls",
            proposal.contract,
            proposal.method,
            ctx.writes.len(),
            ctx.outbound.len()
        );
        let base_versions = ctx
            .writes
            .keys()
            .map(|key| (key.clone(), snapshot.version(key)))
            .collect();
        Ok(ExecutionResult {
            proposal: proposal.id(),
            delta: ctx.writes,
            base_versions,
            outbound_calls: ctx.outbound,
            output: ctx.output,
        })
    }
}

/// A contract's view of one execution. Keys are namespaced by contract id;
/// reads see the contract's own earlier writes.
pub struct ExecutionContext<'a> {
    proposal: &'a TransactionProposal,
    snapshot: &'a Snapshot,
    writes: StateDelta,
    outbound: Vec<OutboundCall>,
    output: Vec<u8>,
}

impl<'a> ExecutionContext<'a> {
    fn new(proposal: &'a TransactionProposal, snapshot: &'a Snapshot) -> Self {
        Self {
            proposal,
            snapshot,
            writes: Default::default(),
            outbound: Default::default(),
            output: Default::default(),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.proposal.contract.len() + 1 + key.len());
        full.extend_from_slice(self.proposal.contract.as_bytes());
        full.push(b'/');
        full.extend_from_slice(key);
        full
    }

    pub fn caller(&self) -> &[u8; 32] {
        &self.proposal.caller
    }

    pub fn method(&self) -> &str {
        &self.proposal.method
    }

    pub fn arg(&self, name: &str) -> Result<&[u8], ExecutionError> {
        self.proposal
            .args
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ExecutionError::MissingArgument(name.into()))
    }

    pub fn arg_u64(&self, name: &str) -> Result<u64, ExecutionError> {
        decode_u64(self.arg(name)?).ok_or_else(|| ExecutionError::InvalidArgument(name.into()))
    }

    /// Public data handed in by the caller. Nothing else from the public
    /// ledger is reachable during execution.
    pub fn public_input(&self, name: &str) -> Result<&[u8], ExecutionError> {
        self.proposal
            .public_inputs
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ExecutionError::MissingPublicInput(name.into()))
    }

    pub fn public_u64(&self, name: &str) -> Result<u64, ExecutionError> {
        decode_u64(self.public_input(name)?)
            .ok_or_else(|| ExecutionError::InvalidArgument(name.into()))
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let key = self.full_key(key);
        match self.writes.get(&key) {
            Some(written) => written.clone(),
            None => self.snapshot.get(&key).cloned(),
        }
    }

    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        let key = self.full_key(key);
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: &[u8]) {
        let key = self.full_key(key);
        self.writes.insert(key, None);
    }

    /// Queues a fire-and-forget write to a public contract. Submitted with the
    /// finalized transaction; no response flows back into private state.
    pub fn emit_external_call(&mut self, target: Vec<u8>, payload: Vec<u8>) {
        self.outbound.push(OutboundCall { target, payload });
    }

    /// Sets the data returned to the caller once the call commits.
    pub fn set_return(&mut self, output: Vec<u8>) {
        self.output = output;
    }
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}
