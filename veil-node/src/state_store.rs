use veil_common::{ProposalId, StateDelta};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use im::HashMap as ImHashMap;
use log::trace;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key {key} is locked by another proposal")]
    KeyLocked { key: String },
    #[error("key {key} changed since the assembly snapshot")]
    StaleSnapshot { key: String },
    #[error("proposal does not hold the lock on key {key}")]
    NotLocked { key: String },
    #[error("key {key} is already past this delta")]
    AlreadyApplied { key: String },
    #[error("key {key} is missing an earlier delta")]
    OutOfOrder { key: String },
    #[error("delta carries no base version for key {key}")]
    MissingVersion { key: String },
}

fn printable(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Private key/value state of one privacy group on one node.
///
/// Reads go through [`Snapshot`]s, which are cheap persistent copies. Writes
/// follow a single-writer-per-key rule: a proposal must [`lock`] every key of
/// its delta before it can [`commit`] it.
///
/// [`lock`]: PrivateStateStore::lock
/// [`commit`]: PrivateStateStore::commit
#[derive(Clone, Default)]
pub struct PrivateStateStore(Arc<RwLock<Inner>>);

#[derive(Default)]
struct Inner {
    values: ImHashMap<Vec<u8>, Vec<u8>>,
    // Deleted keys keep their version so a re-created key never looks untouched.
    versions: ImHashMap<Vec<u8>, u64>,
    locks: HashMap<Vec<u8>, ProposalId>,
    held: HashMap<ProposalId, Vec<Vec<u8>>>,
}

impl Inner {
    fn apply(&mut self, delta: &StateDelta) {
        for (key, value) in delta {
            match value {
                Some(value) => {
                    self.values.insert(key.clone(), value.clone());
                }
                None => {
                    self.values.remove(key);
                }
            }
            let version = self.versions.get(key).copied().unwrap_or_default() + 1;
            self.versions.insert(key.clone(), version);
        }
    }

    fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or_default()
    }
}

impl PrivateStateStore {
    pub fn new() -> Self {
        Self(Default::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.read().values.get(key).cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.read();
        Snapshot {
            values: inner.values.clone(),
            versions: inner.versions.clone(),
        }
    }

    /// Reserves every key of `delta` for `proposal`.
    ///
    /// Fails without reserving anything if one of the keys is held by another
    /// proposal or was written after `base` was taken.
    pub fn lock(
        &self,
        proposal: ProposalId,
        delta: &StateDelta,
        base: &Snapshot,
    ) -> Result<(), StoreError> {
        let mut inner = self.write();
        for key in delta.keys() {
            match inner.locks.get(key) {
                Some(owner) if *owner != proposal => {
                    return Err(StoreError::KeyLocked { key: printable(key) })
                }
                _ => {}
            }
            if inner.version(key) != base.version(key) {
                return Err(StoreError::StaleSnapshot { key: printable(key) });
            }
        }
        let keys: Vec<_> = delta.keys().cloned().collect();
        for key in &keys {
            inner.locks.insert(key.clone(), proposal);
        }
        trace!("locked {} keys", keys.len());
        inner.held.entry(proposal).or_default().extend(keys);
        Ok(())
    }

    /// First key of `delta` reserved by a proposal other than `proposal`.
    pub fn conflict(&self, proposal: &ProposalId, delta: &StateDelta) -> Option<String> {
        let inner = self.read();
        delta
            .keys()
            .find(|key| matches!(inner.locks.get(*key), Some(owner) if owner != proposal))
            .map(|key| printable(key))
    }

    /// Applies the delta of a proposal that holds all of its keys, then
    /// releases them.
    pub fn commit(&self, proposal: ProposalId, delta: &StateDelta) -> Result<(), StoreError> {
        let mut inner = self.write();
        if let Some(key) = delta
            .keys()
            .find(|key| inner.locks.get(*key) != Some(&proposal))
        {
            return Err(StoreError::NotLocked { key: printable(key) });
        }
        inner.apply(delta);
        release_locked(&mut inner, &proposal);
        Ok(())
    }

    pub fn release(&self, proposal: &ProposalId) {
        release_locked(&mut self.write(), proposal);
    }

    /// Applies a delta committed through another member's coordinator.
    ///
    /// Every key must currently sit at the version in `base_versions`, the
    /// state the delta was computed on. Nothing is written otherwise:
    /// [`StoreError::AlreadyApplied`] for a duplicate or superseded delta,
    /// [`StoreError::OutOfOrder`] when an earlier delta has not arrived yet.
    pub fn apply_committed(
        &self,
        delta: &StateDelta,
        base_versions: &BTreeMap<Vec<u8>, u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.write();
        for key in delta.keys() {
            let base = *base_versions
                .get(key)
                .ok_or_else(|| StoreError::MissingVersion { key: printable(key) })?;
            let current = inner.version(key);
            if current > base {
                return Err(StoreError::AlreadyApplied { key: printable(key) });
            }
            if current < base {
                return Err(StoreError::OutOfOrder { key: printable(key) });
            }
        }
        inner.apply(delta);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn apply(&self, delta: &StateDelta) {
        self.write().apply(delta);
    }

    pub fn locked_keys(&self) -> usize {
        self.read().locks.len()
    }
}

fn release_locked(inner: &mut Inner, proposal: &ProposalId) {
    if let Some(keys) = inner.held.remove(proposal) {
        for key in keys {
            if inner.locks.get(&key) == Some(proposal) {
                inner.locks.remove(&key);
            }
        }
    }
}

/// Point-in-time view of the store; later writes never show through.
#[derive(Clone, Default)]
pub struct Snapshot {
    values: ImHashMap<Vec<u8>, Vec<u8>>,
    versions: ImHashMap<Vec<u8>, u64>,
}

impl Snapshot {
    pub fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.values.get(key)
    }

    pub fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or_default()
    }
}
