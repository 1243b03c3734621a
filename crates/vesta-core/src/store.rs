//! Keyed state storage interface and in-memory implementation.
//!
//! The ledger executor provides durable key/value storage with atomic batch
//! writes ([`StateStore`]). Engine operations never write directly: they stage
//! reads and writes in a [`StagedState`] overlay and hand the resulting
//! [`WriteBatch`] to the store only after every check has passed, so a
//! rejected call leaves storage untouched.
//!
//! Keys are [`StorageKey`]s and values are engine types, both
//! bincode-encoded. [`MemoryStore`] is suitable for testing; the node crate
//! provides a RocksDB-backed store.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::types::{Address, Timestamp};

/// Every persisted record, by namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
pub enum StorageKey {
    /// Escrow parameters written once at initialisation.
    EscrowConfig,
    /// Index of the newest global checkpoint.
    GlobalEpoch,
    /// Global checkpoint by epoch.
    GlobalPoint(u64),
    /// Number of checkpoints recorded for an account.
    UserEpochCount(Address),
    /// Account checkpoint by user epoch.
    UserPoint(Address, u64),
    /// Account lock.
    Locked(Address),
    /// Pending global slope decrease at a week boundary.
    SlopeChange(Timestamp),
    /// Reward distributor parameters and running totals.
    DistributorState,
    /// Reward week by week start.
    RewardEpoch(Timestamp),
    /// Account claim progress.
    ClaimCursor(Address),
}

impl StorageKey {
    /// Encoded key bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        encode_value(self)
    }
}

/// Encode a value with the standard bincode configuration.
pub fn encode_value<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

/// Decode a value written by [`encode_value`].
pub fn decode_value<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Codec(e.to_string()))
}

/// A single staged mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered set of mutations applied atomically by [`StateStore::write`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Read access to raw key/value state.
pub trait StateRead {
    /// Raw value for `key`, or `None` if absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Durable keyed storage with atomic batch writes.
///
/// Reads go through `&self`; writes take `&mut self`, so sharing a store
/// across threads for mutation still needs a lock around it.
pub trait StateStore: StateRead + Send + Sync {
    /// Apply every operation in `batch`, or none of them.
    fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// Typed access on top of [`StateRead`].
pub trait StateReadExt: StateRead {
    /// Load and decode the record at `key`.
    fn load<T: bincode::Decode<()>>(&self, key: &StorageKey) -> Result<Option<T>, StoreError> {
        match self.get(&key.to_bytes()?)? {
            Some(bytes) => decode_value(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Load the record at `key`, falling back to `T::default()`.
    fn load_or_default<T: bincode::Decode<()> + Default>(
        &self,
        key: &StorageKey,
    ) -> Result<T, StoreError> {
        Ok(self.load(key)?.unwrap_or_default())
    }
}

impl<R: StateRead + ?Sized> StateReadExt for R {}

/// Write overlay used for the duration of one engine call.
///
/// Reads see staged writes first, then the underlying state. Nothing reaches
/// the store until [`into_batch`](StagedState::into_batch) is committed.
pub struct StagedState<'a, R: StateRead + ?Sized> {
    base: &'a R,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, R: StateRead + ?Sized> StagedState<'a, R> {
    pub fn new(base: &'a R) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    /// Stage an encoded write.
    pub fn store<T: bincode::Encode>(&mut self, key: &StorageKey, value: &T) -> Result<(), StoreError> {
        self.pending.insert(key.to_bytes()?, Some(encode_value(value)?));
        Ok(())
    }

    /// Stage a deletion.
    pub fn remove(&mut self, key: &StorageKey) -> Result<(), StoreError> {
        self.pending.insert(key.to_bytes()?, None);
        Ok(())
    }

    /// Number of distinct keys touched.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Convert staged writes into a batch for [`StateStore::write`].
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in self.pending {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            }
        }
        batch
    }
}

impl<R: StateRead + ?Sized> StateRead for StagedState<'_, R> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get(key),
        }
    }
}

/// In-memory state storage for testing.
///
/// Stores everything in a `BTreeMap` with no persistence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl StateRead for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.get(key).cloned())
    }
}

impl StateStore for MemoryStore {
    fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(k, v) => {
                    self.map.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    self.map.remove(&k);
                }
            }
        }
        Ok(())
    }
}
