//! RocksDB-backed persistent engine state.
//!
//! One database holds a column family per engine: the escrow's checkpoint
//! logs and locks, and the distributor's weekly records and cursors. Each
//! [`RocksStore`] is a [`StateStore`] bound to one column family; every
//! engine batch lands as one atomic RocksDB [`WriteBatch`].

use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use vesta_core::error::StoreError;
use vesta_core::store::{BatchOp, StateRead, StateStore};

// --- Column family names ---

pub const CF_ESCROW: &str = "escrow";
pub const CF_REWARDS: &str = "rewards";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_ESCROW, CF_REWARDS];

/// An open state database shared by the engine stores.
#[derive(Clone)]
pub struct StateDb {
    db: Arc<DB>,
}

impl StateDb {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Store for the vote-escrow engine.
    pub fn escrow_store(&self) -> RocksStore {
        RocksStore {
            db: Arc::clone(&self.db),
            cf: CF_ESCROW,
        }
    }

    /// Store for the reward distributor.
    pub fn rewards_store(&self) -> RocksStore {
        RocksStore {
            db: Arc::clone(&self.db),
            cf: CF_REWARDS,
        }
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in ALL_CFS {
            let cf = self
                .db
                .cf_handle(name)
                .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))?;
            self.db
                .flush_cf(cf)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

/// A [`StateStore`] over one column family of a [`StateDb`].
pub struct RocksStore {
    db: Arc<DB>,
    cf: &'static str,
}

impl RocksStore {
    /// Column family this store reads and writes.
    pub fn column_family(&self) -> &'static str {
        self.cf
    }

    /// Number of keys in the column family.
    pub fn key_count(&self) -> Result<usize, StoreError> {
        let cf = self.cf_handle()?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            item.map_err(|e| StoreError::Backend(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    fn cf_handle(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(self.cf)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {}", self.cf)))
    }
}

impl StateRead for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf_handle()?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl StateStore for RocksStore {
    fn write(&mut self, batch: vesta_core::store::WriteBatch) -> Result<(), StoreError> {
        let cf = self.cf_handle()?;
        let mut wb = WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => wb.put_cf(cf, key, value),
                BatchOp::Delete(key) => wb.delete_cf(cf, key),
            }
        }
        self.db
            .write(wb)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
