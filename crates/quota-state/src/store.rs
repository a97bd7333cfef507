//! SnapshotStore — redb-backed persistence for pool snapshots.
//!
//! One row per pool, keyed by pool id, holding the JSON-serialized
//! `PoolSnapshot` written after the pool's latest pass. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::snapshot::PoolSnapshot;
use crate::tables::SNAPSHOTS;

/// Wrap any `Display` error from redb as `StateError::Storage` for `op`.
macro_rules! map_err {
    ($op:literal) => {
        |e| StateError::Storage {
            op: $op,
            reason: e.to_string(),
        }
    };
}

/// Thread-safe snapshot store backed by redb.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "snapshot store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory snapshot store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!("begin write"))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!("open table"))?;
        txn.commit().map_err(map_err!("commit"))?;
        Ok(())
    }

    /// Insert or replace the snapshot for `snapshot.pool_id`.
    pub fn put_snapshot(&self, snapshot: &PoolSnapshot) -> StateResult<()> {
        let key = snapshot.table_key();
        let value = serde_json::to_vec(snapshot).map_err(|e| StateError::Encode {
            pool: key.to_string(),
            reason: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(map_err!("begin write"))?;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!("open table"))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!("insert"))?;
        }
        txn.commit().map_err(map_err!("commit"))?;
        debug!(
            pool = %key,
            workers = snapshot.state.workers.len(),
            pending = snapshot.state.requests.len(),
            "snapshot stored"
        );
        Ok(())
    }

    pub fn get_snapshot(&self, pool_id: &str) -> StateResult<Option<PoolSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!("begin read"))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!("open table"))?;
        match table.get(pool_id).map_err(map_err!("get"))? {
            Some(guard) => {
                let snapshot: PoolSnapshot =
                    serde_json::from_slice(guard.value()).map_err(|e| StateError::Decode {
                        pool: pool_id.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Ids of every pool with a stored snapshot, in key order.
    pub fn list_pools(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!("begin read"))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!("open table"))?;
        let mut pools = Vec::new();
        for entry in table.iter().map_err(map_err!("iterate"))? {
            let (key, _) = entry.map_err(map_err!("iterate"))?;
            pools.push(key.value().to_string());
        }
        Ok(pools)
    }

    /// Delete a pool's snapshot. Returns true if it existed.
    pub fn delete_snapshot(&self, pool_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!("begin write"))?;
        let existed;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!("open table"))?;
            existed = table.remove(pool_id).map_err(map_err!("remove"))?.is_some();
        }
        txn.commit().map_err(map_err!("commit"))?;
        debug!(pool = %pool_id, existed, "snapshot deleted");
        Ok(existed)
    }
}
