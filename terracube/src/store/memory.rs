//! In-memory reference implementation of the metadata store.

use super::{MetadataStore, StoreError, StoreTx};
use crate::grid::{TileFootprint, TileTypeId};
use crate::tile::{NewTileRecord, RecordId, TileRecord};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Dashmap-backed metadata store.
///
/// Semantically equivalent to the relational catalogue for everything the
/// engine needs: one current record per `(tile_type, footprint)`, a dataset
/// index for ingest dedup, and conflict detection against concurrent
/// commits. Used by the test suites and embeddable as-is by small drivers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_record_id: AtomicU64,
    next_tx_id: AtomicU64,
    open_txs: DashSet<u64>,
    current: DashMap<(TileTypeId, TileFootprint), TileRecord>,
    /// `(tile_type, footprint, dataset_id)` of every record ever committed.
    /// Entries survive supersession so re-ingestion stays idempotent.
    datasets: DashSet<(TileTypeId, TileFootprint, String)>,
    /// Serializes commits so conflict checking and application are atomic.
    commit_lock: Mutex<()>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of footprints currently holding a record.
    pub fn tile_count(&self) -> usize {
        self.current.len()
    }
}

impl MetadataStore for MemoryStore {
    fn begin(&self) -> Result<StoreTx, StoreError> {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        self.open_txs.insert(id);
        debug!(tx = id, "store transaction opened");
        Ok(StoreTx::new(id))
    }

    fn commit(
        &self,
        tx: StoreTx,
        records: Vec<NewTileRecord>,
    ) -> Result<Vec<TileRecord>, StoreError> {
        if self.open_txs.remove(&tx.id()).is_none() {
            return Err(StoreError::UnknownTransaction(tx.id()));
        }

        let _guard = self.commit_lock.lock();

        // Check every draft before applying any, so a conflict leaves the
        // store untouched.
        for draft in &records {
            let current = self
                .current
                .get(&(draft.tile_type, draft.footprint))
                .map(|r| r.id);
            if current != draft.expected_prior {
                return Err(StoreError::PersistenceConflict {
                    footprint: draft.footprint,
                });
            }
        }

        let created_at = Utc::now();
        let mut created = Vec::with_capacity(records.len());
        for draft in records {
            let record = TileRecord {
                id: RecordId(self.next_record_id.fetch_add(1, Ordering::Relaxed)),
                tile_type: draft.tile_type,
                footprint: draft.footprint,
                dataset_id: draft.dataset_id.clone(),
                acquired_at: draft.acquired_at,
                path: draft.path,
                extent: draft.extent,
                digest: draft.digest,
                created_at,
                source_paths: draft.source_paths,
            };
            self.datasets
                .insert((draft.tile_type, draft.footprint, draft.dataset_id));
            self.current
                .insert((record.tile_type, record.footprint), record.clone());
            created.push(record);
        }

        debug!(tx = tx.id(), records = created.len(), "store transaction committed");
        Ok(created)
    }

    fn rollback(&self, tx: StoreTx) -> Result<(), StoreError> {
        if self.open_txs.remove(&tx.id()).is_none() {
            return Err(StoreError::UnknownTransaction(tx.id()));
        }
        debug!(tx = tx.id(), "store transaction rolled back");
        Ok(())
    }

    fn current_tile(
        &self,
        tile_type: TileTypeId,
        footprint: TileFootprint,
    ) -> Result<Option<TileRecord>, StoreError> {
        Ok(self
            .current
            .get(&(tile_type, footprint))
            .map(|r| r.clone()))
    }

    fn has_dataset_tile(
        &self,
        tile_type: TileTypeId,
        footprint: TileFootprint,
        dataset_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .datasets
            .contains(&(tile_type, footprint, dataset_id.to_string())))
    }
}
