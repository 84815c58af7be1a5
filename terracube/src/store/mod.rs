//! Metadata store boundary and the tile type registry.
//!
//! The relational catalogue that owns acquisitions, datasets and tile
//! records lives outside this engine. The engine talks to it through the
//! [`MetadataStore`] trait: an explicit transaction handle from `begin()`,
//! an all-or-nothing `commit()` of record drafts, and read access for
//! mosaic detection and ingest dedup. The crate ships a dashmap-backed
//! [`MemoryStore`] as the reference implementation; production deployments
//! put their relational backend behind the same trait.

mod memory;
mod registry;

pub use memory::MemoryStore;
pub use registry::{RegistryError, TileTypeRegistry};

use crate::grid::{TileFootprint, TileTypeId};
use crate::tile::{NewTileRecord, TileRecord};
use thiserror::Error;

/// Errors raised by a metadata store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction committed a tile for this footprint after the
    /// caller read it. The caller re-reads current state and retries once;
    /// a second conflict is fatal.
    #[error("persistence conflict on footprint {footprint}: current record changed")]
    PersistenceConflict { footprint: TileFootprint },

    /// The transaction handle is not open (already committed, rolled back,
    /// or never issued by this store).
    #[error("unknown store transaction {0}")]
    UnknownTransaction(u64),

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Explicit handle for one open store transaction.
///
/// Returned by [`MetadataStore::begin`] and consumed by `commit`/`rollback`;
/// holding the handle is the only way to write, so no ambient transaction
/// state exists anywhere.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct StoreTx {
    id: u64,
}

impl StoreTx {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    /// Numeric id of the transaction, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Catalogue interface the engine persists tile records through.
///
/// Implementations must be `Send + Sync`; commit must be atomic - either
/// every draft becomes a record or none does.
pub trait MetadataStore: Send + Sync {
    /// Opens a transaction and returns its handle.
    fn begin(&self) -> Result<StoreTx, StoreError>;

    /// Atomically persists the drafts, returning the created records in
    /// input order.
    ///
    /// For every draft whose `expected_prior` no longer matches the
    /// footprint's current record, the whole commit fails with
    /// [`StoreError::PersistenceConflict`] and nothing is applied.
    fn commit(
        &self,
        tx: StoreTx,
        records: Vec<NewTileRecord>,
    ) -> Result<Vec<TileRecord>, StoreError>;

    /// Abandons a transaction without writing anything.
    fn rollback(&self, tx: StoreTx) -> Result<(), StoreError>;

    /// The record currently holding a footprint, if any. Used for mosaic
    /// detection.
    fn current_tile(
        &self,
        tile_type: TileTypeId,
        footprint: TileFootprint,
    ) -> Result<Option<TileRecord>, StoreError>;

    /// True if the dataset already contributed a tile to the footprint -
    /// the dedup key that makes re-ingestion idempotent. Stays true after
    /// the record is superseded by a mosaic.
    fn has_dataset_tile(
        &self,
        tile_type: TileTypeId,
        footprint: TileFootprint,
        dataset_id: &str,
    ) -> Result<bool, StoreError>;
}
