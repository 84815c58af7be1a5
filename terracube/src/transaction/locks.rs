//! Footprint-level exclusive locks.
//!
//! Mosaic resolution and commit for a footprint must be serialized against
//! every other transaction touching the same footprint; two scenes racing
//! to mosaic one tile would otherwise lose one contribution. The registry
//! hands out one mutex per `(tile_type, footprint)` pair, shared by all
//! transactions of an engine.

use crate::grid::{TileFootprint, TileTypeId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Process-wide registry of per-footprint mutexes.
#[derive(Debug, Default)]
pub struct FootprintLocks {
    locks: DashMap<(TileTypeId, TileFootprint), Arc<Mutex<()>>>,
}

impl FootprintLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding a footprint, created on first use.
    ///
    /// Callers locking several footprints must acquire them in footprint
    /// order to stay deadlock-free.
    pub fn handle(&self, tile_type: TileTypeId, footprint: TileFootprint) -> Arc<Mutex<()>> {
        self.locks
            .entry((tile_type, footprint))
            .or_default()
            .clone()
    }
}
