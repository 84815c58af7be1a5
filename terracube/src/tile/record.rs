//! Committed tile metadata.

use crate::grid::{Extent, TileFootprint, TileTypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Store-assigned identifier of a committed tile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persisted representation of a committed tile.
///
/// Created only when a scene's transaction commits, never partially
/// written. A record whose `source_paths` is non-empty is a mosaic and the
/// listed payload files are its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Store-assigned id.
    pub id: RecordId,
    /// Tile type of the grid the tile lives on.
    pub tile_type: TileTypeId,
    /// Grid cell the tile covers.
    pub footprint: TileFootprint,
    /// Dataset whose ingestion produced this record.
    pub dataset_id: String,
    /// Acquisition time of that dataset; drives mosaic recency precedence.
    pub acquired_at: DateTime<Utc>,
    /// Final payload location under the tile root.
    pub path: PathBuf,
    /// Tile extent in the grid CRS.
    pub extent: Extent,
    /// Hex SHA-256 of the payload file at commit time.
    pub digest: String,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
    /// Contributing payload files; non-empty only for mosaics.
    pub source_paths: Vec<PathBuf>,
}

impl TileRecord {
    /// True if this record was derived from multiple source tiles.
    pub fn is_mosaic(&self) -> bool {
        !self.source_paths.is_empty()
    }
}

/// A record draft handed to the store at commit time.
///
/// `expected_prior` is the record the transaction observed on this
/// footprint when it resolved mosaics (None when the footprint was empty).
/// The store refuses the commit with a persistence conflict if the
/// footprint's current record has changed since, which is the signal for
/// the transaction to re-read and retry.
#[derive(Debug, Clone)]
pub struct NewTileRecord {
    pub tile_type: TileTypeId,
    pub footprint: TileFootprint,
    pub dataset_id: String,
    pub acquired_at: DateTime<Utc>,
    pub path: PathBuf,
    pub extent: Extent,
    pub digest: String,
    pub source_paths: Vec<PathBuf>,
    pub expected_prior: Option<RecordId>,
}
