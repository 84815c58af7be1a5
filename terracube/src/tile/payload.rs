//! Tile payload file format.
//!
//! A payload file is a four-byte magic/version tag followed by the
//! bincode-serialized [`TilePayload`]. The format is deliberately small:
//! band ids, grid dimensions, nodata values, and raw pixel buffers - enough
//! for mosaicking and re-derivation without re-reading source scenes.
//!
//! Writers return the SHA-256 digest of the bytes they wrote; the digest is
//! carried on the tile record and re-checked when a payload is promoted to
//! its final location, so a record can never reference a partial file.

use crate::grid::{Extent, TileFootprint, TileTypeId};
use crate::raster::{BandId, RasterBand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Magic tag and format version, first four bytes of every payload file.
const MAGIC: &[u8; 4] = b"TCT1";

/// Errors raised reading or writing tile payload files.
#[derive(Debug, Error)]
pub enum TileIoError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the payload magic tag.
    #[error("{0} is not a tile payload file")]
    BadMagic(String),

    /// Serialization or deserialization failed.
    #[error("payload encoding error: {0}")]
    Encoding(String),
}

/// Serialized body of one tile: raster plus enough context to mosaic it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePayload {
    /// Tile type the payload belongs to.
    pub tile_type: TileTypeId,
    /// Grid cell the payload covers.
    pub footprint: TileFootprint,
    /// Tile extent in the grid CRS.
    pub extent: Extent,
    /// Tile width in pixels.
    pub width: u32,
    /// Tile height in pixels.
    pub height: u32,
    /// Bands in catalogue order.
    pub bands: Vec<(BandId, RasterBand)>,
}

impl TilePayload {
    /// Looks up a band by id.
    pub fn band(&self, id: &BandId) -> Option<&RasterBand> {
        self.bands.iter().find(|(b, _)| b == id).map(|(_, r)| r)
    }
}

/// Writes a payload file and returns the hex SHA-256 of its bytes.
pub(crate) fn write_payload(path: &Path, payload: &TilePayload) -> Result<String, TileIoError> {
    let body =
        bincode::serialize(payload).map_err(|e| TileIoError::Encoding(e.to_string()))?;

    let mut bytes = Vec::with_capacity(MAGIC.len() + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&body);

    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;

    Ok(hex_digest(&bytes))
}

/// Reads a payload file back, validating the magic tag.
pub fn read_payload(path: &Path) -> Result<TilePayload, TileIoError> {
    let bytes = fs::read(path)?;
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(TileIoError::BadMagic(path.display().to_string()));
    }
    bincode::deserialize(&bytes[MAGIC.len()..])
        .map_err(|e| TileIoError::Encoding(e.to_string()))
}

/// Hex SHA-256 of a payload file on disk.
pub(crate) fn file_digest(path: &Path) -> Result<String, TileIoError> {
    Ok(hex_digest(&fs::read(path)?))
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
