//! Tile artefacts: payload files, in-flight contents, committed records.
//!
//! A tile exists in two forms. While a scene's transaction is open it is a
//! [`TileContents`]: a reprojected raster written to a temporary payload
//! file owned by the transaction. On commit it becomes a [`TileRecord`]:
//! the payload renamed to its final location under the tile root plus the
//! metadata row the store keeps. Invalid tiles and rolled-back transactions
//! never leave the temporary stage.

mod contents;
mod payload;
mod record;

pub use contents::TileContents;
pub use payload::{read_payload, TileIoError, TilePayload};
pub(crate) use payload::file_digest;
pub use record::{NewTileRecord, RecordId, TileRecord};

use crate::grid::TileFootprint;

/// File name of a tile payload: dataset label plus zero-padded footprint
/// indices, mirroring the catalogue's tile naming convention.
pub fn tile_file_name(dataset_id: &str, footprint: TileFootprint) -> String {
    format!(
        "{}_{:03}_{:04}.tile",
        dataset_id, footprint.x_index, footprint.y_index
    )
}

/// File name of a footprint's mosaic payload.
///
/// Keyed by the dataset whose ingestion produced the mosaic, so a chain of
/// superseding mosaics never collides with the predecessors listed in its
/// provenance.
pub fn mosaic_file_name(dataset_id: &str, footprint: TileFootprint) -> String {
    format!(
        "{}_{:03}_{:04}_mosaic.tile",
        dataset_id, footprint.x_index, footprint.y_index
    )
}
