//! In-flight tile state between reprojection and commit.

use super::payload::{write_payload, TileIoError, TilePayload};
use crate::grid::{Extent, TileFootprint, TileTypeId};
use crate::raster::{BandId, RasterBand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One footprint's reprojected raster for one scene, backed by a payload
/// file at a temporary path owned by the transaction.
///
/// The contents either get promoted to a final path on commit, or the
/// temporary file is deleted - explicitly via [`TileContents::remove`] for
/// tiles pruned as carrying no data, or by the transaction's temp directory
/// teardown on rollback.
#[derive(Debug)]
pub struct TileContents {
    payload: TilePayload,
    temp_path: PathBuf,
    file_name: String,
    digest: String,
    has_data: bool,
    source_paths: Vec<PathBuf>,
}

impl TileContents {
    /// Writes `payload` to `temp_dir/file_name` and wraps it.
    ///
    /// `source_paths` is empty for a plain reprojected tile and lists the
    /// contributing payload files for a mosaic.
    pub(crate) fn write_new(
        payload: TilePayload,
        temp_dir: &Path,
        file_name: String,
        has_data: bool,
        source_paths: Vec<PathBuf>,
    ) -> Result<Self, TileIoError> {
        let temp_path = temp_dir.join(&file_name);
        let digest = write_payload(&temp_path, &payload)?;
        Ok(Self {
            payload,
            temp_path,
            file_name,
            digest,
            has_data,
            source_paths,
        })
    }

    /// Tile type the contents belong to.
    pub fn tile_type(&self) -> TileTypeId {
        self.payload.tile_type
    }

    /// Grid cell the contents cover.
    pub fn footprint(&self) -> TileFootprint {
        self.payload.footprint
    }

    /// Tile extent in the grid CRS.
    pub fn extent(&self) -> Extent {
        self.payload.extent
    }

    /// True if at least one validity-band pixel carries an observation.
    /// Contents reporting `false` are never promoted to a record.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Temporary payload location, valid until commit or rollback.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// File name the payload will keep at its final location.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Hex SHA-256 of the payload file as written.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Contributing payload files; non-empty only for mosaics.
    pub fn source_paths(&self) -> &[PathBuf] {
        &self.source_paths
    }

    /// Bands in catalogue order.
    pub fn bands(&self) -> &[(BandId, RasterBand)] {
        &self.payload.bands
    }

    /// Looks up a band by id.
    pub fn band(&self, id: &BandId) -> Option<&RasterBand> {
        self.payload.band(id)
    }

    /// The decoded payload.
    pub fn payload(&self) -> &TilePayload {
        &self.payload
    }

    /// Deletes the temporary payload file.
    ///
    /// Called when a tile is pruned (no data, or superseded before commit).
    /// Missing files are tolerated so pruning is idempotent.
    pub fn remove(self) -> std::io::Result<()> {
        debug!(path = %self.temp_path.display(), "removing pruned tile payload");
        match fs::remove_file(&self.temp_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::BandKind;

    fn contents(dir: &Path, has_data: bool) -> TileContents {
        let payload = TilePayload {
            tile_type: TileTypeId(1),
            footprint: TileFootprint::new(141, -38),
            extent: Extent::new(141.0, -38.0, 142.0, -37.0),
            width: 2,
            height: 2,
            bands: vec![(
                BandId::new("PQA"),
                RasterBand::new(BandKind::Categorical, 0.0, vec![1.0, 0.0, 0.0, 1.0]),
            )],
        };
        TileContents::write_new(
            payload,
            dir,
            "test_141_-038.tile".to_string(),
            has_data,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_write_new_creates_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let tile = contents(dir.path(), true);
        assert!(tile.temp_path().exists());
        assert!(tile.has_data());
        assert_eq!(tile.footprint(), TileFootprint::new(141, -38));
    }

    #[test]
    fn test_remove_deletes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let tile = contents(dir.path(), false);
        let path = tile.temp_path().to_path_buf();
        assert!(path.exists());
        tile.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tile = contents(dir.path(), false);
        fs::remove_file(tile.temp_path()).unwrap();
        assert!(tile.remove().is_ok());
    }

    #[test]
    fn test_plain_tile_has_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        let tile = contents(dir.path(), true);
        assert!(tile.source_paths().is_empty());
    }
}
