//! Engine configuration.
//!
//! One explicit settings struct, passed into the ingest engine at
//! construction. There is no ambient configuration state anywhere in the
//! crate; everything a transaction needs arrives through this struct.

use std::path::PathBuf;

/// Settings for an [`crate::transaction::IngestEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Root directory of the tile store. Committed payload files live at
    /// `<tile_root>/<tile_type>/<x>_<y>/<name>.tile`.
    pub tile_root: PathBuf,
    /// Directory for per-transaction temporary state. Defaults to
    /// `<tile_root>/ingest_temp`; keeping it on the same filesystem as the
    /// tile root lets commits promote payloads with an atomic rename.
    pub temp_dir: Option<PathBuf>,
    /// Worker threads for parallel footprint reprojection; `0` sizes the
    /// pool to the machine.
    pub workers: usize,
}

impl IngestConfig {
    /// Creates a configuration rooted at `tile_root` with defaults.
    pub fn new(tile_root: impl Into<PathBuf>) -> Self {
        Self {
            tile_root: tile_root.into(),
            temp_dir: None,
            workers: 0,
        }
    }

    /// Overrides the temporary directory.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Overrides the reprojection worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// The effective temporary directory root.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.tile_root.join("ingest_temp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::new("/cube");
        assert_eq!(config.tile_root, PathBuf::from("/cube"));
        assert_eq!(config.workers, 0);
        assert_eq!(config.temp_root(), PathBuf::from("/cube/ingest_temp"));
    }

    #[test]
    fn test_with_temp_dir_overrides_default() {
        let config = IngestConfig::new("/cube").with_temp_dir("/scratch");
        assert_eq!(config.temp_root(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_with_workers() {
        let config = IngestConfig::new("/cube").with_workers(4);
        assert_eq!(config.workers, 4);
    }
}
