//! Terracube - tile production and mosaicking for satellite-imagery data cubes
//!
//! This library converts irregularly-shaped scene acquisitions into a
//! regular, queryable tiled store: it computes which fixed-grid tile
//! footprints a scene intersects, reprojects the scene's stacked bands onto
//! each footprint's exact pixel grid, merges overlapping scenes into
//! mosaics under explicit pixel-precedence rules, and records each scene's
//! tile set transactionally - all-or-nothing.
//!
//! # High-Level API
//!
//! ```no_run
//! use std::sync::Arc;
//! use terracube::config::IngestConfig;
//! use terracube::grid::{TileGridSpec, TileTypeId};
//! use terracube::store::{MemoryStore, TileTypeRegistry};
//! use terracube::transaction::IngestEngine;
//!
//! # fn ingest(scene: &dyn terracube::raster::SceneSource) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TileTypeRegistry::new()
//!     .with_spec(TileTypeId(1), TileGridSpec::wgs84_one_degree());
//! let engine = IngestEngine::new(
//!     IngestConfig::new("/data/cube"),
//!     Arc::new(MemoryStore::new()),
//!     registry,
//! )?;
//!
//! let mut tx = engine.begin(TileTypeId(1))?;
//! tx.process(scene)?;
//! let _records = tx.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod grid;
pub mod logging;
pub mod mosaic;
pub mod raster;
pub mod reproject;
pub mod store;
pub mod tile;
pub mod transaction;

/// Version of the terracube library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
