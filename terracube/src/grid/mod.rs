//! Tile grid definitions and footprint coverage.
//!
//! A *tile type* is a fixed, infinite grid laid over a coordinate reference
//! system: an origin, a pixel size, and a tile size in pixels. Every tile of
//! that type occupies one cell of the grid, addressed by an integer
//! [`TileFootprint`] index pair. Scenes arrive with irregular extents; the
//! [`TileGridSpec::coverage`] calculator answers "which grid cells does this
//! scene touch", in a deterministic row-major order, so downstream
//! reprojection and tests are reproducible.

mod types;

pub use types::{Extent, TileFootprint, TileTypeId};

use serde::{Deserialize, Serialize};

/// Static definition of a tile type's grid.
///
/// Immutable and shared by all tiles of the tile type. The grid is anchored
/// at `(origin_x, origin_y)` in the grid CRS; cell `(i, j)` spans
/// `[origin_x + i*span, origin_x + (i+1)*span)` horizontally and the
/// equivalent vertically, where `span = tile_width * pixel_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGridSpec {
    /// Grid origin X in CRS units.
    pub origin_x: f64,
    /// Grid origin Y in CRS units.
    pub origin_y: f64,
    /// Size of one pixel in CRS units (square pixels).
    pub pixel_size: f64,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// EPSG code of the grid coordinate reference system.
    pub crs_epsg: u16,
}

impl TileGridSpec {
    /// One-degree tiles of 4000x4000 pixels on WGS84, anchored at (0, 0).
    ///
    /// This is the conventional grid for continental land-cover cubes and
    /// the grid used throughout the test suite.
    pub fn wgs84_one_degree() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_size: 0.00025,
            tile_width: 4000,
            tile_height: 4000,
            crs_epsg: 4326,
        }
    }

    /// Horizontal extent of one tile in CRS units.
    #[inline]
    pub fn tile_span_x(&self) -> f64 {
        self.tile_width as f64 * self.pixel_size
    }

    /// Vertical extent of one tile in CRS units.
    #[inline]
    pub fn tile_span_y(&self) -> f64 {
        self.tile_height as f64 * self.pixel_size
    }

    /// Bounding box of a footprint's tile in the grid CRS.
    pub fn footprint_extent(&self, footprint: TileFootprint) -> Extent {
        let min_x = self.origin_x + footprint.x_index as f64 * self.tile_span_x();
        let min_y = self.origin_y + footprint.y_index as f64 * self.tile_span_y();
        Extent::new(
            min_x,
            min_y,
            min_x + self.tile_span_x(),
            min_y + self.tile_span_y(),
        )
    }

    /// Footprint of the grid cell containing the given point.
    pub fn footprint_at(&self, x: f64, y: f64) -> TileFootprint {
        TileFootprint::new(
            ((x - self.origin_x) / self.tile_span_x()).floor() as i32,
            ((y - self.origin_y) / self.tile_span_y()).floor() as i32,
        )
    }

    /// Computes the minimal set of footprints whose tiles intersect `extent`.
    ///
    /// Intersection is strict: a scene that only touches a tile boundary
    /// does not cover that tile. The result is ordered row-major, by
    /// `y_index` then `x_index`, so processing order is deterministic.
    ///
    /// A degenerate extent (zero area, inverted, or non-finite) yields an
    /// empty sequence rather than an error.
    pub fn coverage(&self, extent: &Extent) -> Vec<TileFootprint> {
        if extent.is_degenerate() {
            return Vec::new();
        }

        let span_x = self.tile_span_x();
        let span_y = self.tile_span_y();

        // First cell containing the minimum edge; last cell strictly before
        // the maximum edge (an extent ending exactly on a boundary does not
        // reach into the next cell).
        let x_first = ((extent.min_x - self.origin_x) / span_x).floor() as i64;
        let x_last = ((extent.max_x - self.origin_x) / span_x).ceil() as i64 - 1;
        let y_first = ((extent.min_y - self.origin_y) / span_y).floor() as i64;
        let y_last = ((extent.max_y - self.origin_y) / span_y).ceil() as i64 - 1;

        let mut footprints = Vec::new();
        for y in y_first..=y_last {
            for x in x_first..=x_last {
                footprints.push(TileFootprint::new(x as i32, y as i32));
            }
        }
        footprints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TileGridSpec {
        TileGridSpec::wgs84_one_degree()
    }

    #[test]
    fn test_tile_span_is_one_degree() {
        let g = grid();
        assert!((g.tile_span_x() - 1.0).abs() < 1e-12);
        assert!((g.tile_span_y() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_footprint_extent_southern_hemisphere() {
        // Footprint (117, -35) covers lon 117..118, lat -35..-34.
        let ext = grid().footprint_extent(TileFootprint::new(117, -35));
        assert!((ext.min_x - 117.0).abs() < 1e-9);
        assert!((ext.max_x - 118.0).abs() < 1e-9);
        assert!((ext.min_y - (-35.0)).abs() < 1e-9);
        assert!((ext.max_y - (-34.0)).abs() < 1e-9);
    }

    #[test]
    fn test_footprint_at_interior_point() {
        assert_eq!(
            grid().footprint_at(117.5, -34.3),
            TileFootprint::new(117, -35)
        );
        assert_eq!(grid().footprint_at(0.5, 0.5), TileFootprint::new(0, 0));
        assert_eq!(grid().footprint_at(-0.5, -0.5), TileFootprint::new(-1, -1));
    }

    #[test]
    fn test_coverage_single_tile() {
        // A scene wholly inside one cell covers exactly that cell.
        let ext = Extent::new(117.2, -34.8, 117.9, -34.1);
        assert_eq!(grid().coverage(&ext), vec![TileFootprint::new(117, -35)]);
    }

    #[test]
    fn test_coverage_spans_two_columns() {
        let ext = Extent::new(116.5, -34.8, 117.5, -34.1);
        assert_eq!(
            grid().coverage(&ext),
            vec![TileFootprint::new(116, -35), TileFootprint::new(117, -35)]
        );
    }

    #[test]
    fn test_coverage_two_by_two_row_major() {
        let ext = Extent::new(140.5, -38.5, 141.5, -37.5);
        assert_eq!(
            grid().coverage(&ext),
            vec![
                TileFootprint::new(140, -39),
                TileFootprint::new(141, -39),
                TileFootprint::new(140, -38),
                TileFootprint::new(141, -38),
            ]
        );
    }

    #[test]
    fn test_coverage_boundary_does_not_spill() {
        // An extent ending exactly on a tile boundary does not reach the
        // next cell, and one starting on a boundary belongs to that cell.
        let ext = Extent::new(117.0, -35.0, 118.0, -34.0);
        assert_eq!(grid().coverage(&ext), vec![TileFootprint::new(117, -35)]);
    }

    #[test]
    fn test_coverage_degenerate_extent_is_empty() {
        // Zero area.
        assert!(grid()
            .coverage(&Extent::new(117.0, -35.0, 117.0, -34.0))
            .is_empty());
        // Inverted.
        assert!(grid()
            .coverage(&Extent::new(118.0, -34.0, 117.0, -35.0))
            .is_empty());
        // Non-finite.
        assert!(grid()
            .coverage(&Extent::new(f64::NAN, -35.0, 118.0, -34.0))
            .is_empty());
    }

    #[test]
    fn test_coverage_matches_footprint_extent_intersection() {
        let g = grid();
        let ext = Extent::new(114.7, -35.3, 117.4, -33.6);
        let cover = g.coverage(&ext);
        for fp in &cover {
            assert!(
                g.footprint_extent(*fp).intersects(&ext),
                "footprint {fp} does not intersect the scene"
            );
        }
        // Neighbours just outside the covered block must not intersect.
        let min_fp = cover.first().unwrap();
        let outside = TileFootprint::new(min_fp.x_index - 1, min_fp.y_index);
        assert!(!cover.contains(&outside));
        assert!(!g.footprint_extent(outside).intersects(&ext));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_coverage_tiles_all_intersect(
                min_x in -179.0..178.0_f64,
                min_y in -89.0..88.0_f64,
                width in 0.01..2.0_f64,
                height in 0.01..2.0_f64,
            ) {
                let g = TileGridSpec::wgs84_one_degree();
                let ext = Extent::new(min_x, min_y, min_x + width, min_y + height);
                let cover = g.coverage(&ext);
                prop_assert!(!cover.is_empty());
                for fp in cover {
                    prop_assert!(
                        g.footprint_extent(fp).intersects(&ext),
                        "footprint {} outside scene extent", fp
                    );
                }
            }

            #[test]
            fn test_coverage_is_row_major_sorted(
                min_x in -179.0..178.0_f64,
                min_y in -89.0..88.0_f64,
                width in 0.01..2.0_f64,
                height in 0.01..2.0_f64,
            ) {
                let g = TileGridSpec::wgs84_one_degree();
                let ext = Extent::new(min_x, min_y, min_x + width, min_y + height);
                let cover = g.coverage(&ext);
                let mut sorted = cover.clone();
                sorted.sort();
                prop_assert_eq!(cover, sorted);
            }

            #[test]
            fn test_coverage_contains_interior_points(
                x in -179.0..179.0_f64,
                y in -89.0..89.0_f64,
            ) {
                // Any point strictly inside the extent lies in a covered cell.
                let g = TileGridSpec::wgs84_one_degree();
                let ext = Extent::new(x - 0.25, y - 0.25, x + 0.25, y + 0.25);
                let cover = g.coverage(&ext);
                prop_assert!(cover.contains(&g.footprint_at(x, y)));
            }
        }
    }
}
