//! Tile reprojection: resampling a scene's band stack onto footprint grids.
//!
//! Each footprint of a tile type implies an exact pixel grid - origin offset
//! at `footprint index x tile span`, fixed dimensions from the grid spec.
//! The reprojector inverse-maps every output pixel centre into the scene's
//! native CRS, samples the band stack there, and fills everything outside
//! the scene's coverage with the band's nodata value.
//!
//! The kernel is band-class dependent: continuous bands are interpolated
//! bilinearly, categorical/quality bands take the nearest source pixel so
//! no invalid category codes are invented. The whole operation is a pure
//! function of its inputs - re-running it produces pixel-identical output.

mod transform;

pub use transform::CrsTransformer;

use crate::grid::{Extent, TileFootprint, TileGridSpec, TileTypeId};
use crate::raster::{BandId, BandKind, RasterBand, SceneSource};
use crate::tile::{tile_file_name, TileContents, TileIoError, TilePayload};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while reprojecting a scene onto a footprint.
#[derive(Debug, Error)]
pub enum ReprojectError {
    /// Source scene and target tile share no geometry. Not fatal: the
    /// transaction manager treats the footprint as carrying no data.
    #[error("no geometric overlap between source scene and tile {0}")]
    GeometryOverlap(TileFootprint),

    /// Projection setup or evaluation failed.
    #[error("projection error: {0}")]
    Projection(String),

    /// The source raster cannot be resampled. Fatal to the footprint; the
    /// scene's transaction rolls back.
    #[error("resampling failed: {0}")]
    Resampling(String),

    /// Writing the tile payload failed.
    #[error("tile payload write failed: {0}")]
    Payload(#[from] TileIoError),
}

/// Resamples every band of `scene` onto the pixel grid of `footprint`.
///
/// Writes the resulting raster to a payload file under `temp_dir` (scoped
/// to the caller's transaction) and returns the [`TileContents`] that owns
/// it. Validity is computed over the scene's quality band when one is
/// declared, otherwise over all bands; a tile of pure nodata reports
/// `has_data() == false` and is expected to be pruned by the caller.
///
/// # Errors
///
/// [`ReprojectError::GeometryOverlap`] when no geometric overlap with the
/// target grid can be established; [`ReprojectError::Resampling`] for an
/// unusable source raster; [`ReprojectError::Projection`] when the CRS pair
/// cannot be resolved.
pub fn reproject(
    scene: &dyn SceneSource,
    tile_type: TileTypeId,
    footprint: TileFootprint,
    grid: &TileGridSpec,
    temp_dir: &Path,
) -> Result<TileContents, ReprojectError> {
    let stack = scene.bands();
    if stack.width() == 0 || stack.height() == 0 {
        return Err(ReprojectError::Resampling(
            "source band stack has an empty grid".to_string(),
        ));
    }

    let tile_extent = grid.footprint_extent(footprint);
    let transformer = CrsTransformer::new(grid.crs_epsg, stack.crs_epsg())?;

    if !source_overlap(&tile_extent, &transformer)?.intersects(&stack.extent()) {
        return Err(ReprojectError::GeometryOverlap(footprint));
    }

    let width = grid.tile_width as usize;
    let height = grid.tile_height as usize;
    let src_extent = stack.extent();
    let inv_psx = 1.0 / stack.pixel_size_x();
    let inv_psy = 1.0 / stack.pixel_size_y();

    // Inverse-map every output pixel centre once; the mapping is shared by
    // all bands. `None` marks pixels outside the projection's domain,
    // which are simply outside the scene's coverage and stay nodata.
    let mut source_coords: Vec<Option<(f64, f64)>> = Vec::with_capacity(width * height);
    for row in 0..height {
        let ty = tile_extent.max_y - (row as f64 + 0.5) * grid.pixel_size;
        for col in 0..width {
            let tx = tile_extent.min_x + (col as f64 + 0.5) * grid.pixel_size;
            let coords = transformer.transform(tx, ty).ok().map(|(sx, sy)| {
                // Fractional source pixel, relative to pixel centres.
                (
                    (sx - src_extent.min_x) * inv_psx - 0.5,
                    (src_extent.max_y - sy) * inv_psy - 0.5,
                )
            });
            source_coords.push(coords);
        }
    }

    let mut out_bands: Vec<(BandId, RasterBand)> = Vec::with_capacity(stack.bands().len());
    for (id, src) in stack.bands() {
        let nodata = src.nodata();
        let mut pixels = vec![nodata; width * height];

        for (idx, coords) in source_coords.iter().enumerate() {
            let Some((fc, fr)) = *coords else {
                continue;
            };
            let value = match src.kind() {
                BandKind::Categorical => sample_nearest(stack, src, fc, fr),
                BandKind::Continuous => sample_bilinear(stack, src, fc, fr),
            };
            if let Some(v) = value {
                pixels[idx] = v;
            }
        }

        out_bands.push((id.clone(), RasterBand::new(src.kind(), nodata, pixels)));
    }

    let has_data = match scene.quality_band() {
        Some(q) => out_bands
            .iter()
            .find(|(id, _)| id == q)
            .map(|(_, b)| b.has_data())
            .unwrap_or(false),
        None => out_bands.iter().any(|(_, b)| b.has_data()),
    };

    debug!(
        footprint = %footprint,
        dataset = %scene.acquisition().dataset_id,
        has_data,
        "reprojected scene onto tile grid"
    );

    let payload = TilePayload {
        tile_type,
        footprint,
        extent: tile_extent,
        width: grid.tile_width,
        height: grid.tile_height,
        bands: out_bands,
    };
    let file_name = tile_file_name(&scene.acquisition().dataset_id, footprint);
    Ok(TileContents::write_new(
        payload,
        temp_dir,
        file_name,
        has_data,
        Vec::new(),
    )?)
}

/// Maps the tile extent into the scene CRS by sampling its boundary, giving
/// a conservative bounding box for the overlap pre-check.
fn source_overlap(
    tile_extent: &Extent,
    transformer: &CrsTransformer,
) -> Result<Extent, ReprojectError> {
    if transformer.is_identity() {
        return Ok(*tile_extent);
    }

    let xs = [
        tile_extent.min_x,
        (tile_extent.min_x + tile_extent.max_x) / 2.0,
        tile_extent.max_x,
    ];
    let ys = [
        tile_extent.min_y,
        (tile_extent.min_y + tile_extent.max_y) / 2.0,
        tile_extent.max_y,
    ];

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let mut mapped = 0usize;
    for &x in &xs {
        for &y in &ys {
            if let Ok((sx, sy)) = transformer.transform(x, y) {
                min_x = min_x.min(sx);
                min_y = min_y.min(sy);
                max_x = max_x.max(sx);
                max_y = max_y.max(sy);
                mapped += 1;
            }
        }
    }

    if mapped == 0 {
        // The whole tile lies outside the source projection's domain.
        return Ok(Extent::new(0.0, 0.0, 0.0, 0.0));
    }
    Ok(Extent::new(min_x, min_y, max_x, max_y))
}

/// Nearest-neighbour sample at a fractional source pixel.
fn sample_nearest(
    stack: &crate::raster::BandStack,
    band: &RasterBand,
    fc: f64,
    fr: f64,
) -> Option<f32> {
    stack.sample(band, fc.round() as isize, fr.round() as isize)
}

/// Bilinear sample at a fractional source pixel.
///
/// Falls back to nearest-neighbour at the grid edge or next to nodata
/// pixels, so interpolation never blends observations with fill values.
fn sample_bilinear(
    stack: &crate::raster::BandStack,
    band: &RasterBand,
    fc: f64,
    fr: f64,
) -> Option<f32> {
    let c0 = fc.floor();
    let r0 = fr.floor();
    let corners = [
        stack.sample(band, c0 as isize, r0 as isize),
        stack.sample(band, c0 as isize + 1, r0 as isize),
        stack.sample(band, c0 as isize, r0 as isize + 1),
        stack.sample(band, c0 as isize + 1, r0 as isize + 1),
    ];

    let all_data = corners
        .iter()
        .all(|v| matches!(v, Some(p) if *p != band.nodata() && !p.is_nan()));
    if !all_data {
        return sample_nearest(stack, band, fc, fr);
    }

    let wx = fc - c0;
    let wy = fr - r0;
    let (v00, v10, v01, v11) = (
        corners[0].unwrap_or_default() as f64,
        corners[1].unwrap_or_default() as f64,
        corners[2].unwrap_or_default() as f64,
        corners[3].unwrap_or_default() as f64,
    );
    let top = v00 * (1.0 - wx) + v10 * wx;
    let bottom = v01 * (1.0 - wx) + v11 * wx;
    Some((top * (1.0 - wy) + bottom * wy) as f32)
}
