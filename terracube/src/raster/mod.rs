//! Source raster model: band stacks and the scene capability interface.
//!
//! The engine never reads sensor files itself. An external dataset reader
//! assembles a [`BandStack`] - every band of one acquisition resampled onto
//! a common scene grid - and hands it over through the [`SceneSource`]
//! trait. The engine only samples pixels out of it.
//!
//! Bands are classed as continuous (reflectance, indices) or categorical
//! (pixel-quality bitmasks); the class drives the resampling kernel during
//! reprojection so that categorical codes are never interpolated.

use crate::grid::Extent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of one band within a scene, e.g. `"B40"` or `"PQA"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BandId(String);

impl BandId {
    /// Creates a band id from its catalogue name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this band id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Resampling class of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandKind {
    /// Continuous-valued measurements; interpolated during resampling.
    Continuous,
    /// Categorical codes or quality bitmasks; resampled nearest-neighbour
    /// so no invalid category values are invented.
    Categorical,
}

/// Errors raised while assembling raster inputs.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Pixel buffer length does not match the declared dimensions.
    #[error("band {band}: buffer holds {actual} pixels, grid is {width}x{height}")]
    BufferSize {
        band: BandId,
        actual: usize,
        width: usize,
        height: usize,
    },

    /// A referenced band is not present in the stack.
    #[error("band {0} not present in stack")]
    MissingBand(BandId),
}

/// One band's pixel grid.
///
/// Pixels are stored row-major, north-up: index `row * width + col`, row 0
/// at the extent's maximum Y. Values are `f32`; categorical bitmask bands
/// store their integer codes losslessly (16-bit codes are exact in `f32`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterBand {
    kind: BandKind,
    nodata: f32,
    pixels: Vec<f32>,
}

impl RasterBand {
    /// Creates a band from its resampling class, nodata value, and pixels.
    pub fn new(kind: BandKind, nodata: f32, pixels: Vec<f32>) -> Self {
        Self {
            kind,
            nodata,
            pixels,
        }
    }

    /// Creates a band filled entirely with its nodata value.
    pub fn filled_nodata(kind: BandKind, nodata: f32, len: usize) -> Self {
        Self {
            kind,
            nodata,
            pixels: vec![nodata; len],
        }
    }

    /// Resampling class of this band.
    pub fn kind(&self) -> BandKind {
        self.kind
    }

    /// Declared nodata value.
    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    /// Raw pixel buffer, row-major.
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Mutable pixel buffer, row-major.
    pub fn pixels_mut(&mut self) -> &mut [f32] {
        &mut self.pixels
    }

    /// True if the pixel at `idx` carries an observation.
    #[inline]
    pub fn is_data(&self, idx: usize) -> bool {
        self.pixels
            .get(idx)
            .map(|&p| p != self.nodata && !p.is_nan())
            .unwrap_or(false)
    }

    /// True if at least one pixel is not nodata.
    pub fn has_data(&self) -> bool {
        (0..self.pixels.len()).any(|i| self.is_data(i))
    }
}

/// All bands of one acquisition on a common scene grid.
///
/// Ordered mapping from band id to raster band, plus the scene's geographic
/// extent and native CRS. Band order is the catalogue order the reader
/// supplied and is preserved through reprojection and mosaicking.
#[derive(Debug, Clone)]
pub struct BandStack {
    bands: Vec<(BandId, RasterBand)>,
    extent: Extent,
    crs_epsg: u16,
    width: usize,
    height: usize,
}

impl BandStack {
    /// Assembles a stack, validating that every band matches the grid.
    pub fn new(
        extent: Extent,
        crs_epsg: u16,
        width: usize,
        height: usize,
        bands: Vec<(BandId, RasterBand)>,
    ) -> Result<Self, RasterError> {
        for (id, band) in &bands {
            if band.pixels.len() != width * height {
                return Err(RasterError::BufferSize {
                    band: id.clone(),
                    actual: band.pixels.len(),
                    width,
                    height,
                });
            }
        }
        Ok(Self {
            bands,
            extent,
            crs_epsg,
            width,
            height,
        })
    }

    /// Scene extent in the native CRS.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// EPSG code of the native CRS.
    pub fn crs_epsg(&self) -> u16 {
        self.crs_epsg
    }

    /// Scene grid width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Scene grid height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Size of one scene pixel along X, in native CRS units.
    #[inline]
    pub fn pixel_size_x(&self) -> f64 {
        self.extent.width() / self.width as f64
    }

    /// Size of one scene pixel along Y, in native CRS units.
    #[inline]
    pub fn pixel_size_y(&self) -> f64 {
        self.extent.height() / self.height as f64
    }

    /// Bands in catalogue order.
    pub fn bands(&self) -> &[(BandId, RasterBand)] {
        &self.bands
    }

    /// Looks up a band by id.
    pub fn band(&self, id: &BandId) -> Option<&RasterBand> {
        self.bands.iter().find(|(b, _)| b == id).map(|(_, r)| r)
    }

    /// Samples one pixel; `None` outside the grid.
    #[inline]
    pub fn sample(&self, band: &RasterBand, col: isize, row: isize) -> Option<f32> {
        if col < 0 || row < 0 || col as usize >= self.width || row as usize >= self.height {
            return None;
        }
        band.pixels.get(row as usize * self.width + col as usize).copied()
    }
}

/// Scene-level metadata used for record keeping and mosaic precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionMeta {
    /// Stable identifier of the dataset, e.g. `"LS7_ETM_PQA_117_2005-06-12"`.
    /// Doubles as the transaction dedup key per footprint.
    pub dataset_id: String,
    /// Acquisition start time, UTC.
    pub acquired_at: DateTime<Utc>,
    /// Satellite tag, e.g. `"LS7"`.
    pub satellite: String,
    /// Sensor name, e.g. `"ETM"`.
    pub sensor: String,
    /// Processing level, e.g. `"PQA"` or `"NBAR"`.
    pub processing_level: String,
}

/// Capability interface a sensor-specific dataset reader implements.
///
/// The engine reads scenes exclusively through this trait; tests supply an
/// in-memory synthetic implementation.
///
/// `extent()` is the scene extent expressed in the *tile grid's* CRS and
/// feeds footprint coverage; the band stack keeps its own native-CRS
/// extent, which the reprojector maps per pixel.
pub trait SceneSource: Send + Sync {
    /// Scene extent in the tile grid CRS.
    fn extent(&self) -> Extent;

    /// EPSG code of the scene's native CRS.
    fn crs(&self) -> u16;

    /// The stacked source bands.
    fn bands(&self) -> &BandStack;

    /// The band used for validity testing and mosaic precedence, if the
    /// processing level carries one (e.g. the pixel-quality product).
    fn quality_band(&self) -> Option<&BandId>;

    /// Acquisition metadata.
    fn acquisition(&self) -> &AcquisitionMeta;
}
