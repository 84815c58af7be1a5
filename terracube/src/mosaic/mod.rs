//! Mosaicking overlapping tiles under explicit pixel precedence.
//!
//! When adjacent or successive acquisitions both cover a footprint, their
//! tiles are merged per pixel. A single selection mask is derived from the
//! designated quality band and applied to *every* band, keeping the mosaic
//! spatially consistent pixel-for-pixel; bands never pick winners
//! independently.
//!
//! Precedence is a total order per pixel - quality rank, then acquisition
//! recency, then dataset id - so the merge is deterministic and
//! commutative: the same contributing tiles produce a bit-identical mosaic
//! regardless of ingestion order.

use crate::raster::{BandId, RasterBand};
use crate::tile::TilePayload;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

/// Errors raised while merging tiles.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// The tiles do not carry the same band set in the same order.
    #[error("contributing tiles carry different band sets")]
    BandMismatch,

    /// The tiles are not on the same pixel grid.
    #[error("contributing tiles have different dimensions or footprints")]
    GridMismatch,

    /// The precedence rule names a quality band the tiles do not have.
    #[error("quality band {0} not present in contributing tiles")]
    MissingQualityBand(BandId),
}

/// Pixel precedence rule for a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecedenceRule {
    /// Rank pixels by a quality band's masked bits (e.g. the contiguity
    /// flag of a pixel-quality product); higher masked value wins, nodata
    /// ranks below everything.
    QualityBit {
        /// The quality band driving the selection mask.
        band: BandId,
        /// Bitmask applied to the quality value before comparison.
        mask: u16,
    },

    /// No quality product: any observation outranks nodata. Presence is
    /// judged across all bands of the tile.
    Latest,
}

impl PrecedenceRule {
    /// Conventional rule for pixel-quality stacks: rank by the contiguity
    /// bit of the named quality band.
    pub fn contiguity(band: BandId) -> Self {
        // Bit 8 marks band-to-band contiguity in the quality product.
        Self::QualityBit { band, mask: 0x0100 }
    }
}

/// One contributing tile plus the acquisition facts precedence needs.
#[derive(Debug, Clone, Copy)]
pub struct MosaicSource<'a> {
    /// Decoded tile payload.
    pub payload: &'a TilePayload,
    /// Acquisition time of the contributing dataset.
    pub acquired_at: DateTime<Utc>,
    /// Dataset id of the contributing dataset; final precedence tie-break.
    pub dataset_id: &'a str,
}

impl<'a> MosaicSource<'a> {
    /// Per-pixel precedence rank under `rule`: `None` means no usable
    /// observation at that pixel.
    fn rank(&self, rule: &PrecedenceRule, idx: usize) -> Result<Option<u16>, MosaicError> {
        match rule {
            PrecedenceRule::QualityBit { band, mask } => {
                let quality = self
                    .payload
                    .band(band)
                    .ok_or_else(|| MosaicError::MissingQualityBand(band.clone()))?;
                if !quality.is_data(idx) {
                    return Ok(None);
                }
                let bits = quality.pixels()[idx] as u16;
                Ok(Some(bits & mask))
            }
            PrecedenceRule::Latest => {
                let observed = self.payload.bands.iter().any(|(_, b)| b.is_data(idx));
                Ok(observed.then_some(1))
            }
        }
    }
}

/// Merges two tiles covering the same footprint into one payload.
///
/// For every pixel the winning source is chosen by `(rank, acquired_at,
/// dataset_id)`; all bands copy that pixel from the winner. Pixels neither
/// source observed are written as the band's nodata value.
///
/// # Errors
///
/// Returns a [`MosaicError`] when the tiles disagree on grid, band set, or
/// the rule's quality band.
pub fn merge(
    existing: MosaicSource<'_>,
    incoming: MosaicSource<'_>,
    rule: &PrecedenceRule,
) -> Result<TilePayload, MosaicError> {
    let a = existing.payload;
    let b = incoming.payload;

    if a.footprint != b.footprint || a.width != b.width || a.height != b.height {
        return Err(MosaicError::GridMismatch);
    }
    if a.bands.len() != b.bands.len()
        || a.bands
            .iter()
            .zip(b.bands.iter())
            .any(|((id_a, band_a), (id_b, band_b))| {
                id_a != id_b
                    || band_a.kind() != band_b.kind()
                    || band_a.nodata() != band_b.nodata()
            })
    {
        return Err(MosaicError::BandMismatch);
    }

    let pixel_count = (a.width * a.height) as usize;

    // One selection pass drives every band. Pixels neither source observed
    // are written as nodata, which keeps the merge symmetric in its inputs.
    #[derive(Clone, Copy, PartialEq)]
    enum Winner {
        Existing,
        Incoming,
        Neither,
    }

    let mut selection = vec![Winner::Neither; pixel_count];
    for (idx, slot) in selection.iter_mut().enumerate() {
        let rank_a = existing.rank(rule, idx)?;
        let rank_b = incoming.rank(rule, idx)?;
        if rank_a.is_none() && rank_b.is_none() {
            continue;
        }
        let key_a = (rank_a, existing.acquired_at, existing.dataset_id);
        let key_b = (rank_b, incoming.acquired_at, incoming.dataset_id);
        *slot = if key_b > key_a {
            Winner::Incoming
        } else {
            Winner::Existing
        };
    }

    let mut bands: Vec<(BandId, RasterBand)> = Vec::with_capacity(a.bands.len());
    for ((id, band_a), (_, band_b)) in a.bands.iter().zip(b.bands.iter()) {
        let mut pixels = vec![band_a.nodata(); pixel_count];
        for (idx, winner) in selection.iter().enumerate() {
            match winner {
                Winner::Existing => pixels[idx] = band_a.pixels()[idx],
                Winner::Incoming => pixels[idx] = band_b.pixels()[idx],
                Winner::Neither => {}
            }
        }
        bands.push((id.clone(), RasterBand::new(band_a.kind(), band_a.nodata(), pixels)));
    }

    debug!(
        footprint = %a.footprint,
        existing = existing.dataset_id,
        incoming = incoming.dataset_id,
        replaced = selection.iter().filter(|&&w| w == Winner::Incoming).count(),
        "merged mosaic tile"
    );

    Ok(TilePayload {
        tile_type: a.tile_type,
        footprint: a.footprint,
        extent: a.extent,
        width: a.width,
        height: a.height,
        bands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Extent, TileFootprint, TileTypeId};
    use crate::raster::BandKind;
    use chrono::TimeZone;

    const CONTIG: f32 = 256.0; // 0x0100
    const NODATA: f32 = 0.0;

    fn payload(quality: Vec<f32>, data: Vec<f32>) -> TilePayload {
        TilePayload {
            tile_type: TileTypeId(1),
            footprint: TileFootprint::new(141, -38),
            extent: Extent::new(141.0, -38.0, 142.0, -37.0),
            width: 2,
            height: 2,
            bands: vec![
                (
                    BandId::new("PQA"),
                    RasterBand::new(BandKind::Categorical, NODATA, quality),
                ),
                (
                    BandId::new("B40"),
                    RasterBand::new(BandKind::Continuous, -999.0, data),
                ),
            ],
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2005, 6, day, 1, 45, 30).unwrap()
    }

    fn rule() -> PrecedenceRule {
        PrecedenceRule::contiguity(BandId::new("PQA"))
    }

    #[test]
    fn test_higher_quality_pixel_wins() {
        // Pixel 0: only existing contiguous; pixel 1: only incoming.
        let older = payload(vec![CONTIG, 1.0, NODATA, NODATA], vec![10.0, 11.0, -999.0, -999.0]);
        let newer = payload(vec![1.0, CONTIG, NODATA, NODATA], vec![20.0, 21.0, -999.0, -999.0]);

        let merged = merge(
            MosaicSource { payload: &older, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &newer, acquired_at: at(2), dataset_id: "b" },
            &rule(),
        )
        .unwrap();

        let quality = merged.band(&BandId::new("PQA")).unwrap().pixels();
        assert_eq!(quality[0], CONTIG);
        assert_eq!(quality[1], CONTIG);
    }

    #[test]
    fn test_selection_mask_applies_to_all_bands() {
        let older = payload(vec![CONTIG, 1.0, NODATA, NODATA], vec![10.0, 11.0, -999.0, -999.0]);
        let newer = payload(vec![1.0, CONTIG, NODATA, NODATA], vec![20.0, 21.0, -999.0, -999.0]);

        let merged = merge(
            MosaicSource { payload: &older, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &newer, acquired_at: at(2), dataset_id: "b" },
            &rule(),
        )
        .unwrap();

        // The data band follows the quality band's winners pixel-for-pixel.
        let data = merged.band(&BandId::new("B40")).unwrap().pixels();
        assert_eq!(data[0], 10.0);
        assert_eq!(data[1], 21.0);
    }

    #[test]
    fn test_quality_tie_prefers_recent_acquisition() {
        let older = payload(vec![CONTIG; 4], vec![10.0; 4]);
        let newer = payload(vec![CONTIG; 4], vec![20.0; 4]);

        let merged = merge(
            MosaicSource { payload: &older, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &newer, acquired_at: at(17), dataset_id: "b" },
            &rule(),
        )
        .unwrap();

        assert!(merged
            .band(&BandId::new("B40"))
            .unwrap()
            .pixels()
            .iter()
            .all(|&p| p == 20.0));
    }

    #[test]
    fn test_observation_beats_nodata_regardless_of_recency() {
        // The newer scene has nodata where the older observed.
        let older = payload(vec![CONTIG; 4], vec![10.0; 4]);
        let newer = payload(vec![NODATA; 4], vec![-999.0; 4]);

        let merged = merge(
            MosaicSource { payload: &older, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &newer, acquired_at: at(17), dataset_id: "b" },
            &rule(),
        )
        .unwrap();

        assert!(merged
            .band(&BandId::new("B40"))
            .unwrap()
            .pixels()
            .iter()
            .all(|&p| p == 10.0));
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = payload(vec![CONTIG, 1.0, NODATA, CONTIG], vec![10.0, 11.0, -999.0, 13.0]);
        let b = payload(vec![1.0, CONTIG, CONTIG, CONTIG], vec![20.0, 21.0, 22.0, 23.0]);
        let src_a = |p| MosaicSource { payload: p, acquired_at: at(1), dataset_id: "a" };
        let src_b = |p| MosaicSource { payload: p, acquired_at: at(2), dataset_id: "b" };

        let ab = merge(src_a(&a), src_b(&b), &rule()).unwrap();
        let ba = merge(src_b(&b), src_a(&a), &rule()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let a = payload(vec![CONTIG, 1.0, NODATA, CONTIG], vec![10.0, 11.0, -999.0, 13.0]);
        let b = payload(vec![1.0, CONTIG, CONTIG, CONTIG], vec![20.0, 21.0, 22.0, 23.0]);
        let run = || {
            merge(
                MosaicSource { payload: &a, acquired_at: at(1), dataset_id: "a" },
                MosaicSource { payload: &b, acquired_at: at(2), dataset_id: "b" },
                &rule(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_equal_time_ties_break_on_dataset_id() {
        let a = payload(vec![CONTIG; 4], vec![10.0; 4]);
        let b = payload(vec![CONTIG; 4], vec![20.0; 4]);
        let src_a = |p| MosaicSource { payload: p, acquired_at: at(1), dataset_id: "a" };
        let src_b = |p| MosaicSource { payload: p, acquired_at: at(1), dataset_id: "b" };

        let ab = merge(src_a(&a), src_b(&b), &rule()).unwrap();
        let ba = merge(src_b(&b), src_a(&a), &rule()).unwrap();
        assert_eq!(ab, ba);
        // "b" sorts above "a", so its pixels win the full tie.
        assert!(ab
            .band(&BandId::new("B40"))
            .unwrap()
            .pixels()
            .iter()
            .all(|&p| p == 20.0));
    }

    #[test]
    fn test_latest_rule_without_quality_band() {
        let mut a = payload(vec![CONTIG; 4], vec![10.0, -999.0, 10.0, -999.0]);
        let mut b = payload(vec![CONTIG; 4], vec![-999.0, 20.0, 20.0, -999.0]);
        // Strip the quality band to exercise the fallback.
        a.bands.remove(0);
        b.bands.remove(0);

        let merged = merge(
            MosaicSource { payload: &a, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &b, acquired_at: at(2), dataset_id: "b" },
            &PrecedenceRule::Latest,
        )
        .unwrap();

        let data = merged.band(&BandId::new("B40")).unwrap().pixels();
        assert_eq!(data, &[10.0, 20.0, 20.0, -999.0]);
    }

    #[test]
    fn test_band_set_mismatch_rejected() {
        let a = payload(vec![CONTIG; 4], vec![10.0; 4]);
        let mut b = payload(vec![CONTIG; 4], vec![20.0; 4]);
        b.bands.remove(1);

        let result = merge(
            MosaicSource { payload: &a, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &b, acquired_at: at(2), dataset_id: "b" },
            &rule(),
        );
        assert!(matches!(result, Err(MosaicError::BandMismatch)));
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let a = payload(vec![CONTIG; 4], vec![10.0; 4]);
        let mut b = payload(vec![CONTIG; 4], vec![20.0; 4]);
        b.footprint = TileFootprint::new(140, -38);

        let result = merge(
            MosaicSource { payload: &a, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &b, acquired_at: at(2), dataset_id: "b" },
            &rule(),
        );
        assert!(matches!(result, Err(MosaicError::GridMismatch)));
    }

    #[test]
    fn test_missing_quality_band_rejected() {
        let mut a = payload(vec![CONTIG; 4], vec![10.0; 4]);
        let mut b = payload(vec![CONTIG; 4], vec![20.0; 4]);
        a.bands.remove(0);
        b.bands.remove(0);

        let result = merge(
            MosaicSource { payload: &a, acquired_at: at(1), dataset_id: "a" },
            MosaicSource { payload: &b, acquired_at: at(2), dataset_id: "b" },
            &rule(),
        );
        assert!(matches!(result, Err(MosaicError::MissingQualityBand(_))));
    }
}
