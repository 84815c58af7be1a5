//! The tile transaction manager.
//!
//! One [`SceneTransaction`] covers one scene end-to-end: footprint coverage,
//! reprojection of every footprint, mosaic resolution against tiles other
//! scenes already committed, and an all-or-nothing commit. Temporary
//! payload files live in a per-transaction directory that is removed on
//! every exit path, so no orphaned state survives a rollback or an abort.
//!
//! The state machine is strict:
//!
//! ```text
//! Started -> FootprintsComputed -> TilesReprojected -> MosaicsResolved
//!         -> Committed | RolledBack
//! ```
//!
//! `process()` drives the first three edges, `commit()`/`rollback()` the
//! last; calling an operation out of order is an error, not a panic.

mod locks;

pub use locks::FootprintLocks;

use crate::config::IngestConfig;
use crate::grid::{TileFootprint, TileGridSpec, TileTypeId};
use crate::mosaic::{self, MosaicError, MosaicSource, PrecedenceRule};
use crate::raster::{BandId, SceneSource};
use crate::reproject::{reproject, ReprojectError};
use crate::store::{MetadataStore, StoreError, TileTypeRegistry};
use crate::tile::{
    file_digest, mosaic_file_name, read_payload, NewTileRecord, RecordId, TileContents,
    TileIoError, TilePayload, TileRecord,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle stage of a scene transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Started,
    FootprintsComputed,
    TilesReprojected,
    MosaicsResolved,
    Committed,
    RolledBack,
}

/// Errors surfaced by the transaction manager.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// An operation was called out of state-machine order.
    #[error("transaction is in state {actual:?}, operation requires {expected:?}")]
    InvalidState {
        expected: TransactionState,
        actual: TransactionState,
    },

    /// The tile type is not in the registry.
    #[error("unknown tile type {0}")]
    UnknownTileType(TileTypeId),

    /// Fatal reprojection failure; the scene rolled back.
    #[error(transparent)]
    Reproject(#[from] ReprojectError),

    /// Mosaic merge failure; the scene rolled back.
    #[error(transparent)]
    Mosaic(#[from] MosaicError),

    /// Store failure, including an unresolved persistence conflict.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tile payload read/write failure.
    #[error(transparent)]
    TileIo(#[from] TileIoError),

    /// A payload file changed between write and promote.
    #[error("tile payload digest mismatch for {path}")]
    DigestMismatch { path: PathBuf },

    /// Commit was partially applied and could not be fully undone. Always
    /// surfaced, never swallowed; the paths listed were left behind.
    #[error("commit integrity failure, orphaned files: {0:?}")]
    Integrity(Vec<PathBuf>),

    /// Worker pool construction failed.
    #[error("worker pool: {0}")]
    WorkerPool(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters describing what `process()` did with a scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Footprints the scene extent covers.
    pub footprints: usize,
    /// Tiles staged for commit (including mosaics).
    pub staged: usize,
    /// Tiles pruned for carrying no data (or no geometric overlap).
    pub pruned_no_data: usize,
    /// Footprints skipped because the dataset was already ingested there.
    pub skipped_duplicates: usize,
    /// Staged tiles that are mosaics with a previously committed tile.
    pub mosaics: usize,
}

/// One footprint's staged artefacts awaiting commit.
///
/// `record_tile` is what the store will point at (the mosaic when one was
/// built); `companion` is the scene's own contribution when it only enters
/// the store indirectly as mosaic provenance - its payload is still
/// promoted so provenance paths resolve.
struct PreparedTile {
    record_tile: TileContents,
    companion: Option<TileContents>,
    dataset_id: String,
    acquired_at: DateTime<Utc>,
    rule: PrecedenceRule,
    expected_prior: Option<RecordId>,
}

/// Constructs scene transactions against one tile store.
///
/// Owns the pieces every transaction shares: configuration, the metadata
/// store, the tile type registry, the footprint lock registry, and the
/// rayon pool reprojection fans out on. All state is passed in explicitly
/// at construction; nothing global.
pub struct IngestEngine {
    config: IngestConfig,
    store: Arc<dyn MetadataStore>,
    registry: TileTypeRegistry,
    locks: Arc<FootprintLocks>,
    pool: rayon::ThreadPool,
}

impl IngestEngine {
    /// Creates an engine.
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn MetadataStore>,
        registry: TileTypeRegistry,
    ) -> Result<Self, TransactionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
            .map_err(|e| TransactionError::WorkerPool(e.to_string()))?;
        Ok(Self {
            config,
            store,
            registry,
            locks: Arc::new(FootprintLocks::new()),
            pool,
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Opens a transaction for one scene of the given tile type.
    ///
    /// Creates the per-transaction temporary directory and the store
    /// transaction; nothing the transaction does is externally visible
    /// before `commit()`.
    pub fn begin(&self, tile_type: TileTypeId) -> Result<SceneTransaction<'_>, TransactionError> {
        let grid = self
            .registry
            .get(tile_type)
            .ok_or(TransactionError::UnknownTileType(tile_type))?
            .clone();

        let temp_root = self.config.temp_root();
        fs::create_dir_all(&temp_root)?;
        let temp_dir = tempfile::Builder::new()
            .prefix("scene-")
            .tempdir_in(&temp_root)?;
        let store_tx = self.store.begin()?;

        debug!(%tile_type, temp = %temp_dir.path().display(), "scene transaction opened");
        Ok(SceneTransaction {
            engine: self,
            tile_type,
            grid,
            temp_dir,
            store_tx: Some(store_tx),
            state: TransactionState::Started,
            prepared: Vec::new(),
            summary: ProcessSummary::default(),
        })
    }

    /// Final directory of a footprint's payload files.
    fn footprint_dir(&self, tile_type: TileTypeId, footprint: TileFootprint) -> PathBuf {
        self.config
            .tile_root
            .join(tile_type.to_string())
            .join(format!("{:03}_{:04}", footprint.x_index, footprint.y_index))
    }
}

/// One scene's ingestion transaction.
///
/// Obtained from [`IngestEngine::begin`]; drive it with `process()` then
/// `commit()`, or `rollback()` to abandon. Dropping the transaction without
/// committing removes every temporary file it created.
pub struct SceneTransaction<'a> {
    engine: &'a IngestEngine,
    tile_type: TileTypeId,
    grid: TileGridSpec,
    temp_dir: TempDir,
    store_tx: Option<crate::store::StoreTx>,
    state: TransactionState,
    prepared: Vec<PreparedTile>,
    summary: ProcessSummary,
}

impl<'a> SceneTransaction<'a> {
    /// Current lifecycle stage.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn expect_state(&self, expected: TransactionState) -> Result<(), TransactionError> {
        if self.state != expected {
            return Err(TransactionError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Runs coverage, reprojection, and mosaic resolution for `scene`.
    ///
    /// Independent footprints are reprojected concurrently on the engine's
    /// worker pool; they share only read access to the band stack. Tiles
    /// without data (or without geometric overlap) are pruned silently;
    /// footprints this dataset already committed to are skipped, which
    /// makes re-running an ingest idempotent.
    ///
    /// # Errors
    ///
    /// Any fatal error (resampling failure, store failure, I/O) rolls the
    /// transaction back before returning.
    pub fn process(&mut self, scene: &dyn SceneSource) -> Result<ProcessSummary, TransactionError> {
        self.expect_state(TransactionState::Started)?;
        let dataset_id = scene.acquisition().dataset_id.clone();

        let coverage = self.grid.coverage(&scene.extent());
        self.state = TransactionState::FootprintsComputed;
        self.summary.footprints = coverage.len();
        info!(
            dataset = %dataset_id,
            footprints = coverage.len(),
            "computed footprint coverage"
        );

        let staged = self
            .reproject_all(scene, &coverage)
            .and_then(|tiles| {
                self.state = TransactionState::TilesReprojected;
                self.resolve_all(tiles, scene)
            });
        if let Err(e) = staged {
            self.abort();
            return Err(e);
        }

        self.state = TransactionState::MosaicsResolved;
        info!(
            dataset = %dataset_id,
            staged = self.summary.staged,
            pruned = self.summary.pruned_no_data,
            skipped = self.summary.skipped_duplicates,
            mosaics = self.summary.mosaics,
            "scene processed"
        );
        Ok(self.summary)
    }

    /// Reprojects every covered footprint, pruning no-data results.
    fn reproject_all(
        &mut self,
        scene: &dyn SceneSource,
        coverage: &[TileFootprint],
    ) -> Result<Vec<TileContents>, TransactionError> {
        let grid = &self.grid;
        let tile_type = self.tile_type;
        let temp_path = self.temp_dir.path();

        let results: Vec<Result<Option<TileContents>, ReprojectError>> =
            self.engine.pool.install(|| {
                coverage
                    .par_iter()
                    .map(|&footprint| {
                        match reproject(scene, tile_type, footprint, grid, temp_path) {
                            Ok(tile) => Ok(Some(tile)),
                            // No overlap means no data for this footprint.
                            Err(ReprojectError::GeometryOverlap(fp)) => {
                                debug!(footprint = %fp, "no geometric overlap, pruning");
                                Ok(None)
                            }
                            Err(e) => Err(e),
                        }
                    })
                    .collect()
            });

        let mut tiles = Vec::new();
        for result in results {
            match result? {
                Some(tile) if tile.has_data() => tiles.push(tile),
                Some(tile) => {
                    self.summary.pruned_no_data += 1;
                    tile.remove()?;
                }
                None => self.summary.pruned_no_data += 1,
            }
        }
        Ok(tiles)
    }

    /// Resolves each staged tile against the store: dedup, then mosaic if
    /// the footprint already holds another scene's tile.
    fn resolve_all(
        &mut self,
        tiles: Vec<TileContents>,
        scene: &dyn SceneSource,
    ) -> Result<(), TransactionError> {
        let meta = scene.acquisition();
        let rule = precedence_rule(scene.quality_band());
        for tile in tiles {
            let footprint = tile.footprint();
            if self
                .engine
                .store
                .has_dataset_tile(self.tile_type, footprint, &meta.dataset_id)?
            {
                info!(
                    footprint = %footprint,
                    dataset = %meta.dataset_id,
                    "dataset already committed for footprint, skipping"
                );
                self.summary.skipped_duplicates += 1;
                tile.remove()?;
                continue;
            }

            let handle = self.engine.locks.handle(self.tile_type, footprint);
            let _guard = handle.lock();
            let existing = self.engine.store.current_tile(self.tile_type, footprint)?;
            let prepared = self.resolve_one(
                tile,
                existing,
                &meta.dataset_id,
                meta.acquired_at,
                rule.clone(),
            )?;
            if prepared.companion.is_some() {
                self.summary.mosaics += 1;
            }
            self.summary.staged += 1;
            self.prepared.push(prepared);
        }
        Ok(())
    }

    /// Builds the staged artefacts for one footprint, merging with the
    /// footprint's current record when one exists. The caller holds the
    /// footprint's lock.
    fn resolve_one(
        &self,
        tile: TileContents,
        existing: Option<TileRecord>,
        dataset_id: &str,
        acquired_at: DateTime<Utc>,
        rule: PrecedenceRule,
    ) -> Result<PreparedTile, TransactionError> {
        let Some(record) = existing else {
            return Ok(PreparedTile {
                record_tile: tile,
                companion: None,
                dataset_id: dataset_id.to_string(),
                acquired_at,
                rule,
                expected_prior: None,
            });
        };

        let footprint = tile.footprint();
        let existing_payload = read_payload(&record.path)?;
        let merged = mosaic::merge(
            MosaicSource {
                payload: &existing_payload,
                acquired_at: record.acquired_at,
                dataset_id: &record.dataset_id,
            },
            MosaicSource {
                payload: tile.payload(),
                acquired_at,
                dataset_id,
            },
            &rule,
        )?;

        let scene_tile_final = self
            .engine
            .footprint_dir(self.tile_type, footprint)
            .join(tile.file_name());
        let sources = vec![record.path.clone(), scene_tile_final];
        let has_data = payload_has_data(&merged, &rule);
        let mosaic_tile = TileContents::write_new(
            merged,
            self.temp_dir.path(),
            mosaic_file_name(dataset_id, footprint),
            has_data,
            sources,
        )?;

        info!(
            footprint = %footprint,
            prior = %record.dataset_id,
            incoming = %dataset_id,
            "mosaic built for footprint"
        );
        Ok(PreparedTile {
            record_tile: mosaic_tile,
            companion: Some(tile),
            dataset_id: dataset_id.to_string(),
            // A mosaic's recency is its newest contribution.
            acquired_at: acquired_at.max(record.acquired_at),
            rule,
            expected_prior: Some(record.id),
        })
    }

    /// Atomically promotes every staged tile to a committed record.
    ///
    /// All touched footprints are locked in order for the duration.
    /// Payload digests are re-verified, files renamed into the tile root,
    /// and the record drafts handed to the store in one batch. A stale
    /// footprint (concurrent commit since mosaic resolution) is re-read
    /// and re-merged once; a second conflict is fatal. On any persistence
    /// failure the moved files are withdrawn and the scene leaves nothing
    /// behind.
    pub fn commit(mut self) -> Result<Vec<TileRecord>, TransactionError> {
        if let Err(e) = self.expect_state(TransactionState::MosaicsResolved) {
            // The transaction is consumed either way; release its store
            // transaction before reporting the misuse.
            self.abort();
            return Err(e);
        }

        // Lock every touched footprint, ordered to stay deadlock-free.
        let mut footprints: Vec<TileFootprint> = self
            .prepared
            .iter()
            .map(|p| p.record_tile.footprint())
            .collect();
        footprints.sort();
        footprints.dedup();
        let handles: Vec<_> = footprints
            .iter()
            .map(|&fp| self.engine.locks.handle(self.tile_type, fp))
            .collect();
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        // Re-check for concurrent commits now that the locks are held;
        // retry each stale footprint once by re-merging against current
        // state, then give up.
        if let Err(e) = self.revalidate_priors() {
            self.abort();
            return Err(e);
        }

        match self.promote_and_record() {
            Ok(records) => {
                self.state = TransactionState::Committed;
                info!(records = records.len(), "scene transaction committed");
                Ok(records)
            }
            Err(e) => {
                if matches!(e, TransactionError::Integrity(_)) {
                    // Cleanup itself failed; release the store transaction
                    // but leave the orphan list for the caller.
                    if let Some(tx) = self.store_tx.take() {
                        if let Err(rollback_err) = self.engine.store.rollback(tx) {
                            warn!(error = %rollback_err, "store rollback failed");
                        }
                    }
                    self.state = TransactionState::RolledBack;
                } else {
                    self.abort();
                }
                Err(e)
            }
        }
    }

    /// Re-reads each staged footprint's current record and rebuilds the
    /// mosaic once where it changed since resolution.
    fn revalidate_priors(&mut self) -> Result<(), TransactionError> {
        let mut revalidated = Vec::with_capacity(self.prepared.len());
        for prepared in std::mem::take(&mut self.prepared) {
            let footprint = prepared.record_tile.footprint();
            let current = self.engine.store.current_tile(self.tile_type, footprint)?;
            let current_id = current.as_ref().map(|r| r.id);
            if current_id == prepared.expected_prior {
                revalidated.push(prepared);
                continue;
            }

            warn!(
                footprint = %footprint,
                "footprint changed since mosaic resolution, re-merging once"
            );
            let PreparedTile {
                record_tile,
                companion,
                dataset_id,
                acquired_at,
                rule,
                ..
            } = prepared;
            // The scene's own contribution survives in the companion when
            // the stale artefact was a mosaic.
            let scene_tile = match companion {
                Some(companion) => {
                    record_tile.remove()?;
                    companion
                }
                None => record_tile,
            };
            let redone = self.resolve_one(scene_tile, current, &dataset_id, acquired_at, rule)?;

            // A second mismatch under the held lock cannot be resolved.
            let now = self
                .engine
                .store
                .current_tile(self.tile_type, footprint)?
                .map(|r| r.id);
            if now != redone.expected_prior {
                return Err(TransactionError::Store(StoreError::PersistenceConflict {
                    footprint,
                }));
            }
            revalidated.push(redone);
        }
        self.prepared = revalidated;
        Ok(())
    }

    /// Moves payload files to their final paths and records them in the
    /// store; withdraws the moves if anything fails.
    fn promote_and_record(&mut self) -> Result<Vec<TileRecord>, TransactionError> {
        let mut moved: Vec<PathBuf> = Vec::new();
        let mut drafts = Vec::with_capacity(self.prepared.len());
        let mut failure: Option<TransactionError> = None;

        'stage: for prepared in &self.prepared {
            for tile in std::iter::once(&prepared.record_tile).chain(prepared.companion.iter()) {
                let final_path = self
                    .engine
                    .footprint_dir(self.tile_type, tile.footprint())
                    .join(tile.file_name());
                match promote_file(tile, &final_path) {
                    Ok(()) => moved.push(final_path),
                    Err(e) => {
                        failure = Some(e);
                        break 'stage;
                    }
                }
            }

            let record_tile = &prepared.record_tile;
            drafts.push(NewTileRecord {
                tile_type: self.tile_type,
                footprint: record_tile.footprint(),
                dataset_id: prepared.dataset_id.clone(),
                acquired_at: prepared.acquired_at,
                path: self
                    .engine
                    .footprint_dir(self.tile_type, record_tile.footprint())
                    .join(record_tile.file_name()),
                extent: record_tile.extent(),
                digest: record_tile.digest().to_string(),
                source_paths: record_tile.source_paths().to_vec(),
                expected_prior: prepared.expected_prior,
            });
        }

        let result = match failure {
            Some(e) => Err(e),
            None => match self.store_tx.take() {
                Some(tx) => self
                    .engine
                    .store
                    .commit(tx, drafts)
                    .map_err(TransactionError::from),
                None => Err(TransactionError::InvalidState {
                    expected: TransactionState::MosaicsResolved,
                    actual: self.state,
                }),
            },
        };

        result.map_err(|e| {
            // Withdraw everything this scene placed in the tile root; a
            // record must never outlive or predate its payload file.
            let mut orphans = Vec::new();
            for path in moved {
                if let Err(remove_err) = fs::remove_file(&path) {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        orphans.push(path);
                    }
                }
            }
            if orphans.is_empty() {
                e
            } else {
                TransactionError::Integrity(orphans)
            }
        })
    }

    /// Abandons the transaction, deleting every temporary file it created.
    ///
    /// Previously committed records from other scenes are untouched.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(TransactionError::InvalidState {
                    expected: TransactionState::MosaicsResolved,
                    actual: self.state,
                })
            }
            _ => {
                self.abort();
                Ok(())
            }
        }
    }

    /// Internal rollback: releases the store transaction and marks the
    /// state; temporary files die with the temp directory.
    fn abort(&mut self) {
        if let Some(tx) = self.store_tx.take() {
            if let Err(e) = self.engine.store.rollback(tx) {
                warn!(error = %e, "store rollback failed");
            }
        }
        self.prepared.clear();
        self.state = TransactionState::RolledBack;
        debug!("scene transaction rolled back");
    }
}

/// Verifies a staged payload and moves it to its final path.
fn promote_file(tile: &TileContents, final_path: &Path) -> Result<(), TransactionError> {
    let actual = file_digest(tile.temp_path())?;
    if actual != tile.digest() {
        return Err(TransactionError::DigestMismatch {
            path: tile.temp_path().to_path_buf(),
        });
    }

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Rename within a filesystem; fall back to copy for tile roots on a
    // different mount than the temp directory.
    if fs::rename(tile.temp_path(), final_path).is_err() {
        fs::copy(tile.temp_path(), final_path)?;
        fs::remove_file(tile.temp_path())?;
    }
    Ok(())
}

/// Precedence rule for a scene: quality-bit ranking when the scene has a
/// quality product, recency otherwise.
fn precedence_rule(quality_band: Option<&BandId>) -> PrecedenceRule {
    match quality_band {
        Some(band) => PrecedenceRule::contiguity(band.clone()),
        None => PrecedenceRule::Latest,
    }
}

/// Validity of a merged payload under the precedence rule's band choice.
fn payload_has_data(payload: &TilePayload, rule: &PrecedenceRule) -> bool {
    match rule {
        PrecedenceRule::QualityBit { band, .. } => {
            payload.band(band).map(|b| b.has_data()).unwrap_or(false)
        }
        PrecedenceRule::Latest => payload.bands.iter().any(|(_, b)| b.has_data()),
    }
}
