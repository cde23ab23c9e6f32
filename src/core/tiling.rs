//! Row-tiled execution for rasters too large to process in one pass.
//!
//! Each tile is extended by a halo of rows so windowed stages see the same
//! neighbourhood they would see on the full raster; the halo is cropped before
//! the tiles are stitched back together.

use crate::types::{Raster, SarError, SarResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between tiles
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A horizontal band of the source raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowTile {
    /// First row written by this tile
    pub row_start: usize,
    /// One past the last row written by this tile
    pub row_end: usize,
    /// First row read, halo included
    pub read_start: usize,
    /// One past the last row read, halo included
    pub read_end: usize,
}

impl RowTile {
    /// Offset of the written rows inside the read band
    pub fn crop_offset(&self) -> usize {
        self.row_start - self.read_start
    }

    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }
}

/// Partition `total_rows` into bands of `tile_rows`, each read with `halo` extra rows
/// on both sides (clipped to the raster)
pub fn row_tiles(total_rows: usize, tile_rows: usize, halo: usize) -> Vec<RowTile> {
    let step = tile_rows.max(1);
    (0..total_rows)
        .step_by(step)
        .map(|row_start| {
            let row_end = (row_start + step).min(total_rows);
            RowTile {
                row_start,
                row_end,
                read_start: row_start.saturating_sub(halo),
                read_end: (row_end + halo).min(total_rows),
            }
        })
        .collect()
}

/// Runs a shape-preserving stage tile by tile
#[derive(Debug, Clone)]
pub struct TiledExecutor {
    tile_rows: usize,
    token: CancellationToken,
}

impl TiledExecutor {
    pub fn new(tile_rows: usize) -> SarResult<Self> {
        if tile_rows == 0 {
            return Err(SarError::invalid("tile_rows", "tile height must be >= 1"));
        }
        Ok(Self {
            tile_rows,
            token: CancellationToken::new(),
        })
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn tile_rows(&self) -> usize {
        self.tile_rows
    }

    /// Apply `stage` to every tile and stitch the cropped outputs.
    ///
    /// `halo` is the number of context rows the stage needs on each side
    /// (`window / 2` for windowed filters, 0 for pointwise stages). If the token
    /// is cancelled, remaining tiles are skipped and all partial output is dropped.
    pub fn process<F>(&self, raster: &Raster, halo: usize, stage: F) -> SarResult<Raster>
    where
        F: Fn(&Raster) -> SarResult<Raster> + Sync + Send,
    {
        let tiles = row_tiles(raster.rows(), self.tile_rows, halo);
        log::debug!(
            "Processing {}x{} raster in {} tiles of {} rows (halo {})",
            raster.rows(),
            raster.cols(),
            tiles.len(),
            self.tile_rows,
            halo
        );

        let run_tile = |tile: &RowTile| -> SarResult<Raster> {
            if self.token.is_cancelled() {
                return Err(SarError::Cancelled);
            }

            let band = raster.slice_rows(tile.read_start, tile.read_end);
            let out = stage(&band)?;
            if out.dim() != band.dim() {
                return Err(SarError::ShapeMismatch {
                    expected: band.dim(),
                    actual: out.dim(),
                });
            }

            let start = tile.crop_offset();
            Ok(out.slice_rows(start, start + tile.rows()))
        };

        #[cfg(feature = "parallel")]
        let parts: SarResult<Vec<Raster>> = {
            use rayon::prelude::*;
            tiles.par_iter().map(run_tile).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let parts: SarResult<Vec<Raster>> = tiles.iter().map(run_tile).collect();

        let parts = parts?;
        if self.token.is_cancelled() {
            return Err(SarError::Cancelled);
        }

        Raster::stitch_rows(&parts, raster.metadata().clone())
    }
}
