//! Square neighbourhood windows and the local statistics every speckle filter
//! is built on.
//!
//! Windows near the raster border are truncated to the in-bounds region. Only
//! valid samples contribute to the statistics.

use crate::types::{Raster, SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Odd square window size, at least 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct WindowSpec(usize);

impl WindowSpec {
    pub fn new(size: usize) -> SarResult<Self> {
        if size < 3 {
            return Err(SarError::invalid(
                "window_size",
                format!("window size must be at least 3, got {}", size),
            ));
        }
        if size % 2 == 0 {
            return Err(SarError::invalid(
                "window_size",
                format!("window size must be odd, got {}", size),
            ));
        }
        Ok(Self(size))
    }

    pub fn size(&self) -> usize {
        self.0
    }

    pub fn half(&self) -> usize {
        self.0 / 2
    }

    /// In-bounds (row_start, row_end, col_start, col_end) around a centre pixel
    pub fn bounds(&self, row: usize, col: usize, rows: usize, cols: usize) -> (usize, usize, usize, usize) {
        let half = self.half();
        (
            row.saturating_sub(half),
            row.saturating_add(half + 1).min(rows),
            col.saturating_sub(half),
            col.saturating_add(half + 1).min(cols),
        )
    }
}

impl TryFrom<usize> for WindowSpec {
    type Error = SarError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        WindowSpec::new(size)
    }
}

impl From<WindowSpec> for usize {
    fn from(window: WindowSpec) -> usize {
        window.0
    }
}

/// Mean and population variance of the valid samples in a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalStats {
    pub mean: f64,
    pub variance: f64,
    pub count: usize,
}

impl LocalStats {
    /// Coefficient of variation, or `None` when the mean is not positive
    pub fn cv(&self) -> Option<f64> {
        if self.mean > 0.0 {
            Some(self.variance.sqrt() / self.mean)
        } else {
            None
        }
    }
}

/// Statistics over valid samples in the window centred on (row, col).
/// Returns `None` if the window holds no valid sample.
pub fn local_statistics(raster: &Raster, row: usize, col: usize, window: WindowSpec) -> Option<LocalStats> {
    let (rows, cols) = raster.dim();
    let (r0, r1, c0, c1) = window.bounds(row, col, rows, cols);

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for i in r0..r1 {
        for j in c0..c1 {
            if let Some(v) = raster.get(i, j) {
                sum += v as f64;
                count += 1;
            }
        }
    }

    if count == 0 {
        return None;
    }

    let mean = sum / count as f64;
    let mut sq = 0.0f64;
    for i in r0..r1 {
        for j in c0..c1 {
            if let Some(v) = raster.get(i, j) {
                let d = v as f64 - mean;
                sq += d * d;
            }
        }
    }

    Some(LocalStats {
        mean,
        variance: sq / count as f64,
        count,
    })
}

/// Evaluate `f` for every pixel in row-major order, rows in parallel when the
/// `parallel` feature is enabled.
pub(crate) fn map_pixels<T, F>(rows: usize, cols: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        (0..rows)
            .into_par_iter()
            .flat_map_iter(|i| {
                let f = &f;
                (0..cols).map(move |j| f(i, j))
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        (0..rows)
            .flat_map(|i| {
                let f = &f;
                (0..cols).map(move |j| f(i, j))
            })
            .collect()
    }
}
