use crate::core::window::map_pixels;
use crate::types::{Raster, SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Multilooking parameters for speckle reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultilookParams {
    /// Number of looks in the row (azimuth) direction
    pub azimuth_looks: usize,
    /// Number of looks in the column (range) direction
    pub range_looks: usize,
}

impl Default for MultilookParams {
    fn default() -> Self {
        Self {
            azimuth_looks: 1,
            range_looks: 1,
        }
    }
}

/// Multilook processor for reducing speckle in SAR imagery
#[derive(Debug, Clone)]
pub struct MultilookProcessor {
    params: MultilookParams,
}

impl MultilookProcessor {
    /// Create a new multilook processor
    pub fn new(params: MultilookParams) -> Self {
        Self { params }
    }

    /// Processor averaging `row_factor x col_factor` blocks
    pub fn with_factors(row_factor: usize, col_factor: usize) -> Self {
        Self::new(MultilookParams {
            azimuth_looks: row_factor,
            range_looks: col_factor,
        })
    }

    /// Average non-overlapping blocks of valid samples.
    ///
    /// Output shape is `ceil(rows / azimuth_looks) x ceil(cols / range_looks)`;
    /// blocks at the lower and right edges may be partial. A block without any
    /// valid sample yields a no-data pixel.
    pub fn multilook(&self, image: &Raster) -> SarResult<Raster> {
        let MultilookParams { azimuth_looks, range_looks } = self.params;
        if azimuth_looks < 1 || range_looks < 1 {
            return Err(SarError::invalid(
                "multilook_factor",
                format!("factors must be >= 1, got {}x{}", azimuth_looks, range_looks),
            ));
        }

        let (rows, cols) = image.dim();
        let out_rows = rows.div_ceil(azimuth_looks);
        let out_cols = cols.div_ceil(range_looks);

        log::info!(
            "Applying multilook: {}x{} looks to {}x{} image -> {}x{}",
            azimuth_looks, range_looks, rows, cols, out_rows, out_cols
        );

        let samples = map_pixels(out_rows, out_cols, |out_row, out_col| {
            let start_row = out_row * azimuth_looks;
            let end_row = (out_row + 1).saturating_mul(azimuth_looks).min(rows);
            let start_col = out_col * range_looks;
            let end_col = (out_col + 1).saturating_mul(range_looks).min(cols);

            // f64 accumulation for precision
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for in_row in start_row..end_row {
                for in_col in start_col..end_col {
                    if let Some(v) = image.get(in_row, in_col) {
                        sum += v as f64;
                        count += 1;
                    }
                }
            }

            if count > 0 {
                Some((sum / count as f64) as f32)
            } else {
                None
            }
        });

        Raster::from_samples((out_rows, out_cols), samples, image.metadata().clone())
    }

    /// Equivalent number of looks (mean² / variance) over valid pixels.
    ///
    /// Uniform data has unbounded ENL; `f32::MAX` is returned in that case.
    pub fn estimate_enl(&self, data: &Raster) -> SarResult<f32> {
        let values = data.valid_values();
        if values.is_empty() {
            return Err(SarError::EmptyInput("no valid pixels for ENL estimate".to_string()));
        }

        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;

        if variance > 1e-10 {
            Ok((mean * mean / variance) as f32)
        } else {
            Ok(f32::MAX)
        }
    }

    /// Get the theoretical number of looks
    pub fn theoretical_looks(&self) -> usize {
        self.params.range_looks.saturating_mul(self.params.azimuth_looks)
    }
}
