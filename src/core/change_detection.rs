//! Change magnitude between two co-registered backscatter rasters.
//!
//! Every method produces a raster where larger values mean "more change" in the
//! `after` direction. Log-ratio is the method of choice for SAR: it turns the
//! multiplicative speckle into additive noise and is antisymmetric under swapping
//! the inputs.

use crate::core::window::map_pixels;
use crate::types::{Raster, SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Default epsilon added to the ratio denominator
pub const RATIO_EPSILON: f32 = 1e-10;

/// Change magnitude methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMethod {
    /// ln(after) - ln(before), 0 for no change
    LogRatio,
    /// after / (before + eps), 1 for no change
    Ratio,
    /// after - before, 0 for no change
    Difference,
}

impl ChangeMethod {
    /// Value the method yields for an unchanged pixel
    pub fn no_change_value(&self) -> f32 {
        match self {
            ChangeMethod::LogRatio | ChangeMethod::Difference => 0.0,
            ChangeMethod::Ratio => 1.0,
        }
    }
}

impl std::str::FromStr for ChangeMethod {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "log_ratio" | "logratio" => Ok(ChangeMethod::LogRatio),
            "ratio" => Ok(ChangeMethod::Ratio),
            "difference" | "diff" => Ok(ChangeMethod::Difference),
            "pca" => Err(SarError::invalid(
                "change_method",
                "PCA change detection is not supported",
            )),
            _ => Err(SarError::invalid("change_method", format!("unknown change method '{}'", s))),
        }
    }
}

/// Change detector combining a before/after pair
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    method: ChangeMethod,
    epsilon: f32,
    absolute: bool,
}

impl ChangeDetector {
    pub fn new(method: ChangeMethod) -> Self {
        Self {
            method,
            epsilon: RATIO_EPSILON,
            absolute: false,
        }
    }

    /// Epsilon added to the ratio denominator
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Report |log ratio| or |difference| so decreases count as change too.
    /// Has no effect on the ratio method.
    pub fn with_absolute(mut self, absolute: bool) -> Self {
        self.absolute = absolute;
        self
    }

    pub fn method(&self) -> ChangeMethod {
        self.method
    }

    /// Compute the change magnitude raster; output metadata comes from `after`
    pub fn detect(&self, before: &Raster, after: &Raster) -> SarResult<Raster> {
        if before.dim() != after.dim() {
            return Err(SarError::ShapeMismatch {
                expected: before.dim(),
                actual: after.dim(),
            });
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(SarError::invalid(
                "epsilon",
                format!("ratio epsilon must be non-negative, got {}", self.epsilon),
            ));
        }

        let (rows, cols) = before.dim();
        log::info!("Computing {:?} change magnitude for {}x{} rasters", self.method, rows, cols);

        let samples = map_pixels(rows, cols, |i, j| -> Option<f32> {
            let b = before.get(i, j)?;
            let a = after.get(i, j)?;
            let value = match self.method {
                ChangeMethod::LogRatio => {
                    if a <= 0.0 || b <= 0.0 {
                        return None;
                    }
                    (a as f64).ln() - (b as f64).ln()
                }
                ChangeMethod::Ratio => {
                    let denom = b as f64 + self.epsilon as f64;
                    if denom == 0.0 {
                        return None;
                    }
                    a as f64 / denom
                }
                ChangeMethod::Difference => a as f64 - b as f64,
            };

            let value = if self.absolute && self.method != ChangeMethod::Ratio {
                value.abs()
            } else {
                value
            };
            Some(value as f32)
        });

        let magnitude = Raster::from_samples((rows, cols), samples, after.metadata().clone())?;
        let dropped = rows * cols - magnitude.valid_count();
        if dropped > 0 {
            log::debug!("{} pixels are no-data in the change magnitude", dropped);
        }
        Ok(magnitude)
    }
}
