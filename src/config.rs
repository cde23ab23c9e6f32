//! Change detection run configuration

use crate::core::calibrate::CalibrationType;
use crate::core::change_detection::ChangeMethod;
use crate::core::multilook::MultilookParams;
use crate::core::postprocess::{Connectivity, PostProcessParams, ThresholdDirection};
use crate::core::speckle_filter::{SpeckleFilterParams, SpeckleFilterType};
use crate::core::threshold::{ThresholdMethod, ThresholdParams};
use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable of a change detection run.
///
/// Unknown keys are rejected when loading from JSON. Missing keys take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeDetectionConfig {
    /// Speckle filter window (odd, >= 3)
    pub window_size: usize,
    /// `None` skips speckle filtering
    pub filter_type: Option<SpeckleFilterType>,
    pub calibration_type: CalibrationType,
    pub change_method: ChangeMethod,
    pub threshold_method: ThresholdMethod,
    /// Smallest connected region kept in the change mask
    pub min_area: usize,
    pub connectivity: Connectivity,
    pub threshold_direction: ThresholdDirection,

    /// Number of looks of the input data
    pub num_looks: f32,
    pub damping_factor: f32,
    pub homogeneity_cv: Option<f32>,
    pub heterogeneity_cv: Option<f32>,
    /// (row, col) multilook factors
    pub multilook: (usize, usize),
    pub structuring_element: usize,
    pub apply_closing: bool,
    pub otsu_bins: usize,
    pub mean_k: f32,
    pub percentile: f32,
    pub manual_threshold: Option<f32>,
    /// Rows per tile for windowed stages; `None` processes the raster whole
    pub tile_rows: Option<usize>,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        let speckle = SpeckleFilterParams::default();
        let threshold = ThresholdParams::default();
        let post = PostProcessParams::default();
        Self {
            window_size: speckle.window_size,
            filter_type: None,
            calibration_type: CalibrationType::Sigma0,
            change_method: ChangeMethod::LogRatio,
            threshold_method: ThresholdMethod::Otsu,
            min_area: post.min_area,
            connectivity: post.connectivity,
            threshold_direction: post.direction,
            num_looks: speckle.num_looks,
            damping_factor: speckle.damping_factor,
            homogeneity_cv: speckle.homogeneity_cv,
            heterogeneity_cv: speckle.heterogeneity_cv,
            multilook: (1, 1),
            structuring_element: post.structuring_element,
            apply_closing: post.apply_closing,
            otsu_bins: threshold.bins,
            mean_k: threshold.k,
            percentile: threshold.percentile,
            manual_threshold: threshold.manual_value,
            tile_rows: None,
        }
    }
}

impl ChangeDetectionConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> SarResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SarError::invalid("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SarError::Processing(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> SarResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SarError::Processing(format!("Failed to serialize config: {}", e)))
    }

    /// Check every range up front so no stage fails halfway through a run
    pub fn validate(&self) -> SarResult<()> {
        self.speckle_params().validate()?;
        self.postprocess_params().validate()?;

        let (rows, cols) = self.multilook;
        if rows < 1 || cols < 1 {
            return Err(SarError::invalid(
                "multilook",
                format!("factors must be >= 1, got {}x{}", rows, cols),
            ));
        }
        if self.threshold_method == ThresholdMethod::Otsu && self.otsu_bins < 2 {
            return Err(SarError::invalid(
                "otsu_bins",
                format!("need at least 2 bins, got {}", self.otsu_bins),
            ));
        }
        if !self.mean_k.is_finite() {
            return Err(SarError::invalid("mean_k", "must be finite"));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(SarError::invalid(
                "percentile",
                format!("must be within [0, 100], got {}", self.percentile),
            ));
        }
        if self.threshold_method == ThresholdMethod::Manual && self.manual_threshold.is_none() {
            return Err(SarError::invalid(
                "manual_threshold",
                "manual threshold method requires a value",
            ));
        }
        if self.tile_rows == Some(0) {
            return Err(SarError::invalid("tile_rows", "must be >= 1"));
        }
        Ok(())
    }

    pub fn speckle_params(&self) -> SpeckleFilterParams {
        SpeckleFilterParams {
            window_size: self.window_size,
            num_looks: self.num_looks,
            damping_factor: self.damping_factor,
            homogeneity_cv: self.homogeneity_cv,
            heterogeneity_cv: self.heterogeneity_cv,
        }
    }

    pub fn multilook_params(&self) -> MultilookParams {
        MultilookParams {
            azimuth_looks: self.multilook.0,
            range_looks: self.multilook.1,
        }
    }

    pub fn threshold_params(&self) -> ThresholdParams {
        ThresholdParams {
            bins: self.otsu_bins,
            k: self.mean_k,
            percentile: self.percentile,
            manual_value: self.manual_threshold,
        }
    }

    pub fn postprocess_params(&self) -> PostProcessParams {
        PostProcessParams {
            direction: self.threshold_direction,
            structuring_element: self.structuring_element,
            apply_closing: self.apply_closing,
            min_area: self.min_area,
            connectivity: self.connectivity,
        }
    }
}
