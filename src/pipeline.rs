//! End-to-end change detection: calibrated pair in, cleaned change mask out.

use crate::config::ChangeDetectionConfig;
use crate::core::calibrate::{CalibrationLookup, CalibrationParams, CalibrationProcessor};
use crate::core::change_detection::ChangeDetector;
use crate::core::multilook::MultilookProcessor;
use crate::core::postprocess::PostProcessor;
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::threshold::{Threshold, ThresholdSelector};
use crate::core::tiling::{CancellationToken, TiledExecutor};
use crate::io::{AcquisitionQuery, AcquisitionSource, ChangeMapExporter, GeometricCorrector};
use crate::types::{ChangeMask, Raster, SarError, SarResult};

/// Outputs of a change detection run
#[derive(Debug, Clone)]
pub struct ChangeDetectionResult {
    /// Change magnitude after preprocessing both inputs
    pub magnitude: Raster,
    pub threshold: Threshold,
    pub mask: ChangeMask,
}

impl ChangeDetectionResult {
    /// Hand the magnitude and the mask to an exporter
    pub fn export(&self, exporter: &mut dyn ChangeMapExporter) -> SarResult<()> {
        exporter.export_raster("change_magnitude", &self.magnitude)?;
        exporter.export_mask(&self.mask)
    }
}

/// Runs every stage from one [`ChangeDetectionConfig`]
#[derive(Debug, Clone)]
pub struct ChangeDetectionPipeline {
    config: ChangeDetectionConfig,
    token: CancellationToken,
}

impl ChangeDetectionPipeline {
    pub fn new(config: ChangeDetectionConfig) -> SarResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            token: CancellationToken::new(),
        })
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn config(&self) -> &ChangeDetectionConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fetch, calibrate and optionally terrain-correct both acquisitions, then run
    pub fn run_acquired(
        &self,
        source: &dyn AcquisitionSource,
        before: &AcquisitionQuery,
        after: &AcquisitionQuery,
        corrector: Option<&dyn GeometricCorrector>,
    ) -> SarResult<ChangeDetectionResult> {
        let mut calibrated = Vec::with_capacity(2);
        for query in [before, after] {
            log::info!(
                "Fetching {} acquisition {} to {}",
                query.polarization,
                query.start.to_rfc3339(),
                query.end.to_rfc3339()
            );
            let scene = source.fetch(query)?;
            let raster = self.calibrate(&scene.raster, scene.calibration)?;
            let raster = match corrector {
                Some(corrector) => corrector.correct(raster)?,
                None => raster,
            };
            calibrated.push(raster);
        }

        self.run(&calibrated[0], &calibrated[1])
    }

    /// Calibrate digital numbers of both acquisitions, then run
    pub fn run_raw(
        &self,
        before: &Raster,
        before_calibration: CalibrationLookup,
        after: &Raster,
        after_calibration: CalibrationLookup,
    ) -> SarResult<ChangeDetectionResult> {
        let before = self.calibrate(before, before_calibration)?;
        let after = self.calibrate(after, after_calibration)?;
        self.run(&before, &after)
    }

    /// Run on already calibrated, co-registered backscatter
    pub fn run(&self, before: &Raster, after: &Raster) -> SarResult<ChangeDetectionResult> {
        if before.dim() != after.dim() {
            return Err(SarError::ShapeMismatch {
                expected: before.dim(),
                actual: after.dim(),
            });
        }

        log::info!(
            "Starting change detection on {}x{} pair ({:?}, {:?})",
            before.rows(),
            before.cols(),
            self.config.change_method,
            self.config.threshold_method
        );

        let before = self.preprocess(before)?;
        let after = self.preprocess(after)?;
        self.check_cancelled()?;

        let magnitude = ChangeDetector::new(self.config.change_method).detect(&before, &after)?;
        self.check_cancelled()?;

        let threshold = ThresholdSelector::new(self.config.threshold_params())
            .select(&magnitude, self.config.threshold_method)?;

        let mask = PostProcessor::new(self.config.postprocess_params())
            .postprocess(&magnitude, threshold.value)?;

        log::info!(
            "Change detection complete: {} of {} pixels changed",
            mask.changed_count(),
            magnitude.rows() * magnitude.cols()
        );

        Ok(ChangeDetectionResult {
            magnitude,
            threshold,
            mask,
        })
    }

    /// Speckle filter (when configured) then multilook
    pub fn preprocess(&self, raster: &Raster) -> SarResult<Raster> {
        let filtered = match self.config.filter_type {
            Some(filter_type) => {
                let filter = SpeckleFilter::with_params(self.config.speckle_params());
                match self.config.tile_rows {
                    Some(tile_rows) => {
                        let halo = self.config.window_size / 2;
                        TiledExecutor::new(tile_rows)?
                            .with_token(self.token.clone())
                            .process(raster, halo, |band| filter.apply_filter(band, filter_type))?
                    }
                    None => filter.apply_filter(raster, filter_type)?,
                }
            }
            None => raster.clone(),
        };
        self.check_cancelled()?;

        let (row_factor, col_factor) = self.config.multilook;
        if row_factor == 1 && col_factor == 1 {
            return Ok(filtered);
        }
        MultilookProcessor::new(self.config.multilook_params()).multilook(&filtered)
    }

    fn calibrate(&self, raster: &Raster, lookup: CalibrationLookup) -> SarResult<Raster> {
        self.check_cancelled()?;
        CalibrationProcessor::new(CalibrationParams {
            kind: self.config.calibration_type,
            lookup,
        })
        .calibrate(raster)
    }

    fn check_cancelled(&self) -> SarResult<()> {
        if self.token.is_cancelled() {
            Err(SarError::Cancelled)
        } else {
            Ok(())
        }
    }
}
