//! Interfaces to the collaborators around the processing core.
//!
//! Product discovery and download, terrain correction and persistence live
//! outside this crate. They plug into [`crate::pipeline::ChangeDetectionPipeline`]
//! through the traits below.

use crate::core::calibrate::CalibrationLookup;
use crate::types::{BoundingBox, ChangeMask, Polarization, Raster, SarError, SarResult};
use chrono::{DateTime, Utc};

/// What to acquire: area, time window and channel
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionQuery {
    pub bbox: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub polarization: Polarization,
    /// Pin a specific product instead of searching
    pub product_id: Option<String>,
}

impl AcquisitionQuery {
    pub fn new(
        bbox: BoundingBox,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        polarization: Polarization,
    ) -> SarResult<Self> {
        if end < start {
            return Err(SarError::invalid(
                "time_window",
                format!("end {} precedes start {}", end.to_rfc3339(), start.to_rfc3339()),
            ));
        }
        if bbox.min_lon > bbox.max_lon || bbox.min_lat > bbox.max_lat {
            return Err(SarError::invalid("bbox", format!("inverted bounding box {:?}", bbox)));
        }
        Ok(Self {
            bbox,
            start,
            end,
            polarization,
            product_id: None,
        })
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// Uncalibrated raster plus the gain lookup shipped with it
#[derive(Debug, Clone)]
pub struct AcquiredScene {
    /// Digital numbers
    pub raster: Raster,
    pub calibration: CalibrationLookup,
}

/// Supplies rasters for a query (catalog search, download, decoding)
pub trait AcquisitionSource {
    fn fetch(&self, query: &AcquisitionQuery) -> SarResult<AcquiredScene>;
}

/// Terrain correction and reprojection onto a common grid
pub trait GeometricCorrector {
    fn correct(&self, raster: Raster) -> SarResult<Raster>;
}

/// Persists change detection outputs
pub trait ChangeMapExporter {
    fn export_mask(&mut self, mask: &ChangeMask) -> SarResult<()>;

    fn export_raster(&mut self, name: &str, raster: &Raster) -> SarResult<()>;
}
