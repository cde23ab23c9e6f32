//! sarchange: change detection for co-registered SAR backscatter pairs
//!
//! The crate takes two intensity rasters of the same scene, calibrates them,
//! suppresses speckle, computes a change magnitude, picks a threshold and
//! cleans the resulting binary mask. Every stage is a pure function over
//! [`Raster`] values configured by a plain record; [`pipeline`] chains them.

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, ChangeMask, CoordinateSystem, Polarization, Raster, RasterMetadata, SarComplex,
    SarError, SarImage, SarRealImage, SarResult, NODATA_FILL,
};

pub use config::ChangeDetectionConfig;
pub use io::{AcquiredScene, AcquisitionQuery, AcquisitionSource, ChangeMapExporter, GeometricCorrector};
pub use pipeline::{ChangeDetectionPipeline, ChangeDetectionResult};
