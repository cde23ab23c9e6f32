//! Core SAR processing modules

pub mod window;
pub mod calibrate;
pub mod speckle_filter;
pub mod multilook;
pub mod change_detection;
pub mod threshold;
pub mod postprocess;
pub mod tiling;

// Re-export main types
pub use window::{local_statistics, LocalStats, WindowSpec};
pub use calibrate::{
    parse_calibration_from_xml, CalibrationCoefficients, CalibrationLookup, CalibrationParams,
    CalibrationProcessor, CalibrationType, CalibrationVector,
};
pub use speckle_filter::{AdaptiveDecision, SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
pub use multilook::{MultilookParams, MultilookProcessor};
pub use change_detection::{ChangeDetector, ChangeMethod, RATIO_EPSILON};
pub use threshold::{Threshold, ThresholdDiagnostics, ThresholdMethod, ThresholdParams, ThresholdSelector};
pub use postprocess::{
    label_components, ComponentLabels, Connectivity, PostProcessParams, PostProcessor, ThresholdDirection,
};
pub use tiling::{CancellationToken, TiledExecutor};
