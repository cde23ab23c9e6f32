//! Python bindings, built with the `python` feature

use crate::config::ChangeDetectionConfig;
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
use crate::core::threshold::{ThresholdMethod, ThresholdParams, ThresholdSelector};
use crate::pipeline::ChangeDetectionPipeline;
use crate::types::{Raster, SarError};
use numpy::{PyArray2, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

impl From<SarError> for PyErr {
    fn from(err: SarError) -> PyErr {
        match err {
            SarError::InvalidParameter { .. }
            | SarError::ShapeMismatch { .. }
            | SarError::EmptyInput(_)
            | SarError::OutOfRange { .. } => PyValueError::new_err(err.to_string()),
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

/// Convert a numpy array to a raster; NaN marks no-data
fn numpy_to_raster(arr: PyReadonlyArray2<f32>) -> Raster {
    Raster::new(arr.as_array().to_owned())
}

/// Apply a speckle filter to a 2D intensity array; no-data comes back as NaN
#[pyfunction]
#[pyo3(signature = (image, filter_type = "lee", window_size = 7, num_looks = 1.0))]
fn speckle_filter<'py>(
    py: Python<'py>,
    image: PyReadonlyArray2<f32>,
    filter_type: &str,
    window_size: usize,
    num_looks: f32,
) -> PyResult<&'py PyArray2<f32>> {
    let filter_type: SpeckleFilterType = filter_type.parse()?;
    let filter = SpeckleFilter::with_params(SpeckleFilterParams {
        window_size,
        num_looks,
        ..Default::default()
    });
    let filtered = filter.apply_filter(&numpy_to_raster(image), filter_type)?;
    Ok(filtered.to_nan_filled().to_pyarray(py))
}

/// Select a threshold for a change magnitude array
#[pyfunction]
#[pyo3(signature = (magnitude, method = "otsu"))]
fn select_threshold(magnitude: PyReadonlyArray2<f32>, method: &str) -> PyResult<f32> {
    let method: ThresholdMethod = method.parse()?;
    let threshold = ThresholdSelector::new(ThresholdParams::default())
        .select(&numpy_to_raster(magnitude), method)?;
    Ok(threshold.value)
}

/// Run the full pipeline on a calibrated before/after pair.
///
/// `config_json` follows the `ChangeDetectionConfig` JSON layout.
#[pyfunction]
#[pyo3(signature = (before, after, config_json = None))]
fn detect_changes(
    py: Python,
    before: PyReadonlyArray2<f32>,
    after: PyReadonlyArray2<f32>,
    config_json: Option<&str>,
) -> PyResult<PyObject> {
    let config = match config_json {
        Some(json) => ChangeDetectionConfig::from_json_str(json)?,
        None => ChangeDetectionConfig::default(),
    };
    let before = numpy_to_raster(before);
    let after = numpy_to_raster(after);

    let result = py.allow_threads(|| ChangeDetectionPipeline::new(config)?.run(&before, &after))?;

    let out = PyDict::new(py);
    out.set_item("mask", result.mask.data().to_pyarray(py))?;
    out.set_item("magnitude", result.magnitude.to_nan_filled().to_pyarray(py))?;
    out.set_item("valid", result.magnitude.validity_mask().to_pyarray(py))?;
    out.set_item("threshold", result.threshold.value)?;
    out.set_item("threshold_method", format!("{:?}", result.threshold.method))?;
    out.set_item("changed_pixels", result.mask.changed_count())?;
    Ok(out.into())
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(speckle_filter, m)?)?;
    m.add_function(wrap_pyfunction!(select_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(detect_changes, m)?)?;
    Ok(())
}
