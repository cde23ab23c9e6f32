use chrono::{DateTime, Utc};
use ndarray::{s, Array2};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complex-valued SAR sample (I + jQ)
pub type SarComplex = Complex<f32>;

/// 2D complex SAR data array (azimuth x range)
pub type SarImage = Array2<SarComplex>;

/// 2D real SAR data array (azimuth x range)
pub type SarRealImage = Array2<f32>;

/// Value written into the data buffer wherever a pixel is no-data
pub const NODATA_FILL: f32 = 0.0;

/// Coordinate system enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Radar coordinates (range, azimuth)
    Radar,
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

/// Polarization channels for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::invalid("polarization", format!("unknown polarization '{}'", s))),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Metadata carried alongside a raster.
///
/// Processing stages never interpret these fields; they copy them from input to
/// output so that geometric and export collaborators see what the acquisition
/// collaborator supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub pixel_spacing: Option<(f64, f64)>, // (range, azimuth) in meters
    pub coordinate_system: Option<CoordinateSystem>,
    pub acquisition_time: Option<DateTime<Utc>>,
    pub polarization: Option<Polarization>,
    pub attributes: HashMap<String, String>,
}

/// Real-valued raster with an optional validity mask.
///
/// A sample is valid when the mask (if any) marks it valid and the stored value is
/// finite. Rasters produced by this crate store [`NODATA_FILL`] at invalid
/// positions, so their data buffers never contain NaN or infinity.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    data: Array2<f32>,
    valid: Option<Array2<bool>>,
    metadata: RasterMetadata,
}

impl Raster {
    /// Wrap a data buffer; non-finite samples are treated as no-data
    pub fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            valid: None,
            metadata: RasterMetadata::default(),
        }
    }

    /// Wrap a data buffer with an explicit validity mask (`true` = valid)
    pub fn with_mask(data: Array2<f32>, valid: Array2<bool>) -> SarResult<Self> {
        if data.dim() != valid.dim() {
            return Err(SarError::ShapeMismatch {
                expected: data.dim(),
                actual: valid.dim(),
            });
        }
        Ok(Self {
            data,
            valid: Some(valid),
            metadata: RasterMetadata::default(),
        })
    }

    /// Constant-valued raster
    pub fn from_elem(shape: (usize, usize), value: f32) -> Self {
        Self::new(Array2::from_elem(shape, value))
    }

    pub fn with_metadata(mut self, metadata: RasterMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build a raster from row-major per-pixel results, `None` meaning no-data.
    pub(crate) fn from_samples(
        shape: (usize, usize),
        samples: Vec<Option<f32>>,
        metadata: RasterMetadata,
    ) -> SarResult<Self> {
        if samples.len() != shape.0 * shape.1 {
            return Err(SarError::Processing(format!(
                "Sample count {} does not match {}x{} raster",
                samples.len(),
                shape.0,
                shape.1
            )));
        }

        let mut data = Vec::with_capacity(samples.len());
        let mut valid = Vec::with_capacity(samples.len());
        let mut any_invalid = false;
        for sample in samples {
            match sample.filter(|v| v.is_finite()) {
                Some(v) => {
                    data.push(v);
                    valid.push(true);
                }
                None => {
                    data.push(NODATA_FILL);
                    valid.push(false);
                    any_invalid = true;
                }
            }
        }

        let data = Array2::from_shape_vec(shape, data)
            .map_err(|e| SarError::Processing(format!("Shape error: {}", e)))?;
        let valid = if any_invalid {
            Some(
                Array2::from_shape_vec(shape, valid)
                    .map_err(|e| SarError::Processing(format!("Shape error: {}", e)))?,
            )
        } else {
            None
        };

        Ok(Self { data, valid, metadata })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        let masked_ok = self.valid.as_ref().map_or(true, |m| m[[row, col]]);
        masked_ok && self.data[[row, col]].is_finite()
    }

    /// Sample at (row, col), or `None` if it is no-data
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if self.is_valid(row, col) {
            Some(self.data[[row, col]])
        } else {
            None
        }
    }

    /// Mark a single pixel as no-data
    pub fn set_nodata(&mut self, row: usize, col: usize) {
        let shape = self.data.dim();
        let valid = self
            .valid
            .get_or_insert_with(|| Array2::from_elem(shape, true));
        valid[[row, col]] = false;
        self.data[[row, col]] = NODATA_FILL;
    }

    /// Full validity mask, `true` = valid
    pub fn validity_mask(&self) -> Array2<bool> {
        Array2::from_shape_fn(self.dim(), |(r, c)| self.is_valid(r, c))
    }

    /// Data buffer with NaN at every no-data position
    pub fn to_nan_filled(&self) -> Array2<f32> {
        if !self.has_nodata() {
            return self.data.clone();
        }
        Array2::from_shape_fn(self.dim(), |(r, c)| self.get(r, c).unwrap_or(f32::NAN))
    }

    pub fn valid_count(&self) -> usize {
        self.iter_valid().count()
    }

    pub fn has_nodata(&self) -> bool {
        self.valid_count() < self.data.len()
    }

    /// Iterate over all valid samples in row-major order
    pub fn iter_valid(&self) -> impl Iterator<Item = f32> + '_ {
        self.data
            .indexed_iter()
            .filter(move |((r, c), _)| self.is_valid(*r, *c))
            .map(|(_, &v)| v)
    }

    pub fn valid_values(&self) -> Vec<f32> {
        self.iter_valid().collect()
    }

    /// Minimum and maximum of valid samples
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.iter_valid().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Copy of rows `start..end`, metadata included
    pub(crate) fn slice_rows(&self, start: usize, end: usize) -> Raster {
        Raster {
            data: self.data.slice(s![start..end, ..]).to_owned(),
            valid: self
                .valid
                .as_ref()
                .map(|m| m.slice(s![start..end, ..]).to_owned()),
            metadata: self.metadata.clone(),
        }
    }

    /// Concatenate row blocks of equal width into one raster
    pub(crate) fn stitch_rows(parts: &[Raster], metadata: RasterMetadata) -> SarResult<Raster> {
        let cols = parts.first().map(|p| p.cols()).unwrap_or(0);
        let rows: usize = parts.iter().map(|p| p.rows()).sum();

        let mut samples = Vec::with_capacity(rows * cols);
        for part in parts {
            if part.cols() != cols {
                return Err(SarError::ShapeMismatch {
                    expected: (part.rows(), cols),
                    actual: part.dim(),
                });
            }
            for r in 0..part.rows() {
                for c in 0..cols {
                    samples.push(part.get(r, c));
                }
            }
        }

        Raster::from_samples((rows, cols), samples, metadata)
    }
}

/// Binary change map, `true` = changed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeMask {
    data: Array2<bool>,
    metadata: RasterMetadata,
}

impl ChangeMask {
    pub fn new(data: Array2<bool>, metadata: RasterMetadata) -> Self {
        Self { data, metadata }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array2<bool> {
        &self.data
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[[row, col]]
    }

    pub fn changed_count(&self) -> usize {
        self.data.iter().filter(|&&x| x).count()
    }

    /// 1.0 for changed, 0.0 for unchanged
    pub fn to_raster(&self) -> Raster {
        Raster::new(self.data.mapv(|x| if x { 1.0 } else { 0.0 }))
            .with_metadata(self.metadata.clone())
    }
}

/// Error types for SAR change detection
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Value {value} outside observed range [{min}, {max}]")]
    OutOfRange { value: f32, min: f32, max: f32 },

    #[error("Numerically degenerate: {0}")]
    NumericDegenerate(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Processing error: {0}")]
    Processing(String),
}

impl SarError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SarError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_samples_are_nodata() {
        let mut data = Array2::from_elem((2, 2), 1.0f32);
        data[[0, 1]] = f32::NAN;
        let raster = Raster::new(data);

        assert!(raster.is_valid(0, 0));
        assert!(!raster.is_valid(0, 1));
        assert_eq!(raster.valid_count(), 3);
        assert_eq!(raster.get(0, 1), None);
    }

    #[test]
    fn test_from_samples_fills_nodata() {
        let raster = Raster::from_samples(
            (1, 3),
            vec![Some(2.0), None, Some(f32::INFINITY)],
            RasterMetadata::default(),
        )
        .unwrap();

        assert_eq!(raster.get(0, 0), Some(2.0));
        assert_eq!(raster.get(0, 1), None);
        assert_eq!(raster.get(0, 2), None);
        assert!(raster.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_has_nodata_tracks_validity() {
        let mut raster = Raster::from_elem((2, 2), 1.0);
        assert!(!raster.has_nodata());

        raster.set_nodata(1, 0);
        assert!(raster.has_nodata());
        assert_eq!(raster.valid_count(), 3);
    }

    #[test]
    fn test_nan_filled_marks_nodata() {
        let mut raster = Raster::from_elem((2, 3), 4.0);
        assert_eq!(raster.to_nan_filled(), Array2::from_elem((2, 3), 4.0));

        raster.set_nodata(0, 2);
        let filled = raster.to_nan_filled();
        assert!(filled[[0, 2]].is_nan());
        assert_eq!(filled[[1, 2]], 4.0);

        // NaN round-trips to no-data
        let back = Raster::new(filled);
        assert_eq!(back.get(0, 2), None);
        assert_eq!(back.valid_count(), 5);
    }

    #[test]
    fn test_mask_shape_is_checked() {
        let result = Raster::with_mask(Array2::zeros((2, 2)), Array2::from_elem((3, 2), true));
        assert!(matches!(result, Err(SarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_slice_and_stitch_roundtrip() {
        let mut raster = Raster::new(Array2::from_shape_fn((5, 3), |(r, c)| (r * 3 + c) as f32));
        raster.set_nodata(2, 1);

        let parts = vec![raster.slice_rows(0, 2), raster.slice_rows(2, 5)];
        let stitched = Raster::stitch_rows(&parts, raster.metadata().clone()).unwrap();

        assert_eq!(stitched, raster);
    }

    #[test]
    fn test_polarization_parsing() {
        assert_eq!("vh".parse::<Polarization>().unwrap(), Polarization::VH);
        assert!("XX".parse::<Polarization>().is_err());
    }
}
