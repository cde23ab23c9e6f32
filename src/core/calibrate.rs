use crate::core::window::map_pixels;
use crate::types::{Raster, SarError, SarImage, SarResult};
use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Backscatter coefficient produced by calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationType {
    Sigma0,  // Ground-range backscatter
    Beta0,   // Radar brightness
    Gamma0,  // Backscatter normalised by incidence
}

impl std::str::FromStr for CalibrationType {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sigma0" | "sigma_nought" | "sigma" => Ok(CalibrationType::Sigma0),
            "beta0" | "beta_nought" | "beta" => Ok(CalibrationType::Beta0),
            "gamma0" | "gamma" => Ok(CalibrationType::Gamma0),
            _ => Err(SarError::invalid(
                "calibration_type",
                format!("unknown calibration type '{}'", s),
            )),
        }
    }
}

/// Calibration vector from Sentinel-1 calibration annotation
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationVector {
    pub azimuth_time: String,
    pub line: usize,
    pub pixels: Vec<usize>,
    pub sigma_nought: Vec<f32>,
    pub beta_nought: Vec<f32>,
    pub gamma: Vec<f32>,
}

impl CalibrationVector {
    fn values(&self, cal_type: CalibrationType) -> &[f32] {
        match cal_type {
            CalibrationType::Sigma0 => &self.sigma_nought,
            CalibrationType::Beta0 => &self.beta_nought,
            CalibrationType::Gamma0 => &self.gamma,
        }
    }

    /// Linear interpolation along the pixel axis, clamped at both ends
    fn interpolate_pixel(&self, pixel: usize, cal_type: CalibrationType) -> f32 {
        let values = self.values(cal_type);
        let (before, after) = surrounding(&self.pixels, |&p| p, pixel);
        let (p0, p1) = (self.pixels[before], self.pixels[after]);

        if before == after || p1 == p0 {
            return values[before];
        }
        let weight = (pixel - p0) as f32 / (p1 - p0) as f32;
        values[before] * (1.0 - weight) + values[after] * weight
    }
}

/// Indices of the sorted knots bracketing `target`, equal when clamped or exact
fn surrounding<T>(knots: &[T], key: impl Fn(&T) -> usize, target: usize) -> (usize, usize) {
    let idx = knots.partition_point(|k| key(k) <= target);
    if idx == 0 {
        (0, 0)
    } else if idx == knots.len() || key(&knots[idx - 1]) == target {
        (idx - 1, idx - 1)
    } else {
        (idx - 1, idx)
    }
}

/// Sparse calibration grid for one swath/polarization
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCoefficients {
    pub vectors: Vec<CalibrationVector>,
    pub swath: String,
    pub polarization: String,
}

impl CalibrationCoefficients {
    pub fn new(mut vectors: Vec<CalibrationVector>, swath: String, polarization: String) -> SarResult<Self> {
        vectors.sort_by_key(|v| v.line);
        let coefficients = Self { vectors, swath, polarization };
        coefficients.validate()?;
        Ok(coefficients)
    }

    /// Check vectors are non-empty, sorted and internally consistent
    pub fn validate(&self) -> SarResult<()> {
        if self.vectors.is_empty() {
            return Err(SarError::invalid("calibration_lookup", "no calibration vectors available"));
        }
        if self.vectors.windows(2).any(|w| w[0].line > w[1].line) {
            return Err(SarError::invalid("calibration_lookup", "calibration vectors not sorted by line"));
        }
        for (i, vector) in self.vectors.iter().enumerate() {
            let n = vector.pixels.len();
            if n == 0
                || vector.sigma_nought.len() != n
                || vector.beta_nought.len() != n
                || vector.gamma.len() != n
            {
                return Err(SarError::invalid(
                    "calibration_lookup",
                    format!("calibration vector {} is empty or has mismatched lengths", i),
                ));
            }
            if vector.pixels.windows(2).any(|w| w[0] > w[1]) {
                return Err(SarError::invalid(
                    "calibration_lookup",
                    format!("calibration vector {} pixels not sorted", i),
                ));
            }
        }
        Ok(())
    }

    /// Bilinearly interpolated calibration value (the A in |DN|²/A²)
    pub fn get_calibration_value(&self, line: usize, pixel: usize, cal_type: CalibrationType) -> SarResult<f32> {
        self.validate()?;
        Ok(self.value_unchecked(line, pixel, cal_type))
    }

    fn value_unchecked(&self, line: usize, pixel: usize, cal_type: CalibrationType) -> f32 {
        let (before, after) = surrounding(&self.vectors, |v| v.line, line);

        let before_vector = &self.vectors[before];
        let before_value = before_vector.interpolate_pixel(pixel, cal_type);
        if before == after {
            return before_value;
        }

        let after_vector = &self.vectors[after];
        let after_value = after_vector.interpolate_pixel(pixel, cal_type);
        let weight = (line - before_vector.line) as f32 / (after_vector.line - before_vector.line) as f32;
        before_value * (1.0 - weight) + after_value * weight
    }
}

/// Source of the calibration gain applied to each pixel
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationLookup {
    /// One gain for the whole scene
    Constant(f32),
    /// Gain per pixel, same shape as the raster
    PerPixel(Array2<f32>),
    /// Sentinel-1 calibration vectors; gain = A²
    Vectors(CalibrationCoefficients),
}

/// Calibration target kind plus the lookup supplied by the calibration source
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationParams {
    pub kind: CalibrationType,
    pub lookup: CalibrationLookup,
}

/// Radiometric calibration processor
#[derive(Debug, Clone)]
pub struct CalibrationProcessor {
    params: CalibrationParams,
}

impl CalibrationProcessor {
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Convert digital numbers to backscatter: coef = DN² / gain
    pub fn calibrate(&self, raster: &Raster) -> SarResult<Raster> {
        log::info!("Applying radiometric calibration: {:?}", self.params.kind);
        let intensity = Raster::from_samples(
            raster.dim(),
            (0..raster.rows())
                .flat_map(|i| (0..raster.cols()).map(move |j| (i, j)))
                .map(|(i, j)| raster.get(i, j).map(|dn| dn * dn))
                .collect(),
            raster.metadata().clone(),
        )?;
        self.calibrate_intensity(&intensity)
    }

    /// Divide detected intensity (|DN|²) by the calibration gain.
    ///
    /// Pixels whose gain is non-positive or non-finite become no-data.
    pub fn calibrate_intensity(&self, intensity: &Raster) -> SarResult<Raster> {
        let (azimuth_lines, range_samples) = intensity.dim();
        log::debug!("Input dimensions: {} x {}", azimuth_lines, range_samples);

        match &self.params.lookup {
            CalibrationLookup::PerPixel(gains) if gains.dim() != intensity.dim() => {
                return Err(SarError::ShapeMismatch {
                    expected: intensity.dim(),
                    actual: gains.dim(),
                });
            }
            CalibrationLookup::Vectors(coefficients) => coefficients.validate()?,
            _ => {}
        }

        let kind = self.params.kind;
        let lookup = &self.params.lookup;
        let samples = map_pixels(azimuth_lines, range_samples, |i, j| -> Option<f32> {
            let value = intensity.get(i, j)?;
            let gain = match lookup {
                CalibrationLookup::Constant(g) => *g,
                CalibrationLookup::PerPixel(gains) => gains[[i, j]],
                CalibrationLookup::Vectors(coefficients) => {
                    let a = coefficients.value_unchecked(i, j, kind);
                    a * a
                }
            };
            if gain.is_finite() && gain > 0.0 {
                Some(value / gain)
            } else {
                None
            }
        });

        let calibrated = Raster::from_samples(intensity.dim(), samples, intensity.metadata().clone())?;
        if let Some((lo, hi)) = calibrated.value_range() {
            log::info!("Calibration completed. Output range: {:.2e} to {:.2e}", lo, hi);
        } else {
            log::warn!("Calibration produced no valid pixels");
        }
        Ok(calibrated)
    }

    /// Detected intensity |SLC|² from complex samples
    pub fn intensity_from_slc(slc_data: &SarImage) -> Raster {
        Raster::new(slc_data.mapv(|slc_pixel| slc_pixel.norm_sqr()))
    }

    /// Convert linear backscatter to dB; non-positive samples become no-data
    pub fn to_db(linear_data: &Raster) -> SarResult<Raster> {
        log::debug!("Converting to dB scale");

        let (rows, cols) = linear_data.dim();
        let samples = map_pixels(rows, cols, |i, j| {
            linear_data
                .get(i, j)
                .filter(|&x| x > 0.0)
                .map(|x| 10.0 * x.log10())
        });
        Raster::from_samples((rows, cols), samples, linear_data.metadata().clone())
    }
}

/// Parse calibration vectors from Sentinel-1 calibration XML
pub fn parse_calibration_from_xml(xml_content: &str) -> SarResult<CalibrationCoefficients> {
    log::debug!("Parsing calibration data from XML (length: {})", xml_content.len());

    let vector_pattern = Regex::new(r"(?s)<calibrationVector>(.*?)</calibrationVector>")
        .map_err(|e| SarError::Processing(format!("Regex error: {}", e)))?;

    let mut vectors = Vec::new();
    for captures in vector_pattern.captures_iter(xml_content) {
        if let Some(vector_match) = captures.get(1) {
            vectors.push(parse_single_calibration_vector(vector_match.as_str())?);
        }
    }

    if vectors.is_empty() {
        return Err(SarError::invalid("calibration_xml", "no calibration vectors found"));
    }

    let swath = extract_xml_value(xml_content, "swath").unwrap_or_else(|| "IW".to_string());
    let polarization = extract_xml_value(xml_content, "polarisation").unwrap_or_else(|| "VV".to_string());

    log::info!("Parsed {} calibration vectors for {}/{}", vectors.len(), swath, polarization);
    CalibrationCoefficients::new(vectors, swath, polarization)
}

/// Parse a single calibration vector body
fn parse_single_calibration_vector(vector_xml: &str) -> SarResult<CalibrationVector> {
    let field = |tag: &str| {
        extract_xml_value(vector_xml, tag)
            .ok_or_else(|| SarError::invalid("calibration_xml", format!("missing <{}>", tag)))
    };

    let azimuth_time = field("azimuthTime")?;
    let line = field("line")?
        .parse::<usize>()
        .map_err(|e| SarError::invalid("calibration_xml", format!("invalid line number: {}", e)))?;
    let pixels = parse_space_separated_numbers::<usize>(&field("pixel")?)?;
    let sigma_nought = parse_space_separated_numbers::<f32>(&field("sigmaNought")?)?;
    let beta_nought = parse_space_separated_numbers::<f32>(&field("betaNought")?)?;
    let gamma = parse_space_separated_numbers::<f32>(&field("gamma")?)?;

    if pixels.len() != sigma_nought.len() || pixels.len() != beta_nought.len() || pixels.len() != gamma.len() {
        return Err(SarError::invalid(
            "calibration_xml",
            "calibration vector arrays have mismatched lengths",
        ));
    }

    Ok(CalibrationVector {
        azimuth_time,
        line,
        pixels,
        sigma_nought,
        beta_nought,
        gamma,
    })
}

/// Parse space-separated numbers from a string
fn parse_space_separated_numbers<T>(input: &str) -> SarResult<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    input
        .split_whitespace()
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| SarError::invalid("calibration_xml", format!("parse error: {}", e)))
        })
        .collect()
}

/// Extract the text of the first `<tag>` element, with or without attributes
fn extract_xml_value(xml_content: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<{}(?:\s[^>]*)?>\s*([^<]*?)\s*</{}>", tag, tag);
    let re = Regex::new(&pattern).ok()?;
    re.captures(xml_content).map(|cap| cap[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SarComplex;
    use approx::assert_abs_diff_eq;

    fn test_vectors() -> CalibrationCoefficients {
        let vectors = (0..3)
            .map(|i| CalibrationVector {
                azimuth_time: format!("2020-01-01T00:00:{:02}", i),
                line: i * 10,
                pixels: vec![0, 10, 20],
                sigma_nought: vec![2.0 + i as f32, 4.0 + i as f32, 6.0 + i as f32],
                beta_nought: vec![1.0; 3],
                gamma: vec![3.0; 3],
            })
            .collect();
        CalibrationCoefficients::new(vectors, "IW1".to_string(), "VV".to_string()).unwrap()
    }

    #[test]
    fn test_constant_gain_calibration() {
        let raster = Raster::from_elem((3, 3), 10.0);
        let processor = CalibrationProcessor::new(CalibrationParams {
            kind: CalibrationType::Sigma0,
            lookup: CalibrationLookup::Constant(4.0),
        });

        let calibrated = processor.calibrate(&raster).unwrap();
        assert_eq!(calibrated.dim(), (3, 3));
        assert!(calibrated.data().iter().all(|&v| v == 25.0));
    }

    #[test]
    fn test_nodata_and_bad_gain_become_nodata() {
        let mut raster = Raster::from_elem((2, 2), 2.0);
        raster.set_nodata(0, 0);
        let mut gains = Array2::from_elem((2, 2), 2.0f32);
        gains[[1, 1]] = 0.0;

        let processor = CalibrationProcessor::new(CalibrationParams {
            kind: CalibrationType::Beta0,
            lookup: CalibrationLookup::PerPixel(gains),
        });
        let calibrated = processor.calibrate(&raster).unwrap();

        assert_eq!(calibrated.get(0, 0), None);
        assert_eq!(calibrated.get(0, 1), Some(2.0));
        assert_eq!(calibrated.get(1, 1), None);
    }

    #[test]
    fn test_per_pixel_gain_shape_checked() {
        let processor = CalibrationProcessor::new(CalibrationParams {
            kind: CalibrationType::Sigma0,
            lookup: CalibrationLookup::PerPixel(Array2::from_elem((2, 3), 1.0)),
        });
        let result = processor.calibrate(&Raster::from_elem((3, 3), 1.0));
        assert!(matches!(result, Err(SarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_vector_interpolation() {
        let coefficients = test_vectors();

        // Exact knot
        assert_abs_diff_eq!(coefficients.get_calibration_value(10, 10, CalibrationType::Sigma0).unwrap(), 5.0);
        // Halfway in pixel and line
        assert_abs_diff_eq!(
            coefficients.get_calibration_value(5, 5, CalibrationType::Sigma0).unwrap(),
            3.5,
            epsilon = 1e-6
        );
        // Clamped beyond the last line and pixel
        assert_abs_diff_eq!(coefficients.get_calibration_value(99, 99, CalibrationType::Sigma0).unwrap(), 8.0);
        assert_abs_diff_eq!(coefficients.get_calibration_value(7, 3, CalibrationType::Gamma0).unwrap(), 3.0);
    }

    #[test]
    fn test_vector_calibration_squares_lut_value() {
        let processor = CalibrationProcessor::new(CalibrationParams {
            kind: CalibrationType::Beta0,
            lookup: CalibrationLookup::Vectors(test_vectors()),
        });
        let calibrated = processor.calibrate(&Raster::from_elem((4, 4), 3.0)).unwrap();
        assert!(calibrated.data().iter().all(|&v| (v - 9.0).abs() < 1e-6));
    }

    #[test]
    fn test_slc_intensity() {
        let slc = Array2::from_elem((2, 2), SarComplex::new(3.0, 4.0));
        let intensity = CalibrationProcessor::intensity_from_slc(&slc);
        assert!(intensity.data().iter().all(|&v| v == 25.0));
    }

    #[test]
    fn test_db_conversion() {
        let mut linear_data = Raster::from_elem((3, 3), 100.0);
        linear_data.set_nodata(1, 1);
        let mut data = linear_data.data().clone();
        data[[0, 0]] = 0.0;
        let linear_data = Raster::with_mask(data, linear_data.validity_mask()).unwrap();

        let db_data = CalibrationProcessor::to_db(&linear_data).unwrap();
        assert_abs_diff_eq!(db_data.get(2, 2).unwrap(), 20.0, epsilon = 1e-6);
        assert_eq!(db_data.get(0, 0), None);
        assert_eq!(db_data.get(1, 1), None);
    }

    #[test]
    fn test_calibration_type_parsing() {
        assert_eq!("Sigma0".parse::<CalibrationType>().unwrap(), CalibrationType::Sigma0);
        assert_eq!("gamma0".parse::<CalibrationType>().unwrap(), CalibrationType::Gamma0);
        assert!(matches!(
            "dn".parse::<CalibrationType>(),
            Err(SarError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_calibration_vector_parsing() {
        let test_xml = r#"
        <calibration>
          <adsHeader><swath>IW2</swath><polarisation>VH</polarisation></adsHeader>
          <calibrationVectorList count="2">
            <calibrationVector>
                <azimuthTime>2020-01-03T17:08:15.674828</azimuthTime>
                <line>0</line>
                <pixel count="3">0 40 80</pixel>
                <sigmaNought count="3">3.339847e+02 3.339192e+02 3.338538e+02</sigmaNought>
                <betaNought count="3">2.370000e+02 2.370000e+02 2.370000e+02</betaNought>
                <gamma count="3">3.104379e+02 3.103564e+02 3.102749e+02</gamma>
                <dn count="3">2.370000e+02 2.370000e+02 2.370000e+02</dn>
            </calibrationVector>
            <calibrationVector>
                <azimuthTime>2020-01-03T17:08:16.674828</azimuthTime>
                <line>100</line>
                <pixel count="3">0 40 80</pixel>
                <sigmaNought count="3">3.3e+02 3.3e+02 3.3e+02</sigmaNought>
                <betaNought count="3">2.37e+02 2.37e+02 2.37e+02</betaNought>
                <gamma count="3">3.1e+02 3.1e+02 3.1e+02</gamma>
                <dn count="3">2.37e+02 2.37e+02 2.37e+02</dn>
            </calibrationVector>
          </calibrationVectorList>
        </calibration>
        "#;

        let coefficients = parse_calibration_from_xml(test_xml).unwrap();
        assert_eq!(coefficients.swath, "IW2");
        assert_eq!(coefficients.polarization, "VH");
        assert_eq!(coefficients.vectors.len(), 2);

        let vector = &coefficients.vectors[0];
        assert_eq!(vector.line, 0);
        assert_eq!(vector.pixels, vec![0, 40, 80]);
        assert!((vector.sigma_nought[0] - 333.9847).abs() < 1e-3);
    }

    #[test]
    fn test_xml_without_vectors_rejected() {
        let result = parse_calibration_from_xml("<calibration></calibration>");
        assert!(matches!(result, Err(SarError::InvalidParameter { .. })));
    }
}
