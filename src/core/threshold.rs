use crate::types::{Raster, SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Threshold selection methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Maximise between-class variance over histogram bin edges
    Otsu,
    /// mean + k * std
    Mean,
    /// Value at a percentile of the valid distribution
    Percentile,
    /// User-supplied value checked against the data range
    Manual,
}

impl std::str::FromStr for ThresholdMethod {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "otsu" => Ok(ThresholdMethod::Otsu),
            "mean" | "mean_std" => Ok(ThresholdMethod::Mean),
            "percentile" => Ok(ThresholdMethod::Percentile),
            "manual" => Ok(ThresholdMethod::Manual),
            _ => Err(SarError::invalid(
                "threshold_method",
                format!("unknown threshold method '{}'", s),
            )),
        }
    }
}

/// Threshold selection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdParams {
    /// Histogram bins for Otsu
    pub bins: usize,
    /// Standard deviation multiplier for the mean method
    pub k: f32,
    /// Percentile in [0, 100]
    pub percentile: f32,
    /// Value for the manual method
    pub manual_value: Option<f32>,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            bins: 256,
            k: 1.0,
            percentile: 95.0,
            manual_value: None,
        }
    }
}

/// Equal-width histogram of valid magnitudes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub bin_width: f64,
    pub counts: Vec<u64>,
    /// Sum of the samples falling in each bin
    pub sums: Vec<f64>,
}

impl Histogram {
    pub fn build(values: &[f64], bins: usize, min: f64, max: f64) -> Self {
        let bin_width = (max - min) / bins as f64;
        let mut counts = vec![0u64; bins];
        let mut sums = vec![0.0f64; bins];

        for &v in values {
            let idx = if bin_width > 0.0 {
                (((v - min) / bin_width).floor() as usize).min(bins - 1)
            } else {
                0
            };
            counts[idx] += 1;
            sums[idx] += v;
        }

        Self { min, max, bin_width, counts, sums }
    }

    /// Lower edge of bin `k`
    pub fn edge(&self, k: usize) -> f64 {
        self.min + k as f64 * self.bin_width
    }
}

/// Class statistics at the selected Otsu split
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtsuStats {
    /// First bin of the upper class
    pub split_bin: usize,
    pub between_class_variance: f64,
    pub class_weights: (f64, f64),
    pub class_means: (f64, f64),
}

/// Statistics recorded for downstream diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdDiagnostics {
    pub valid_count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub histogram: Option<Histogram>,
    pub otsu: Option<OtsuStats>,
}

/// Selected threshold with provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    pub value: f32,
    pub method: ThresholdMethod,
    pub diagnostics: ThresholdDiagnostics,
}

/// Reduces a change magnitude raster to a single cut value
#[derive(Debug, Clone, Default)]
pub struct ThresholdSelector {
    params: ThresholdParams,
}

impl ThresholdSelector {
    pub fn new(params: ThresholdParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ThresholdParams {
        &self.params
    }

    pub fn select(&self, magnitude: &Raster, method: ThresholdMethod) -> SarResult<Threshold> {
        log::info!("Selecting threshold with {:?}", method);

        let mut values: Vec<f64> = magnitude.iter_valid().map(|v| v as f64).collect();
        if values.is_empty() {
            return Err(SarError::EmptyInput(
                "no valid pixels in change magnitude".to_string(),
            ));
        }

        let n = values.len() as f64;
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        let mut diagnostics = ThresholdDiagnostics {
            valid_count: values.len(),
            min,
            max,
            mean,
            std,
            histogram: None,
            otsu: None,
        };

        let value = match method {
            ThresholdMethod::Otsu => {
                let (t, histogram, otsu) = self.otsu(&values, min, max)?;
                diagnostics.histogram = Some(histogram);
                diagnostics.otsu = otsu;
                t
            }
            ThresholdMethod::Mean => {
                if !self.params.k.is_finite() {
                    return Err(SarError::invalid("k", "std multiplier must be finite"));
                }
                mean + self.params.k as f64 * std
            }
            ThresholdMethod::Percentile => {
                values.sort_by(|a, b| a.total_cmp(b));
                percentile_of_sorted(&values, self.params.percentile)?
            }
            ThresholdMethod::Manual => {
                let value = self.params.manual_value.ok_or_else(|| {
                    SarError::invalid("manual_value", "manual threshold requires a value")
                })?;
                let v = value as f64;
                if !v.is_finite() || v < min || v > max {
                    return Err(SarError::OutOfRange {
                        value,
                        min: min as f32,
                        max: max as f32,
                    });
                }
                v
            }
        };

        log::info!(
            "Threshold {:.4} over {} valid pixels (range {:.4} to {:.4})",
            value, diagnostics.valid_count, min, max
        );

        Ok(Threshold {
            value: value as f32,
            method,
            diagnostics,
        })
    }

    fn otsu(&self, values: &[f64], min: f64, max: f64) -> SarResult<(f64, Histogram, Option<OtsuStats>)> {
        let bins = self.params.bins;
        if bins < 2 {
            return Err(SarError::invalid(
                "bins",
                format!("Otsu needs at least 2 histogram bins, got {}", bins),
            ));
        }

        let histogram = Histogram::build(values, bins, min, max);
        if histogram.bin_width <= 0.0 {
            log::warn!("Constant change magnitude, Otsu threshold falls back to {:.4}", min);
            return Ok((min, histogram, None));
        }

        let total = values.len() as f64;
        let total_sum: f64 = histogram.sums.iter().sum();

        let mut best: Option<OtsuStats> = None;
        let mut count0 = 0.0f64;
        let mut sum0 = 0.0f64;

        for k in 1..bins {
            count0 += histogram.counts[k - 1] as f64;
            sum0 += histogram.sums[k - 1];
            let count1 = total - count0;
            if count0 == 0.0 || count1 == 0.0 {
                continue;
            }

            let w0 = count0 / total;
            let w1 = count1 / total;
            let mu0 = sum0 / count0;
            let mu1 = (total_sum - sum0) / count1;
            let between = w0 * w1 * (mu0 - mu1).powi(2);

            // Strict comparison keeps the lowest bin on ties
            if best.as_ref().map_or(true, |b| between > b.between_class_variance) {
                best = Some(OtsuStats {
                    split_bin: k,
                    between_class_variance: between,
                    class_weights: (w0, w1),
                    class_means: (mu0, mu1),
                });
            }
        }

        match best {
            Some(stats) => {
                log::debug!(
                    "Otsu split at bin {} (class means {:.4} / {:.4})",
                    stats.split_bin, stats.class_means.0, stats.class_means.1
                );
                Ok((histogram.edge(stats.split_bin), histogram, Some(stats)))
            }
            None => Err(SarError::NumericDegenerate(
                "no histogram split separates the data".to_string(),
            )),
        }
    }
}

/// Linearly interpolated percentile of ascending values
fn percentile_of_sorted(sorted: &[f64], percentile: f32) -> SarResult<f64> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(SarError::invalid(
            "percentile",
            format!("percentile must be within [0, 100], got {}", percentile),
        ));
    }
    if sorted.is_empty() {
        return Err(SarError::EmptyInput("no values for percentile".to_string()));
    }

    let rank = percentile as f64 / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn raster_of(values: Vec<f32>) -> Raster {
        let n = values.len();
        Raster::new(Array2::from_shape_vec((1, n), values).unwrap())
    }

    #[test]
    fn test_otsu_two_levels() {
        let mut values = vec![0.0f32; 12];
        values.extend(vec![5f32.ln(); 4]);
        let threshold = ThresholdSelector::default()
            .select(&raster_of(values), ThresholdMethod::Otsu)
            .unwrap();

        // Lowest separating edge wins the tie
        let width = 5f64.ln() / 256.0;
        assert_abs_diff_eq!(threshold.value as f64, width, epsilon = 1e-6);
        let otsu = threshold.diagnostics.otsu.unwrap();
        assert_eq!(otsu.split_bin, 1);
        assert_abs_diff_eq!(otsu.class_weights.0, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_otsu_bimodal_recovers_valley() {
        // Two symmetric Gaussian-shaped clusters at 2 and 6, sampled on a fine grid
        let mut values = Vec::new();
        for i in 0..800 {
            let x = 0.005 + i as f64 * 0.01;
            let density = (-(x - 2.0).powi(2) / 0.72).exp() + (-(x - 6.0).powi(2) / 0.72).exp();
            let count = (200.0 * density).round() as usize;
            values.extend(std::iter::repeat(x as f32).take(count));
        }

        let threshold = ThresholdSelector::default()
            .select(&raster_of(values), ThresholdMethod::Otsu)
            .unwrap();
        let width = threshold.diagnostics.histogram.as_ref().unwrap().bin_width;

        assert!(((threshold.value as f64) - 4.0).abs() <= width, "threshold {}", threshold.value);
    }

    #[test]
    fn test_otsu_constant_data() {
        let threshold = ThresholdSelector::default()
            .select(&raster_of(vec![3.0; 5]), ThresholdMethod::Otsu)
            .unwrap();
        assert_eq!(threshold.value, 3.0);
        assert!(threshold.diagnostics.otsu.is_none());
    }

    #[test]
    fn test_otsu_rejects_single_bin() {
        let selector = ThresholdSelector::new(ThresholdParams {
            bins: 1,
            ..Default::default()
        });
        let result = selector.select(&raster_of(vec![1.0, 2.0]), ThresholdMethod::Otsu);
        assert!(matches!(result, Err(SarError::InvalidParameter { .. })));
    }

    #[test]
    fn test_mean_std() {
        let selector = ThresholdSelector::new(ThresholdParams {
            k: 2.0,
            ..Default::default()
        });
        // mean 5, population std 2
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let threshold = selector.select(&raster_of(values), ThresholdMethod::Mean).unwrap();
        assert_abs_diff_eq!(threshold.value, 9.0, epsilon = 1e-6);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f32> = (0..=10).map(|v| v as f32).collect();
        let selector = ThresholdSelector::new(ThresholdParams {
            percentile: 95.0,
            ..Default::default()
        });
        let threshold = selector.select(&raster_of(values), ThresholdMethod::Percentile).unwrap();
        assert_abs_diff_eq!(threshold.value, 9.5, epsilon = 1e-6);

        let bad = ThresholdSelector::new(ThresholdParams {
            percentile: 101.0,
            ..Default::default()
        });
        assert!(matches!(
            bad.select(&raster_of(vec![1.0]), ThresholdMethod::Percentile),
            Err(SarError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_manual_range_check() {
        let raster = raster_of(vec![1.0, 2.0, 3.0]);

        let ok = ThresholdSelector::new(ThresholdParams {
            manual_value: Some(2.5),
            ..Default::default()
        });
        assert_eq!(ok.select(&raster, ThresholdMethod::Manual).unwrap().value, 2.5);

        let out = ThresholdSelector::new(ThresholdParams {
            manual_value: Some(4.0),
            ..Default::default()
        });
        assert!(matches!(
            out.select(&raster, ThresholdMethod::Manual),
            Err(SarError::OutOfRange { .. })
        ));

        let missing = ThresholdSelector::default();
        assert!(matches!(
            missing.select(&raster, ThresholdMethod::Manual),
            Err(SarError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_empty_input() {
        let mut raster = raster_of(vec![1.0, 2.0]);
        raster.set_nodata(0, 0);
        raster.set_nodata(0, 1);

        for method in [
            ThresholdMethod::Otsu,
            ThresholdMethod::Mean,
            ThresholdMethod::Percentile,
            ThresholdMethod::Manual,
        ] {
            assert!(matches!(
                ThresholdSelector::default().select(&raster, method),
                Err(SarError::EmptyInput(_))
            ));
        }
    }

    #[test]
    fn test_nodata_ignored() {
        let mut raster = raster_of(vec![1.0, 100.0, 3.0]);
        raster.set_nodata(0, 1);
        let threshold = ThresholdSelector::default().select(&raster, ThresholdMethod::Mean).unwrap();
        assert_abs_diff_eq!(threshold.value, 3.0, epsilon = 1e-6); // mean 2 + std 1
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("OTSU".parse::<ThresholdMethod>().unwrap(), ThresholdMethod::Otsu);
        assert!(matches!(
            "kittler".parse::<ThresholdMethod>(),
            Err(SarError::InvalidParameter { .. })
        ));
    }
}
