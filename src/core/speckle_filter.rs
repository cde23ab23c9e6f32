use crate::core::window::{local_statistics, map_pixels, LocalStats, WindowSpec};
use crate::types::{Raster, SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Standard errors of sample Cv above `Cu` still treated as pure speckle
const HOMOGENEITY_MARGIN: f64 = 6.0;

/// Speckle filtering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleFilterParams {
    /// Filter window size (odd, >= 3)
    pub window_size: usize,
    /// Number of looks of the input data
    pub num_looks: f32,
    /// Damping factor for the Frost kernel
    pub damping_factor: f32,
    /// Adaptive filter: Cv below this is smoothed. Defaults to Cu plus a margin
    /// for the spread of Cv estimated from a finite window.
    pub homogeneity_cv: Option<f32>,
    /// Adaptive filter: Cv above this is preserved. Defaults to sqrt(1 + 2/L).
    pub heterogeneity_cv: Option<f32>,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            window_size: 7,          // 7x7 window
            num_looks: 1.0,          // Single look
            damping_factor: 1.0,
            homogeneity_cv: None,
            heterogeneity_cv: None,
        }
    }
}

impl SpeckleFilterParams {
    /// Nominal speckle coefficient of variation for the configured looks
    pub fn noise_cv(&self) -> f64 {
        1.0 / (self.num_looks as f64).sqrt()
    }

    /// Adaptive heterogeneity threshold, sqrt(1 + 2/L) unless configured
    pub fn heterogeneity_threshold(&self) -> f64 {
        self.heterogeneity_cv
            .map(f64::from)
            .unwrap_or_else(|| (1.0 + 2.0 / self.num_looks as f64).sqrt())
    }

    /// Adaptive homogeneity threshold for a window of `count` valid samples.
    ///
    /// Unless configured, this is `Cu * (1 + 6 * se)` where
    /// `se = sqrt((1 + 1/L) / 2n)` is the relative standard error of Cv
    /// estimated from `n` samples of L-look Gamma speckle. It never exceeds
    /// the heterogeneity threshold.
    pub fn homogeneity_threshold(&self, count: usize) -> f64 {
        if let Some(cv) = self.homogeneity_cv {
            return cv as f64;
        }
        let looks = self.num_looks as f64;
        let standard_error = ((1.0 + 1.0 / looks) / (2.0 * count.max(1) as f64)).sqrt();
        (self.noise_cv() * (1.0 + HOMOGENEITY_MARGIN * standard_error)).min(self.heterogeneity_threshold())
    }

    /// Adaptive (homogeneity, heterogeneity) Cv thresholds for a window of `count` samples
    pub fn adaptive_thresholds(&self, count: usize) -> (f64, f64) {
        (self.homogeneity_threshold(count), self.heterogeneity_threshold())
    }

    pub fn validate(&self) -> SarResult<WindowSpec> {
        let window = WindowSpec::new(self.window_size)?;
        if !(self.num_looks.is_finite() && self.num_looks > 0.0) {
            return Err(SarError::invalid(
                "num_looks",
                format!("number of looks must be positive, got {}", self.num_looks),
            ));
        }
        if !(self.damping_factor.is_finite() && self.damping_factor >= 0.0) {
            return Err(SarError::invalid(
                "damping_factor",
                format!("damping factor must be non-negative, got {}", self.damping_factor),
            ));
        }
        let (low, high) = self.adaptive_thresholds(window.size().saturating_mul(window.size()));
        if !(low.is_finite() && high.is_finite()) || low < 0.0 || low > high {
            return Err(SarError::invalid(
                "adaptive_thresholds",
                format!("need 0 <= homogeneity <= heterogeneity, got {} and {}", low, high),
            ));
        }
        Ok(window)
    }
}

/// Available speckle filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeckleFilterType {
    /// Mean filter (simple averaging)
    Mean,
    /// Median filter (rank filter)
    Median,
    /// Lee filter
    Lee,
    /// Frost filter (exponential weighting)
    Frost,
    /// Kuan filter (MMSE for multiplicative noise)
    Kuan,
    /// Gamma MAP filter (Maximum A Posteriori)
    GammaMap,
    /// Per-pixel choice between smoothing, Lee and preservation
    Adaptive,
}

impl std::str::FromStr for SpeckleFilterType {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "mean" | "boxcar" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "lee" => Ok(Self::Lee),
            "frost" => Ok(Self::Frost),
            "kuan" => Ok(Self::Kuan),
            "gamma_map" | "gammamap" => Ok(Self::GammaMap),
            "adaptive" => Ok(Self::Adaptive),
            _ => Err(SarError::invalid("filter_type", format!("unknown speckle filter '{}'", s))),
        }
    }
}

/// Branch taken by the adaptive filter for one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveDecision {
    /// Homogeneous area: replace with the local mean
    Smooth,
    /// Textured area: Lee estimate
    Lee,
    /// Edge or point target: keep the original sample
    Preserve,
}

impl AdaptiveDecision {
    pub fn classify(cv: f64, homogeneity: f64, heterogeneity: f64) -> Self {
        if cv < homogeneity {
            AdaptiveDecision::Smooth
        } else if cv > heterogeneity {
            AdaptiveDecision::Preserve
        } else {
            AdaptiveDecision::Lee
        }
    }
}

/// Coefficient of variation, or `None` if the window is degenerate
/// (non-positive mean or zero variance).
fn usable_cv(stats: &LocalStats) -> Option<f64> {
    stats.cv().filter(|cv| *cv > 0.0 && cv.is_finite())
}

/// Lee estimate with weight k = 1 - Cu²/Cv², clamped to [0, 1]
pub fn lee_estimate(x: f64, stats: &LocalStats, cu: f64) -> f64 {
    match usable_cv(stats) {
        Some(cv) => {
            let k = ((cv * cv - cu * cu) / (cv * cv)).clamp(0.0, 1.0);
            stats.mean + k * (x - stats.mean)
        }
        None => stats.mean,
    }
}

/// Kuan estimate with weight k = (1 - Cu²/Cv²) / (1 + Cu²), clamped to [0, 1]
pub fn kuan_estimate(x: f64, stats: &LocalStats, cu: f64) -> f64 {
    match usable_cv(stats) {
        Some(cv) => {
            let k = ((1.0 - (cu * cu) / (cv * cv)) / (1.0 + cu * cu)).clamp(0.0, 1.0);
            stats.mean + k * (x - stats.mean)
        }
        None => stats.mean,
    }
}

/// Gamma MAP estimate for a Gamma-distributed scene observed with `looks` looks
pub fn gamma_map_estimate(x: f64, stats: &LocalStats, looks: f64) -> f64 {
    let cu = 1.0 / looks.sqrt();
    let cmax = std::f64::consts::SQRT_2 * cu;
    let mean = stats.mean;

    let cv = match usable_cv(stats) {
        Some(cv) => cv,
        None => return mean.max(0.0),
    };

    if cv <= cu {
        return mean.max(0.0);
    }
    if cv >= cmax {
        return x.max(0.0);
    }

    let alpha = (1.0 + cu * cu) / (cv * cv - cu * cu);
    let b = alpha - looks - 1.0;
    let disc = mean * mean * b * b + 4.0 * alpha * looks * mean * x;
    if disc < 0.0 {
        return mean.max(0.0);
    }

    ((b * mean + disc.sqrt()) / (2.0 * alpha)).max(0.0)
}

/// Speckle filter processor
#[derive(Debug, Clone)]
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    /// Filter with an explicit window, overriding the configured size
    pub fn apply(&self, image: &Raster, window: usize, filter_type: SpeckleFilterType) -> SarResult<Raster> {
        let mut params = self.params.clone();
        params.window_size = window;
        SpeckleFilter::with_params(params).apply_filter(image, filter_type)
    }

    /// Apply speckle filtering to a raster
    pub fn apply_filter(&self, image: &Raster, filter_type: SpeckleFilterType) -> SarResult<Raster> {
        log::info!("Applying {:?} speckle filter", filter_type);
        log::debug!("Filter parameters: {:?}", self.params);

        let window = self.params.validate()?;
        let (height, width) = image.dim();
        let degenerate = AtomicUsize::new(0);

        let samples = map_pixels(height, width, |i, j| {
            self.filter_pixel(image, i, j, window, filter_type, &degenerate)
        });

        let degenerate = degenerate.into_inner();
        if degenerate > 0 {
            log::debug!("{} windows fell back to the local mean", degenerate);
        }

        let filtered = Raster::from_samples((height, width), samples, image.metadata().clone())?;
        log::info!("Speckle filtering completed successfully");
        Ok(filtered)
    }

    fn filter_pixel(
        &self,
        image: &Raster,
        i: usize,
        j: usize,
        window: WindowSpec,
        filter_type: SpeckleFilterType,
        degenerate: &AtomicUsize,
    ) -> Option<f32> {
        let center_value = image.get(i, j)? as f64;
        let stats = local_statistics(image, i, j, window)?;

        if usable_cv(&stats).is_none() && filter_type != SpeckleFilterType::Median {
            degenerate.fetch_add(1, Ordering::Relaxed);
        }

        let cu = self.params.noise_cv();
        let value = match filter_type {
            SpeckleFilterType::Mean => stats.mean,
            SpeckleFilterType::Median => self.window_median(image, i, j, window)?,
            SpeckleFilterType::Lee => lee_estimate(center_value, &stats, cu),
            SpeckleFilterType::Kuan => kuan_estimate(center_value, &stats, cu),
            SpeckleFilterType::Frost => self.frost_estimate(image, i, j, window, &stats),
            SpeckleFilterType::GammaMap => {
                gamma_map_estimate(center_value, &stats, self.params.num_looks as f64)
            }
            SpeckleFilterType::Adaptive => {
                let (low, high) = self.params.adaptive_thresholds(stats.count);
                let decision = match usable_cv(&stats) {
                    Some(cv) => AdaptiveDecision::classify(cv, low, high),
                    None => AdaptiveDecision::Smooth,
                };
                match decision {
                    AdaptiveDecision::Smooth => stats.mean,
                    AdaptiveDecision::Lee => lee_estimate(center_value, &stats, cu),
                    AdaptiveDecision::Preserve => center_value,
                }
            }
        };

        Some(value as f32)
    }

    /// Exponentially weighted window mean; the kernel sharpens as Cv grows
    fn frost_estimate(&self, image: &Raster, i: usize, j: usize, window: WindowSpec, stats: &LocalStats) -> f64 {
        let cv = match usable_cv(stats) {
            Some(cv) => cv,
            None => return stats.mean,
        };
        let a = self.params.damping_factor as f64 * cv * cv;

        let (height, width) = image.dim();
        let (r0, r1, c0, c1) = window.bounds(i, j, height, width);
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;

        for ii in r0..r1 {
            for jj in c0..c1 {
                if let Some(pixel_val) = image.get(ii, jj) {
                    let di = ii as f64 - i as f64;
                    let dj = jj as f64 - j as f64;
                    let distance = (di * di + dj * dj).sqrt();
                    let weight = (-a * distance).exp();

                    weighted_sum += weight * pixel_val as f64;
                    weight_sum += weight;
                }
            }
        }

        if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            stats.mean
        }
    }

    fn window_median(&self, image: &Raster, i: usize, j: usize, window: WindowSpec) -> Option<f64> {
        let (height, width) = image.dim();
        let (r0, r1, c0, c1) = window.bounds(i, j, height, width);

        let mut values = Vec::with_capacity((r1 - r0) * (c1 - c0));
        for ii in r0..r1 {
            for jj in c0..c1 {
                if let Some(v) = image.get(ii, jj) {
                    values.push(v);
                }
            }
        }

        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        Some(values[values.len() / 2] as f64)
    }

    /// Estimate the equivalent number of looks (mean² / variance) over valid pixels
    pub fn estimate_number_of_looks(image: &Raster) -> SarResult<f32> {
        log::debug!("Estimating number of looks from image statistics");

        let values = image.valid_values();
        if values.is_empty() {
            return Err(SarError::EmptyInput("No valid pixels found".to_string()));
        }

        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;

        if variance <= 0.0 {
            return Err(SarError::NumericDegenerate(
                "zero variance, number of looks is unbounded".to_string(),
            ));
        }

        let num_looks = (mean * mean / variance) as f32;
        log::info!("Estimated number of looks: {:.2}", num_looks);
        Ok(num_looks.max(1.0))
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}
