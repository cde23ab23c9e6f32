//! Change mask post-processing: binarization, morphological cleanup and
//! minimum-area filtering of connected components.

use crate::core::window::map_pixels;
use crate::types::{ChangeMask, Raster, SarError, SarResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Pixel adjacency used for connected components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Connectivity {
    Four,
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        const FOUR: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const EIGHT: [(isize, isize); 8] = [
            (-1, -1), (-1, 0), (-1, 1),
            (0, -1), (0, 1),
            (1, -1), (1, 0), (1, 1),
        ];
        match self {
            Connectivity::Four => &FOUR,
            Connectivity::Eight => &EIGHT,
        }
    }
}

impl TryFrom<u8> for Connectivity {
    type Error = SarError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Connectivity::Four),
            8 => Ok(Connectivity::Eight),
            _ => Err(SarError::invalid(
                "connectivity",
                format!("connectivity must be 4 or 8, got {}", value),
            )),
        }
    }
}

impl From<Connectivity> for u8 {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => 4,
            Connectivity::Eight => 8,
        }
    }
}

/// Which side of the threshold counts as changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// magnitude >= threshold
    Above,
    /// magnitude <= threshold
    Below,
}

impl std::str::FromStr for ThresholdDirection {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(ThresholdDirection::Above),
            "below" => Ok(ThresholdDirection::Below),
            _ => Err(SarError::invalid(
                "threshold_direction",
                format!("expected 'above' or 'below', got '{}'", s),
            )),
        }
    }
}

/// Post-processing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessParams {
    pub direction: ThresholdDirection,
    /// Side of the square structuring element; 1 disables opening/closing
    pub structuring_element: usize,
    /// Run a closing after the opening
    pub apply_closing: bool,
    /// Components smaller than this are removed
    pub min_area: usize,
    pub connectivity: Connectivity,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            direction: ThresholdDirection::Above,
            structuring_element: 1,
            apply_closing: false,
            min_area: 1,
            connectivity: Connectivity::Eight,
        }
    }
}

impl PostProcessParams {
    pub fn validate(&self) -> SarResult<()> {
        if self.structuring_element == 0 || self.structuring_element % 2 == 0 {
            return Err(SarError::invalid(
                "structuring_element",
                format!("size must be odd and >= 1, got {}", self.structuring_element),
            ));
        }
        Ok(())
    }
}

/// Labelled connected components of a mask
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentLabels {
    /// 0 for background, otherwise 1-based component id
    pub labels: Array2<u32>,
    /// Pixel count of component `id` at index `id - 1`
    pub sizes: Vec<usize>,
}

impl ComponentLabels {
    pub fn count(&self) -> usize {
        self.sizes.len()
    }
}

/// Threshold a magnitude raster; no-data pixels are never changed
pub fn binarize(magnitude: &Raster, threshold: f32, direction: ThresholdDirection) -> SarResult<Array2<bool>> {
    let (rows, cols) = magnitude.dim();
    let flags = map_pixels(rows, cols, |i, j| match magnitude.get(i, j) {
        Some(v) => match direction {
            ThresholdDirection::Above => v >= threshold,
            ThresholdDirection::Below => v <= threshold,
        },
        None => false,
    });
    mask_from_flags((rows, cols), flags)
}

fn mask_from_flags(shape: (usize, usize), flags: Vec<bool>) -> SarResult<Array2<bool>> {
    Array2::from_shape_vec(shape, flags).map_err(|e| SarError::Processing(format!("Shape error: {}", e)))
}

/// Square-window reduction over in-bounds neighbours only
fn square_reduce(mask: &Array2<bool>, size: usize, all: bool) -> SarResult<Array2<bool>> {
    let (rows, cols) = mask.dim();
    let half = size / 2;
    let flags = map_pixels(rows, cols, |i, j| {
        let r0 = i.saturating_sub(half);
        let r1 = i.saturating_add(half + 1).min(rows);
        let c0 = j.saturating_sub(half);
        let c1 = j.saturating_add(half + 1).min(cols);

        let mut hits = (r0..r1).flat_map(|r| (c0..c1).map(move |c| (r, c)));
        if all {
            hits.all(|(r, c)| mask[[r, c]])
        } else {
            hits.any(|(r, c)| mask[[r, c]])
        }
    });
    mask_from_flags((rows, cols), flags)
}

/// Binary erosion with a `size x size` square
pub fn erode(mask: &Array2<bool>, size: usize) -> SarResult<Array2<bool>> {
    if size <= 1 {
        return Ok(mask.clone());
    }
    square_reduce(mask, size, true)
}

/// Binary dilation with a `size x size` square
pub fn dilate(mask: &Array2<bool>, size: usize) -> SarResult<Array2<bool>> {
    if size <= 1 {
        return Ok(mask.clone());
    }
    square_reduce(mask, size, false)
}

/// Erosion followed by dilation; removes features smaller than the element
pub fn opening(mask: &Array2<bool>, size: usize) -> SarResult<Array2<bool>> {
    dilate(&erode(mask, size)?, size)
}

/// Dilation followed by erosion; fills gaps smaller than the element
pub fn closing(mask: &Array2<bool>, size: usize) -> SarResult<Array2<bool>> {
    erode(&dilate(mask, size)?, size)
}

/// Label connected `true` regions
pub fn label_components(mask: &Array2<bool>, connectivity: Connectivity) -> ComponentLabels {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut sizes = Vec::new();
    let mut stack = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }

            let label = sizes.len() as u32 + 1;
            let mut size = 0usize;
            labels[[r, c]] = label;
            stack.push((r, c));

            while let Some((cr, cc)) = stack.pop() {
                size += 1;
                for &(dr, dc) in connectivity.offsets() {
                    let nr = cr as isize + dr;
                    let nc = cc as isize + dc;
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = label;
                        stack.push((nr, nc));
                    }
                }
            }

            sizes.push(size);
        }
    }

    ComponentLabels { labels, sizes }
}

/// Drop components with fewer than `min_area` pixels
pub fn remove_small_components(mask: &Array2<bool>, min_area: usize, connectivity: Connectivity) -> Array2<bool> {
    if min_area <= 1 {
        return mask.clone();
    }

    let components = label_components(mask, connectivity);
    let removed = components.sizes.iter().filter(|&&s| s < min_area).count();
    log::debug!(
        "Removing {} of {} components below {} pixels",
        removed,
        components.count(),
        min_area
    );

    components
        .labels
        .mapv(|label| label != 0 && components.sizes[label as usize - 1] >= min_area)
}

/// Turns a change magnitude into a cleaned change mask
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    params: PostProcessParams,
}

impl PostProcessor {
    pub fn new(params: PostProcessParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PostProcessParams {
        &self.params
    }

    /// Binarize `magnitude` at `threshold`, then clean the mask
    pub fn postprocess(&self, magnitude: &Raster, threshold: f32) -> SarResult<ChangeMask> {
        self.params.validate()?;
        if !threshold.is_finite() {
            return Err(SarError::invalid("threshold", "threshold must be finite"));
        }

        log::info!(
            "Post-processing {}x{} magnitude at threshold {:.4} ({:?})",
            magnitude.rows(),
            magnitude.cols(),
            threshold,
            self.params.direction
        );

        let binary = binarize(magnitude, threshold, self.params.direction)?;
        let mask = self.clean(binary)?;
        Ok(ChangeMask::new(mask, magnitude.metadata().clone()))
    }

    /// Re-run morphology and area filtering on an existing mask
    pub fn filter_mask(&self, mask: &ChangeMask) -> SarResult<ChangeMask> {
        self.params.validate()?;
        let cleaned = self.clean(mask.data().clone())?;
        Ok(ChangeMask::new(cleaned, mask.metadata().clone()))
    }

    fn clean(&self, binary: Array2<bool>) -> SarResult<Array2<bool>> {
        let initial = binary.iter().filter(|&&x| x).count();
        let se = self.params.structuring_element;

        let mut mask = opening(&binary, se)?;
        if self.params.apply_closing {
            mask = closing(&mask, se)?;
        }
        let mask = remove_small_components(&mask, self.params.min_area, self.params.connectivity);

        log::info!(
            "Change pixels: {} after thresholding, {} after cleanup",
            initial,
            mask.iter().filter(|&&x| x).count()
        );
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn mask_from(rows: &[&str]) -> Array2<bool> {
        let cols = rows[0].len();
        Array2::from_shape_fn((rows.len(), cols), |(r, c)| rows[r].as_bytes()[c] == b'#')
    }

    #[test]
    fn test_binarize_directions_and_nodata() {
        let mut magnitude = Raster::new(array![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]);
        magnitude.set_nodata(1, 2);

        let above = binarize(&magnitude, 2.0, ThresholdDirection::Above).unwrap();
        assert_eq!(above, array![[false, false, true], [true, true, false]]);

        let below = binarize(&magnitude, 2.0, ThresholdDirection::Below).unwrap();
        assert_eq!(below, array![[true, true, true], [false, false, false]]);
    }

    #[test]
    fn test_opening_removes_specks_keeps_blocks() {
        let mask = mask_from(&[
            "#.....",
            "...###",
            "...###",
            "...###",
        ]);
        let opened = opening(&mask, 3).unwrap();
        assert!(!opened[[0, 0]]);
        assert_eq!(opened.iter().filter(|&&x| x).count(), 9);
    }

    #[test]
    fn test_erosion_ignores_out_of_bounds() {
        let mask = Array2::from_elem((3, 3), true);
        assert_eq!(erode(&mask, 3).unwrap(), mask);
        assert_eq!(dilate(&mask, 5).unwrap(), mask);
    }

    #[test]
    fn test_closing_fills_hole() {
        let mask = mask_from(&[
            "###",
            "#.#",
            "###",
        ]);
        assert!(closing(&mask, 3).unwrap().iter().all(|&x| x));
    }

    #[test]
    fn test_morphology_on_empty_and_oversized_element() {
        let empty = Array2::<bool>::from_elem((0, 4), false);
        assert_eq!(opening(&empty, 3).unwrap().dim(), (0, 4));
        assert_eq!(binarize(&Raster::new(Array2::zeros((0, 4))), 0.5, ThresholdDirection::Above).unwrap().dim(), (0, 4));

        // Element far larger than the mask: erosion sees only in-bounds pixels
        let block = Array2::from_elem((2, 3), true);
        assert_eq!(erode(&block, usize::MAX).unwrap(), block);
        let speck = mask_from(&["...", ".#.", "..."]);
        assert!(dilate(&speck, 101).unwrap().iter().all(|&x| x));
    }

    #[test]
    fn test_label_components_connectivity() {
        let mask = mask_from(&[
            "#..",
            ".#.",
            "..#",
        ]);
        let four = label_components(&mask, Connectivity::Four);
        assert_eq!(four.count(), 3);
        assert_eq!(four.sizes, vec![1, 1, 1]);

        let eight = label_components(&mask, Connectivity::Eight);
        assert_eq!(eight.count(), 1);
        assert_eq!(eight.sizes, vec![3]);
        assert_eq!(eight.labels[[2, 2]], 1);
    }

    #[test]
    fn test_min_area_removes_small_region() {
        let magnitude = Raster::new(array![
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
        ]);
        let processor = PostProcessor::new(PostProcessParams {
            min_area: 5,
            ..Default::default()
        });
        let mask = processor.postprocess(&magnitude, 0.5).unwrap();
        assert_eq!(mask.changed_count(), 0);

        let processor = PostProcessor::new(PostProcessParams {
            min_area: 3,
            ..Default::default()
        });
        assert_eq!(processor.postprocess(&magnitude, 0.5).unwrap().changed_count(), 3);
    }

    #[test]
    fn test_postprocess_idempotent() {
        let mask = mask_from(&[
            "##....#..",
            "##..####.",
            "....####.",
            "#...####.",
            "..#......",
            ".###...##",
        ]);
        let processor = PostProcessor::new(PostProcessParams {
            structuring_element: 3,
            min_area: 4,
            connectivity: Connectivity::Four,
            ..Default::default()
        });

        let once = processor
            .filter_mask(&ChangeMask::new(mask, Default::default()))
            .unwrap();
        let twice = processor.filter_mask(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_structuring_element() {
        let processor = PostProcessor::new(PostProcessParams {
            structuring_element: 4,
            ..Default::default()
        });
        let result = processor.postprocess(&Raster::from_elem((2, 2), 1.0), 0.5);
        assert!(matches!(result, Err(SarError::InvalidParameter { .. })));
    }

    #[test]
    fn test_connectivity_serde() {
        let c: Connectivity = serde_json::from_str("4").unwrap();
        assert_eq!(c, Connectivity::Four);
        assert_eq!(serde_json::to_string(&Connectivity::Eight).unwrap(), "8");
        assert!(serde_json::from_str::<Connectivity>("6").is_err());
        assert!(Connectivity::try_from(6u8).is_err());
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("Below".parse::<ThresholdDirection>().unwrap(), ThresholdDirection::Below);
        assert!("sideways".parse::<ThresholdDirection>().is_err());
    }
}
