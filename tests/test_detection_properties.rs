use ndarray::Array2;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Gamma, Uniform};
use ndarray_rand::RandomExt;
use sarchange::core::change_detection::{ChangeDetector, ChangeMethod};
use sarchange::core::postprocess::{Connectivity, PostProcessParams, PostProcessor};
use sarchange::core::threshold::{ThresholdMethod, ThresholdParams, ThresholdSelector};
use sarchange::{ChangeMask, Raster};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn speckled(rows: usize, cols: usize, seed: u64) -> Raster {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise: Array2<f32> = Array2::random_using((rows, cols), Gamma::new(3.0f32, 1.0 / 3.0).unwrap(), &mut rng);
    Raster::new(noise)
}

#[test]
fn test_log_ratio_swapping_inputs_negates() {
    init_logging();

    let before = speckled(32, 32, 1);
    let after = speckled(32, 32, 2);
    let detector = ChangeDetector::new(ChangeMethod::LogRatio);

    let forward = detector.detect(&before, &after).unwrap();
    let backward = detector.detect(&after, &before).unwrap();

    for ((f, b), (vf, vb)) in forward
        .data()
        .iter()
        .zip(backward.data().iter())
        .zip(forward.validity_mask().iter().zip(backward.validity_mask().iter()))
    {
        assert_eq!(vf, vb);
        approx::assert_abs_diff_eq!(*f, -*b, epsilon = 1e-5);
    }
}

#[test]
fn test_otsu_separates_bimodal_log_ratio() {
    init_logging();

    // Left half unchanged, right half brightened by 10 dB
    let before = speckled(40, 40, 3);
    let noise = speckled(40, 40, 4);
    let after = Raster::new(Array2::from_shape_fn((40, 40), |(r, c)| {
        let gain = if c >= 20 { 10.0 } else { 1.0 };
        noise.data()[[r, c]] * gain
    }));

    let magnitude = ChangeDetector::new(ChangeMethod::LogRatio).detect(&before, &after).unwrap();
    let threshold = ThresholdSelector::default()
        .select(&magnitude, ThresholdMethod::Otsu)
        .unwrap();

    // Class means sit near 0 and ln(10)
    let otsu = threshold.diagnostics.otsu.as_ref().unwrap();
    assert!(otsu.class_means.0 < 0.5, "{:?}", otsu);
    assert!(otsu.class_means.1 > 1.8, "{:?}", otsu);
    assert!(threshold.value > 0.3 && threshold.value < 2.0, "threshold {}", threshold.value);
}

#[test]
fn test_threshold_methods_are_ordered() {
    init_logging();

    let mut rng = StdRng::seed_from_u64(5);
    let values: Array2<f32> = Array2::random_using((50, 50), Uniform::new(0.0f32, 1.0), &mut rng);
    let raster = Raster::new(values);

    let p50 = ThresholdSelector::new(ThresholdParams {
        percentile: 50.0,
        ..Default::default()
    })
    .select(&raster, ThresholdMethod::Percentile)
    .unwrap();
    let p90 = ThresholdSelector::new(ThresholdParams {
        percentile: 90.0,
        ..Default::default()
    })
    .select(&raster, ThresholdMethod::Percentile)
    .unwrap();

    assert!(p50.value < p90.value);
    approx::assert_abs_diff_eq!(p50.value, 0.5, epsilon = 0.05);
    approx::assert_abs_diff_eq!(p90.value, 0.9, epsilon = 0.05);

    let (min, max) = raster.value_range().unwrap();
    let p0 = ThresholdSelector::new(ThresholdParams {
        percentile: 0.0,
        ..Default::default()
    })
    .select(&raster, ThresholdMethod::Percentile)
    .unwrap();
    let p100 = ThresholdSelector::new(ThresholdParams {
        percentile: 100.0,
        ..Default::default()
    })
    .select(&raster, ThresholdMethod::Percentile)
    .unwrap();
    assert_eq!(p0.value, min);
    assert_eq!(p100.value, max);
}

#[test]
fn test_postprocessing_is_idempotent_on_random_masks() {
    init_logging();

    for (seed, connectivity) in [(10, Connectivity::Four), (11, Connectivity::Eight)] {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Array2<f32> = Array2::random_using((30, 30), Uniform::new(0.0f32, 1.0), &mut rng);
        let mask = ChangeMask::new(values.mapv(|v| v > 0.55), Default::default());

        for structuring_element in [1, 3] {
            let processor = PostProcessor::new(PostProcessParams {
                structuring_element,
                min_area: 6,
                connectivity,
                ..Default::default()
            });
            let once = processor.filter_mask(&mask).unwrap();
            let twice = processor.filter_mask(&once).unwrap();
            assert_eq!(once, twice, "seed {} element {}", seed, structuring_element);
        }
    }
}
