//! Full evaluation runs over small synthetic test sets.

use approx::assert_relative_eq;
use evaluator::{
    run_classes, Dataset, EvalConfig, EvalError, InMemoryDataset, InputModality, Label,
    PixelReconstruction, PreprocessedDataset, ReconstructionMethod, Reconstructor, Runner,
    Sample, ScoringOptions,
};
use ndarray::{Array4, ArrayView4};
use tempfile::TempDir;
use test_helpers::{write_class_dir, SyntheticSample};

const SIZE: usize = 32;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Replaces every channel plane with its median, which recovers the clean
/// background whenever a defect covers less than half of the plane.
struct MedianBackground;

impl Reconstructor for MedianBackground {
    fn reconstruct(&self, images: &ArrayView4<f64>) -> evaluator::Result<Array4<f64>> {
        let mut out = Array4::zeros(images.raw_dim());
        for (mut out_img, img) in out.outer_iter_mut().zip(images.outer_iter()) {
            for (mut out_plane, plane) in out_img.outer_iter_mut().zip(img.outer_iter()) {
                let mut values: Vec<f64> = plane.iter().copied().collect();
                values.sort_by(f64::total_cmp);
                out_plane.fill(values[values.len() / 2]);
            }
        }
        Ok(out)
    }
}

fn to_sample(s: SyntheticSample) -> Sample {
    let label = if s.is_anomalous() {
        Label::Anomalous
    } else {
        Label::Normal
    };
    Sample::new(s.views, s.normal_map, s.mask, label).unwrap()
}

fn synthetic_set() -> Vec<SyntheticSample> {
    vec![
        SyntheticSample::normal(SIZE),
        SyntheticSample::with_defect(SIZE, 10..18, 10..18),
        SyntheticSample::normal(SIZE),
        SyntheticSample::with_defect(SIZE, 4..9, 20..28),
    ]
}

fn options() -> ScoringOptions {
    ScoringOptions {
        blur_sigma: Some(1.0),
        ..ScoringOptions::new(SIZE)
    }
}

fn method(options: ScoringOptions) -> Box<dyn ReconstructionMethod> {
    Box::new(
        PixelReconstruction::new("rec", MedianBackground, InputModality::Lightings, options)
            .unwrap(),
    )
}

#[test]
fn test_four_sample_run_separates_perfectly() {
    init_logging();
    let out = TempDir::new().unwrap();
    let dataset = InMemoryDataset::new(synthetic_set().into_iter().map(to_sample).collect());

    let mut runner = Runner::new(out.path(), "CandyCane", method(options())).unwrap();
    let report = runner.evaluate(&dataset).unwrap();

    assert_eq!(report.samples, 4);
    assert_eq!(report.method, "rec");
    assert_relative_eq!(report.metrics.image_rocauc, 1.0);
    assert_relative_eq!(report.metrics.pixel_rocauc, 1.0);
    assert_relative_eq!(report.metrics.au_pro, 1.0, epsilon = 1e-9);
    assert!(report.rec_loss > 0.0);

    let calc = runner.method().calculator();
    assert_eq!(calc.image_labels().len(), 4);
    assert_eq!(calc.image_scores()[0], 0.0);
    assert!(calc.image_scores()[1] > 0.0);

    let log = std::fs::read_to_string(out.path().join("CandyCane/class_score.txt")).unwrap();
    assert!(log.starts_with("Class: CandyCane rec, Image ROCAUC: 1.000"));
}

#[test]
fn test_single_class_run_fails() {
    init_logging();
    let out = TempDir::new().unwrap();
    let dataset = InMemoryDataset::new(vec![
        to_sample(SyntheticSample::normal(SIZE)),
        to_sample(SyntheticSample::normal(SIZE)),
    ]);

    let mut runner = Runner::new(out.path(), "Confetto", method(options())).unwrap();
    assert!(matches!(
        runner.evaluate(&dataset),
        Err(EvalError::SingleClass { level: "image", .. })
    ));
    assert!(!out.path().join("Confetto/class_score.txt").exists());
}

#[test]
fn test_run_classes_from_disk() {
    init_logging();
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_class_dir(data.path(), "CandyCane", &synthetic_set()).unwrap();

    let config = EvalConfig {
        data_path: data.path().to_path_buf(),
        classes: vec!["CandyCane".into()],
        image_size: SIZE,
        blur_sigma: Some(1.0),
        export_heatmaps: true,
        ..EvalConfig::default()
    };

    let summary = run_classes(
        &config,
        out.path(),
        |class| {
            let ds = PreprocessedDataset::open(&config.data_path, class, SIZE as u32)?;
            Ok(Box::new(ds) as Box<dyn Dataset>)
        },
        |_, options| Ok(method(options)),
    )
    .unwrap();

    assert_eq!(summary.reports.len(), 1);
    let metrics = summary.reports[0].metrics;
    assert_relative_eq!(metrics.image_rocauc, 1.0);
    assert!(metrics.pixel_rocauc > 0.95);

    let class_dir = out.path().join("CandyCane");
    assert!(class_dir.join("class_score.txt").is_file());
    assert!(class_dir.join("reconstruct/000.png").is_file());
    assert!(!class_dir.join("reconstruct/001.png").exists());
    assert!(class_dir.join("reconstruct/002.png").is_file());
    assert!(class_dir.join("heatmaps/003_map.png").is_file());

    let results = std::fs::read_to_string(out.path().join("results.txt")).unwrap();
    assert!(results.contains("Image ROCAUC Results"));
    assert!(results.contains("| Method | Candycane | Mean |"));
}
