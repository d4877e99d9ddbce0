//! Test-set access for the evaluation runner.
//!
//! Preprocessed datasets share one on-disk layout per class:
//!
//! ```text
//! <root>/<class>/test_public/data/
//!     000_image_0.png .. 000_image_5.png   six lighting views per sample
//!     000_normals.png                      surface normal map
//!     00_mask.png                          ground-truth defect mask
//! ```
//!
//! Files are matched by glob pattern and sorted by name, so views group into
//! consecutive sixes and sample `i` pairs with mask `{i:02}_mask.png`.

use crate::error::{EvalError, Result};
use crate::sample::{Label, Sample, NUM_VIEWS};
use imaging::{load_mask, load_rgb};
use ndarray::{stack, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use glob::{glob, Pattern};
use std::path::{Path, PathBuf};

/// Ordered, indexable collection of test samples.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample>;
}

/// Samples already held in memory, mostly for tests and synthetic runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.samples.get(index).cloned().ok_or_else(|| {
            EvalError::Dataset(format!(
                "index {index} out of range for {} samples",
                self.samples.len()
            ))
        })
    }
}

/// Benchmarks whose preprocessed test split this crate can read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    #[default]
    Eyecandies,
    Mvtec3d,
}

impl DatasetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Eyecandies => "eyecandies",
            DatasetKind::Mvtec3d => "mvtec3d",
        }
    }

    /// Every object class of the benchmark.
    pub fn classes(self) -> &'static [&'static str] {
        match self {
            DatasetKind::Eyecandies => &[
                "CandyCane",
                "ChocolateCookie",
                "ChocolatePraline",
                "Confetto",
                "GummyBear",
                "HazelnutTruffle",
                "LicoriceSandwich",
                "Lollipop",
                "Marshmallow",
                "PeppermintCandy",
            ],
            DatasetKind::Mvtec3d => &[
                "bagel",
                "cable_gland",
                "carrot",
                "cookie",
                "dowel",
                "foam",
                "peach",
                "potato",
                "rope",
                "tire",
            ],
        }
    }
}

#[derive(Debug, Clone)]
struct SamplePaths {
    views: Vec<PathBuf>,
    normals: PathBuf,
    mask: PathBuf,
}

/// Test split of one class in the preprocessed layout, loaded lazily from disk.
///
/// Every supported benchmark is converted to this layout beforehand, so the
/// same loader serves each [`DatasetKind`].
#[derive(Debug, Clone)]
pub struct PreprocessedDataset {
    class: String,
    image_size: u32,
    samples: Vec<SamplePaths>,
}

/// Sorted paths in `dir` whose file names match the glob `pattern`.
fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{pattern}", Pattern::escape(&dir.to_string_lossy()));
    let mut paths = Vec::new();
    for entry in glob(&full)
        .map_err(|e| EvalError::Dataset(format!("invalid file pattern {full}: {e}")))?
    {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => log::warn!("Skipping unreadable dataset entry: {e}"),
        }
    }
    paths.sort();
    Ok(paths)
}

impl PreprocessedDataset {
    /// Index the test split of `class` under `root`; images are resized to `image_size`.
    pub fn open<P: AsRef<Path>>(root: P, class: &str, image_size: u32) -> Result<Self> {
        let dir = root.as_ref().join(class).join("test_public").join("data");
        if !dir.is_dir() {
            return Err(EvalError::Dataset(format!(
                "missing test directory {}",
                dir.display()
            )));
        }

        let views = matching_files(&dir, "*_image_*.png")?;
        let normals = matching_files(&dir, "*_normals.png")?;

        if views.len() != normals.len() * NUM_VIEWS {
            return Err(EvalError::Dataset(format!(
                "{}: {} lighting views for {} normal maps, expected {} per sample",
                dir.display(),
                views.len(),
                normals.len(),
                NUM_VIEWS
            )));
        }

        let samples = views
            .chunks(NUM_VIEWS)
            .zip(normals)
            .enumerate()
            .map(|(i, (views, normals))| {
                let mask = dir.join(format!("{i:02}_mask.png"));
                if !mask.is_file() {
                    return Err(EvalError::Dataset(format!(
                        "missing ground truth {}",
                        mask.display()
                    )));
                }
                Ok(SamplePaths {
                    views: views.to_vec(),
                    normals,
                    mask,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Found {} test samples for class {} in {}",
            samples.len(),
            class,
            dir.display()
        );
        Ok(Self {
            class: class.to_string(),
            image_size,
            samples,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }
}

impl Dataset for PreprocessedDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let paths = self.samples.get(index).ok_or_else(|| {
            EvalError::Dataset(format!(
                "index {index} out of range for {} samples",
                self.samples.len()
            ))
        })?;

        let views = paths
            .views
            .iter()
            .map(|p| load_rgb(p, self.image_size))
            .collect::<std::result::Result<Vec<Array3<f64>>, _>>()?;
        let view_refs: Vec<ArrayView3<f64>> = views.iter().map(|v| v.view()).collect();
        let views = stack(Axis(0), &view_refs)
            .map_err(|e| EvalError::Dataset(format!("cannot stack lighting views: {e}")))?;

        let normal_map = load_rgb(&paths.normals, self.image_size)?;
        let (mask, any_defect) = load_mask(&paths.mask, self.image_size)?;
        let label = if any_defect {
            Label::Anomalous
        } else {
            Label::Normal
        };

        Sample::new(views, normal_map, mask, label)
    }
}
