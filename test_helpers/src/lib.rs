//! Test fixtures for the anomaly evaluation workspace
//!
//! Builds synthetic multi-lighting samples as plain ndarray arrays and writes
//! them to disk in the preprocessed dataset layout.

use imaging::{save_gray_map, save_rgb, ImagingError};
use ndarray::{s, Array2, Array3, Array4};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Lighting views per synthetic sample.
pub const VIEWS: usize = 6;

#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write fixture image: {0}")]
    Imaging(#[from] ImagingError),
}

/// Square binary mask with ones inside `rows x cols`.
pub fn defect_mask(size: usize, rows: Range<usize>, cols: Range<usize>) -> Array2<f64> {
    let mut mask = Array2::zeros((size, size));
    mask.slice_mut(s![rows, cols]).fill(1.0);
    mask
}

/// Six grey views of a smooth object, each lit slightly differently.
///
/// Pixels where `mask` is set are painted with `defect_value` in every view.
pub fn lighting_views(size: usize, mask: Option<&Array2<f64>>, defect_value: f64) -> Array4<f64> {
    let mut views = Array4::from_shape_fn((VIEWS, 3, size, size), |(v, _, _, _)| {
        0.4 + 0.02 * v as f64
    });
    if let Some(mask) = mask {
        for mut view in views.outer_iter_mut() {
            for mut channel in view.outer_iter_mut() {
                ndarray::Zip::from(&mut channel)
                    .and(mask)
                    .for_each(|px, &m| {
                        if m > 0.5 {
                            *px = defect_value;
                        }
                    });
            }
        }
    }
    views
}

/// Normal map of a flat surface facing the camera.
pub fn flat_normal_map(size: usize) -> Array3<f64> {
    Array3::from_shape_fn((3, size, size), |(c, _, _)| if c == 2 { 1.0 } else { 0.5 })
}

/// One synthetic sample as raw arrays: views, normal map, mask.
#[derive(Debug, Clone)]
pub struct SyntheticSample {
    pub views: Array4<f64>,
    pub normal_map: Array3<f64>,
    pub mask: Array2<f64>,
}

impl SyntheticSample {
    pub fn normal(size: usize) -> Self {
        Self {
            views: lighting_views(size, None, 0.0),
            normal_map: flat_normal_map(size),
            mask: Array2::zeros((size, size)),
        }
    }

    /// Sample with a bright square defect over `rows x cols`.
    pub fn with_defect(size: usize, rows: Range<usize>, cols: Range<usize>) -> Self {
        let mask = defect_mask(size, rows, cols);
        Self {
            views: lighting_views(size, Some(&mask), 1.0),
            normal_map: flat_normal_map(size),
            mask,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        self.mask.iter().any(|&m| m > 0.5)
    }
}

/// Write samples as `<root>/<class>/test_public/data/` PNG files.
///
/// Returns the data directory.
pub fn write_class_dir<P: AsRef<Path>>(
    root: P,
    class: &str,
    samples: &[SyntheticSample],
) -> Result<PathBuf, TestHelperError> {
    let dir = root.as_ref().join(class).join("test_public").join("data");
    std::fs::create_dir_all(&dir)?;

    for (i, sample) in samples.iter().enumerate() {
        for (v, view) in sample.views.outer_iter().enumerate() {
            save_rgb(&view, dir.join(format!("{i:03}_image_{v}.png")))?;
        }
        save_rgb(&sample.normal_map.view(), dir.join(format!("{i:03}_normals.png")))?;
        save_gray_map(&sample.mask.view(), dir.join(format!("{i:02}_mask.png")))?;
    }
    Ok(dir)
}
