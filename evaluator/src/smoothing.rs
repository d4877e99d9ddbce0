//! Resize-then-blur stage that turns a raw distance map into an anomaly map.

use crate::error::Result;
use crate::sample::AnomalyMap;
use imaging::{resize_bilinear, GaussianBlur};
use ndarray::ArrayView2;

/// Default blur width, in pixels at image resolution.
pub const DEFAULT_BLUR_SIGMA: f64 = 4.0;

/// Brings every map to the image resolution and smooths it the same way.
#[derive(Debug, Clone)]
pub struct Smoother {
    resolution: (usize, usize),
    blur: Option<GaussianBlur>,
}

impl Smoother {
    /// Smoother for square `image_size` maps; `blur_sigma = None` disables the blur.
    pub fn new(image_size: usize, blur_sigma: Option<f64>) -> Self {
        Self {
            resolution: (image_size, image_size),
            blur: blur_sigma.map(GaussianBlur::new),
        }
    }

    pub fn resolution(&self) -> (usize, usize) {
        self.resolution
    }

    pub fn blur(&self) -> Option<&GaussianBlur> {
        self.blur.as_ref()
    }

    /// Bilinear resize (no corner alignment) to the target resolution, then blur.
    pub fn apply(&self, map: &ArrayView2<f64>) -> Result<AnomalyMap> {
        let resized = if map.dim() == self.resolution {
            map.to_owned()
        } else {
            resize_bilinear(map, self.resolution, false)?
        };

        let smoothed = match &self.blur {
            Some(blur) => blur.apply(&resized.view()),
            None => resized,
        };
        AnomalyMap::new(smoothed, self.resolution)
    }
}
