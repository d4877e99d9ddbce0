//! Interfaces to the models that produce reconstructions.
//!
//! The networks themselves live outside this crate. A method only needs a
//! handful of operations from them, captured by the traits here, plus two
//! simple baselines that make the pipeline runnable without trained weights.

use crate::error::{EvalError, Result};
use imaging::GaussianBlur;
use ndarray::{s, Array4, ArrayView4, Axis, Zip};

/// Scale applied to VAE latents so they have roughly unit variance.
pub const LATENT_SCALE: f64 = 0.18215;

/// Latent diffusion model: a VAE plus a noise-predicting denoiser.
pub trait GenerativeModel {
    /// Map `(N, 3, H, W)` images in `[-1, 1]` to unscaled latents.
    fn encode(&self, images: &ArrayView4<f64>) -> Result<Array4<f64>>;

    /// Map unscaled latents back to images in `[-1, 1]`.
    fn decode(&self, latents: &ArrayView4<f64>) -> Result<Array4<f64>>;

    /// Estimate the noise contained in `latents` at `timestep`.
    ///
    /// `condition` is an optional `(N, 3, H, W)` control image in `[0, 1]`,
    /// one per latent, that steers a ControlNet-style side branch. Models
    /// without such a branch ignore it.
    fn predict_noise(
        &self,
        latents: &ArrayView4<f64>,
        timestep: usize,
        condition: Option<&ArrayView4<f64>>,
    ) -> Result<Array4<f64>>;
}

/// Image-to-image reconstructor such as a convolutional autoencoder.
pub trait Reconstructor {
    /// Reconstruct `(N, C, H, W)` images in `[0, 1]`; the output has the input's shape.
    fn reconstruct(&self, images: &ArrayView4<f64>) -> Result<Array4<f64>>;
}

/// Backbone returning a pyramid of feature maps, shallowest first.
pub trait FeatureExtractor {
    fn extract(&self, images: &ArrayView4<f64>) -> Result<Vec<Array4<f64>>>;
}

/// Encode images in `[0, 1]` into scaled latents.
pub fn image_to_latents<M: GenerativeModel + ?Sized>(
    model: &M,
    images: &ArrayView4<f64>,
) -> Result<Array4<f64>> {
    let centered = images.mapv(|v| v * 2.0 - 1.0);
    Ok(model.encode(&centered.view())? * LATENT_SCALE)
}

/// Decode scaled latents into images clamped to `[0, 1]`.
pub fn latents_to_image<M: GenerativeModel + ?Sized>(
    model: &M,
    latents: &ArrayView4<f64>,
) -> Result<Array4<f64>> {
    let unscaled = latents.mapv(|v| v / LATENT_SCALE);
    let decoded = model.decode(&unscaled.view())?;
    Ok(decoded.mapv(|v| (v / 2.0 + 0.5).clamp(0.0, 1.0)))
}

/// Low-pass "reconstruction": every channel is Gaussian blurred.
///
/// Fine structure such as scratches is lost, so the residual highlights it.
#[derive(Debug, Clone)]
pub struct BlurReconstructor {
    blur: GaussianBlur,
}

impl BlurReconstructor {
    pub fn new(sigma: f64) -> Self {
        Self {
            blur: GaussianBlur::new(sigma),
        }
    }
}

impl Reconstructor for BlurReconstructor {
    fn reconstruct(&self, images: &ArrayView4<f64>) -> Result<Array4<f64>> {
        let mut out = Array4::zeros(images.raw_dim());
        for (mut out_img, img) in out.outer_iter_mut().zip(images.outer_iter()) {
            for (mut out_plane, plane) in out_img.outer_iter_mut().zip(img.outer_iter()) {
                out_plane.assign(&self.blur.apply(&plane));
            }
        }
        Ok(out)
    }
}

/// Average-pooling pyramid: level 0 is the input, each level halves the resolution.
#[derive(Debug, Clone, Copy)]
pub struct PoolingPyramid {
    levels: usize,
}

impl PoolingPyramid {
    pub fn new(levels: usize) -> Result<Self> {
        if levels == 0 {
            return Err(EvalError::Config("pyramid needs at least one level".into()));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> usize {
        self.levels
    }
}

impl FeatureExtractor for PoolingPyramid {
    fn extract(&self, images: &ArrayView4<f64>) -> Result<Vec<Array4<f64>>> {
        let mut pyramid = vec![images.to_owned()];
        for _ in 1..self.levels {
            let Some(prev) = pyramid.last() else { break };
            let (_, _, h, w) = prev.dim();
            if h < 2 || w < 2 {
                return Err(EvalError::shape(
                    "pooling pyramid",
                    prev.shape(),
                    &[prev.len_of(Axis(0)), prev.len_of(Axis(1)), 2, 2],
                ));
            }
            let next = avg_pool2(&prev.view());
            pyramid.push(next);
        }
        Ok(pyramid)
    }
}

/// 2x2 average pooling with stride 2; a trailing odd row or column is dropped.
fn avg_pool2(x: &ArrayView4<f64>) -> Array4<f64> {
    let (n, c, h, w) = x.dim();
    let (ph, pw) = (h / 2, w / 2);
    let mut out = Array4::zeros((n, c, ph, pw));
    for (dr, dc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        let quarter = x.slice(s![.., .., dr..ph * 2; 2, dc..pw * 2; 2]);
        Zip::from(&mut out).and(&quarter).for_each(|o, &v| *o += 0.25 * v);
    }
    out
}
