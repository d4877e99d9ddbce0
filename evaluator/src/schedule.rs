//! Deterministic DDIM noise schedule for latent-space reconstruction.
//!
//! Matches the Stable Diffusion configuration: 1000 training timesteps,
//! scaled-linear betas from 0.00085 to 0.012, a steps offset of one and a
//! final alpha equal to the first cumulative alpha. Inference timesteps are
//! spaced `num_train_timesteps / num_inference_steps` apart and run from
//! high noise to low noise.

use crate::error::{EvalError, Result};
use ndarray::{Array4, ArrayView4};
use rand::Rng;
use rand_distr::StandardNormal;

pub const NUM_TRAIN_TIMESTEPS: usize = 1000;
pub const BETA_START: f64 = 0.00085;
pub const BETA_END: f64 = 0.012;
pub const STEPS_OFFSET: usize = 1;

#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas_cumprod: Vec<f64>,
    final_alpha_cumprod: f64,
    steps_offset: usize,
    num_inference_steps: usize,
    timesteps: Vec<usize>,
}

impl DdimScheduler {
    /// Build a scheduler with scaled-linear betas between `beta_start` and `beta_end`.
    pub fn new(
        num_train_timesteps: usize,
        beta_start: f64,
        beta_end: f64,
        steps_offset: usize,
    ) -> Result<Self> {
        if num_train_timesteps < 2 {
            return Err(EvalError::Config(format!(
                "noise schedule needs at least 2 training timesteps, got {num_train_timesteps}"
            )));
        }
        if !(0.0 < beta_start && beta_start <= beta_end && beta_end < 1.0) {
            return Err(EvalError::Config(format!(
                "invalid beta range [{beta_start}, {beta_end}]"
            )));
        }

        Ok(Self::from_cumprod(
            scaled_linear_cumprod(num_train_timesteps, beta_start, beta_end),
            steps_offset,
        ))
    }

    /// The Stable Diffusion v1 schedule.
    pub fn stable_diffusion() -> Self {
        Self::from_cumprod(
            scaled_linear_cumprod(NUM_TRAIN_TIMESTEPS, BETA_START, BETA_END),
            STEPS_OFFSET,
        )
    }

    fn from_cumprod(alphas_cumprod: Vec<f64>, steps_offset: usize) -> Self {
        let n = alphas_cumprod.len();
        Self {
            final_alpha_cumprod: alphas_cumprod[0],
            alphas_cumprod,
            steps_offset,
            num_inference_steps: n,
            timesteps: (0..n).rev().collect(),
        }
    }

    pub fn num_train_timesteps(&self) -> usize {
        self.alphas_cumprod.len()
    }

    pub fn num_inference_steps(&self) -> usize {
        self.num_inference_steps
    }

    /// Spacing between consecutive inference timesteps.
    pub fn step_ratio(&self) -> usize {
        self.num_train_timesteps() / self.num_inference_steps
    }

    /// Current timesteps, highest noise first.
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// Select `num_inference_steps` evenly spaced timesteps.
    pub fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        let train = self.num_train_timesteps();
        if num_inference_steps == 0 || num_inference_steps > train {
            return Err(EvalError::Config(format!(
                "inference steps must be in 1..={train}, got {num_inference_steps}"
            )));
        }
        let ratio = train / num_inference_steps;
        self.num_inference_steps = num_inference_steps;
        self.timesteps = (0..num_inference_steps)
            .rev()
            .map(|i| (i * ratio + self.steps_offset).min(train - 1))
            .collect();
        Ok(())
    }

    /// Set the inference steps from a stride over the training schedule.
    ///
    /// A `step_size` of 20 over 1000 training steps gives 50 inference steps.
    pub fn set_step_size(&mut self, step_size: usize) -> Result<()> {
        if step_size == 0 {
            return Err(EvalError::Config("step size must be positive".into()));
        }
        self.set_timesteps(self.num_train_timesteps() / step_size)
    }

    /// Timesteps at or below `noise_intensity`, highest first.
    pub fn denoising_timesteps(&self, noise_intensity: usize) -> Vec<usize> {
        self.timesteps
            .iter()
            .copied()
            .filter(|&t| t <= noise_intensity)
            .collect()
    }

    pub fn alpha_cumprod(&self, timestep: usize) -> Result<f64> {
        self.alphas_cumprod
            .get(timestep)
            .copied()
            .ok_or(EvalError::InvalidTimestep {
                timestep,
                num_train_timesteps: self.num_train_timesteps(),
            })
    }

    /// Cumulative alpha at a possibly negative timestep; below zero is the final alpha.
    fn alpha_or_final(&self, timestep: isize) -> Result<f64> {
        if timestep < 0 {
            Ok(self.final_alpha_cumprod)
        } else {
            self.alpha_cumprod(timestep as usize)
        }
    }

    /// Diffuse clean latents to `timestep`: `sqrt(a) * x0 + sqrt(1 - a) * noise`.
    pub fn add_noise(
        &self,
        original: &ArrayView4<f64>,
        noise: &ArrayView4<f64>,
        timestep: usize,
    ) -> Result<Array4<f64>> {
        check_same_shape("latents/noise", original, noise)?;
        let alpha = self.alpha_cumprod(timestep)?;
        let (a, b) = (alpha.sqrt(), (1.0 - alpha).sqrt());
        Ok(original * a + noise * b)
    }

    /// One deterministic (eta = 0) DDIM denoising update from `timestep`.
    pub fn step(
        &self,
        noise_pred: &ArrayView4<f64>,
        timestep: usize,
        sample: &ArrayView4<f64>,
    ) -> Result<Array4<f64>> {
        check_same_shape("noise prediction/sample", noise_pred, sample)?;
        let alpha_t = self.alpha_cumprod(timestep)?;
        let prev = timestep as isize - self.step_ratio() as isize;
        let alpha_prev = self.alpha_or_final(prev)?;
        Ok(ddim_update(noise_pred, sample, alpha_t, alpha_prev))
    }

    /// Reverse DDIM update: move a sample from the timestep below `timestep` up to it.
    pub fn inversion_step(
        &self,
        noise_pred: &ArrayView4<f64>,
        timestep: usize,
        sample: &ArrayView4<f64>,
    ) -> Result<Array4<f64>> {
        check_same_shape("noise prediction/sample", noise_pred, sample)?;
        let alpha_next = self.alpha_cumprod(timestep)?;
        let current = (timestep as isize - self.step_ratio() as isize)
            .min(self.num_train_timesteps() as isize - 1);
        let alpha_t = self.alpha_or_final(current)?;
        Ok(ddim_update(noise_pred, sample, alpha_t, alpha_next))
    }
}

impl Default for DdimScheduler {
    fn default() -> Self {
        Self::stable_diffusion()
    }
}

/// Cumulative products of `1 - beta` for betas linear in sqrt space.
fn scaled_linear_cumprod(n: usize, beta_start: f64, beta_end: f64) -> Vec<f64> {
    let (lo, hi) = (beta_start.sqrt(), beta_end.sqrt());
    let last = (n - 1) as f64;
    let mut running = 1.0;
    (0..n)
        .map(|i| {
            let beta = (lo + (hi - lo) * i as f64 / last).powi(2);
            running *= 1.0 - beta;
            running
        })
        .collect()
}

/// Predict x0 from the noise estimate at `alpha_from`, then re-noise it to `alpha_to`.
fn ddim_update(
    noise_pred: &ArrayView4<f64>,
    sample: &ArrayView4<f64>,
    alpha_from: f64,
    alpha_to: f64,
) -> Array4<f64> {
    let beta_from = 1.0 - alpha_from;
    let predicted_original = (sample - &(noise_pred * beta_from.sqrt())) / alpha_from.sqrt();
    predicted_original * alpha_to.sqrt() + noise_pred * (1.0 - alpha_to).sqrt()
}

fn check_same_shape(
    context: &'static str,
    a: &ArrayView4<f64>,
    b: &ArrayView4<f64>,
) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(EvalError::shape(context, a.shape(), b.shape()));
    }
    Ok(())
}

/// Standard normal noise with the given `(N, C, H, W)` shape.
pub fn gaussian_noise<R: Rng>(
    shape: (usize, usize, usize, usize),
    rng: &mut R,
) -> Array4<f64> {
    Array4::from_shape_fn(shape, |_| rng.sample(StandardNormal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_schedule_endpoints() {
        let sched = DdimScheduler::stable_diffusion();
        assert_eq!(sched.num_train_timesteps(), 1000);
        assert_relative_eq!(sched.alpha_cumprod(0).unwrap(), 1.0 - 0.00085, epsilon = 1e-12);
        let last = sched.alpha_cumprod(999).unwrap();
        assert!(last > 0.0 && last < 0.01);
        assert!(sched.alpha_cumprod(1000).is_err());
    }

    #[test]
    fn test_new_matches_stable_diffusion() {
        let built = DdimScheduler::new(1000, BETA_START, BETA_END, 1).unwrap();
        let sd = DdimScheduler::stable_diffusion();
        for t in [0, 1, 500, 999] {
            assert_relative_eq!(
                built.alpha_cumprod(t).unwrap(),
                sd.alpha_cumprod(t).unwrap(),
                epsilon = 1e-15
            );
        }
        assert!(DdimScheduler::new(1000, 0.02, 0.01, 1).is_err());
    }

    #[test]
    fn test_alphas_strictly_decrease() {
        let sched = DdimScheduler::stable_diffusion();
        for t in 1..1000 {
            assert!(sched.alpha_cumprod(t).unwrap() < sched.alpha_cumprod(t - 1).unwrap());
        }
    }

    #[test]
    fn test_step_size_twenty_timesteps() {
        let mut sched = DdimScheduler::stable_diffusion();
        sched.set_step_size(20).unwrap();
        assert_eq!(sched.num_inference_steps(), 50);
        assert_eq!(sched.step_ratio(), 20);
        assert_eq!(sched.timesteps()[0], 981);
        assert_eq!(*sched.timesteps().last().unwrap(), 1);
        assert_eq!(sched.denoising_timesteps(81), vec![81, 61, 41, 21, 1]);
    }

    #[test]
    fn test_invalid_inference_steps() {
        let mut sched = DdimScheduler::stable_diffusion();
        assert!(sched.set_timesteps(0).is_err());
        assert!(sched.set_timesteps(1001).is_err());
        assert!(sched.set_step_size(0).is_err());
    }

    #[test]
    fn test_step_recovers_clean_sample_with_exact_noise() {
        let mut sched = DdimScheduler::stable_diffusion();
        sched.set_step_size(20).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let x0 = gaussian_noise((1, 4, 3, 3), &mut rng);
        let eps = gaussian_noise((1, 4, 3, 3), &mut rng);

        // With the true noise every update stays on the same trajectory
        let mut x = sched.add_noise(&x0.view(), &eps.view(), 81).unwrap();
        for t in sched.denoising_timesteps(81) {
            x = sched.step(&eps.view(), t, &x.view()).unwrap();
        }
        let alpha = sched.alpha_cumprod(0).unwrap();
        let expected = &x0 * alpha.sqrt() + &eps * (1.0 - alpha).sqrt();
        for (a, b) in x.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_inversion_undoes_step() {
        let mut sched = DdimScheduler::stable_diffusion();
        sched.set_step_size(20).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let sample = gaussian_noise((2, 4, 2, 2), &mut rng);
        let eps = gaussian_noise((2, 4, 2, 2), &mut rng);

        let down = sched.step(&eps.view(), 61, &sample.view()).unwrap();
        let up = sched.inversion_step(&eps.view(), 61, &down.view()).unwrap();
        for (a, b) in up.iter().zip(sample.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let sched = DdimScheduler::stable_diffusion();
        let a = Array4::<f64>::zeros((1, 4, 2, 2));
        let b = Array4::<f64>::zeros((1, 4, 2, 3));
        assert!(matches!(
            sched.add_noise(&a.view(), &b.view(), 10),
            Err(EvalError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_noise_is_seeded() {
        let a = gaussian_noise((1, 1, 4, 4), &mut StdRng::seed_from_u64(7));
        let b = gaussian_noise((1, 1, 4, 4), &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
