//! Reconstruction methods and the scoring stage they share.
//!
//! A method turns one [`Sample`] into per-view distance maps by
//! reconstructing its input and comparing the reconstruction with the
//! original. Everything after that (view aggregation, resize and blur,
//! recording into the [`MetricsCalculator`], periodic image export) is the
//! same for every method and lives in [`Scorer`].

use crate::aggregate::{aggregate_views, Aggregate, ScorePolicy};
use crate::distance::{feature_distance, imagenet_normalize, mse, pairwise_l2, pixel_l1};
use crate::error::{EvalError, Result};
use crate::export::save_reconstruction_strip;
use crate::metrics::{Metrics, MetricsCalculator};
use crate::model::{
    image_to_latents, latents_to_image, BlurReconstructor, FeatureExtractor, GenerativeModel,
    PoolingPyramid, Reconstructor,
};
use crate::pro::{DEFAULT_INTEGRATION_LIMIT, DEFAULT_NUM_THRESHOLDS};
use crate::sample::{InputModality, Sample};
use crate::schedule::{gaussian_noise, DdimScheduler};
use crate::smoothing::{Smoother, DEFAULT_BLUR_SIGMA};
use ndarray::{Array3, Array4, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Named reconstruction methods, as used in configuration files and reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum MethodKind {
    /// Pixel reconstruction of the lighting views
    #[default]
    Rec,
    /// Pixel reconstruction of the normal map
    NmapRec,
    /// Latent diffusion reconstruction of the lighting views
    LatentRec,
    /// Latent diffusion reconstruction conditioned on the normal map
    ControlRec,
    /// Pixel reconstruction scored in feature space
    FeatureRec,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Rec => "rec",
            MethodKind::NmapRec => "nmap_rec",
            MethodKind::LatentRec => "latent_rec",
            MethodKind::ControlRec => "control_rec",
            MethodKind::FeatureRec => "feature_rec",
        }
    }
}

impl MethodKind {
    /// Whether the method needs a pretrained latent diffusion model.
    pub fn is_latent(self) -> bool {
        matches!(self, MethodKind::LatentRec | MethodKind::ControlRec)
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every method's scoring stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringOptions {
    pub image_size: usize,
    pub score_policy: ScorePolicy,
    /// Gaussian sigma for the anomaly maps; `None` disables smoothing
    pub blur_sigma: Option<f64>,
    /// Export a reconstruction strip for every item divisible by this
    pub export_every: Option<usize>,
    /// Directory for reconstruction strips; nothing is exported without one
    pub reconstruct_dir: Option<PathBuf>,
    pub integration_limit: f64,
    pub num_thresholds: usize,
}

impl ScoringOptions {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            score_policy: ScorePolicy::default(),
            blur_sigma: Some(DEFAULT_BLUR_SIGMA),
            export_every: None,
            reconstruct_dir: None,
            integration_limit: DEFAULT_INTEGRATION_LIMIT,
            num_thresholds: DEFAULT_NUM_THRESHOLDS,
        }
    }
}

/// Aggregate, smooth and record the distance maps of one sample at a time.
#[derive(Debug)]
pub struct Scorer {
    policy: ScorePolicy,
    smoother: Smoother,
    calculator: MetricsCalculator,
    total_loss: f64,
    export_every: Option<usize>,
    reconstruct_dir: Option<PathBuf>,
}

impl Scorer {
    pub fn new(options: ScoringOptions) -> Result<Self> {
        if options.image_size == 0 {
            return Err(EvalError::Config("image size must be positive".into()));
        }
        if options.export_every == Some(0) {
            return Err(EvalError::Config("export interval must be positive".into()));
        }
        if let Some(dir) = &options.reconstruct_dir {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            policy: options.score_policy,
            smoother: Smoother::new(options.image_size, options.blur_sigma),
            calculator: MetricsCalculator::with_pro_settings(
                options.image_size,
                options.integration_limit,
                options.num_thresholds,
            ),
            total_loss: 0.0,
            export_every: options.export_every,
            reconstruct_dir: options.reconstruct_dir,
        })
    }

    pub fn policy(&self) -> ScorePolicy {
        self.policy
    }

    pub fn calculator(&self) -> &MetricsCalculator {
        &self.calculator
    }

    /// Sum of the per-sample reconstruction losses recorded so far.
    pub fn total_loss(&self) -> f64 {
        self.total_loss
    }

    /// Score one sample from its `(views, h, w)` distance maps.
    ///
    /// `originals` and `reconstructions` are only used for the exported strip.
    pub fn score(
        &mut self,
        item: usize,
        sample: &Sample,
        distances: &Array3<f64>,
        loss: f64,
        originals: &ArrayView4<f64>,
        reconstructions: &ArrayView4<f64>,
    ) -> Result<Aggregate> {
        let aggregate = aggregate_views(&distances.view(), self.policy)?;
        let anomaly_map = self.smoother.apply(&aggregate.map.view())?;
        self.calculator.record(
            aggregate.score,
            sample.label(),
            anomaly_map,
            &sample.ground_truth(),
        )?;
        self.total_loss += loss;

        log::debug!(
            "item {item}: score {:.5} at {:?}, loss {:.6}",
            aggregate.score,
            aggregate.peak,
            loss
        );

        if let (Some(every), Some(dir)) = (self.export_every, &self.reconstruct_dir) {
            if item % every == 0 {
                save_reconstruction_strip(
                    originals,
                    reconstructions,
                    dir.join(format!("{item:03}.png")),
                )?;
            }
        }
        Ok(aggregate)
    }

    pub fn finalize(&mut self) -> Result<Metrics> {
        self.calculator.finalize()
    }
}

/// A reconstruction-based scoring method driven by the evaluation runner.
pub trait ReconstructionMethod {
    fn name(&self) -> &str;

    /// Reconstruct and score one sample; `item` is its position in the dataset.
    fn predict(&mut self, item: usize, sample: &Sample) -> Result<()>;

    /// Compute the metrics over every sample predicted so far.
    fn calculate_metrics(&mut self) -> Result<Metrics>;

    /// Summed reconstruction loss over every sample predicted so far.
    fn rec_loss(&self) -> f64;

    fn calculator(&self) -> &MetricsCalculator;
}

fn check_reconstruction(input: &ArrayView4<f64>, rec: &Array4<f64>) -> Result<()> {
    if input.shape() != rec.shape() {
        return Err(EvalError::Model(format!(
            "reconstruction shape {:?} does not match input {:?}",
            rec.shape(),
            input.shape()
        )));
    }
    Ok(())
}

/// Autoencoder-style reconstruction scored by pixel distance at full resolution.
pub struct PixelReconstruction<R> {
    name: String,
    reconstructor: R,
    modality: InputModality,
    scorer: Scorer,
}

impl<R: Reconstructor> PixelReconstruction<R> {
    pub fn new(
        name: impl Into<String>,
        reconstructor: R,
        modality: InputModality,
        options: ScoringOptions,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            reconstructor,
            modality,
            scorer: Scorer::new(options)?,
        })
    }

    pub fn modality(&self) -> InputModality {
        self.modality
    }
}

impl<R: Reconstructor> ReconstructionMethod for PixelReconstruction<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, item: usize, sample: &Sample) -> Result<()> {
        let input = sample.input(self.modality);
        let rec = self.reconstructor.reconstruct(&input)?;
        check_reconstruction(&input, &rec)?;

        let distances = pixel_l1(&rec.view(), &input)?;
        let loss = mse(&rec.view(), &input)?;
        self.scorer
            .score(item, sample, &distances, loss, &input, &rec.view())?;
        Ok(())
    }

    fn calculate_metrics(&mut self) -> Result<Metrics> {
        self.scorer.finalize()
    }

    fn rec_loss(&self) -> f64 {
        self.scorer.total_loss()
    }

    fn calculator(&self) -> &MetricsCalculator {
        self.scorer.calculator()
    }
}

/// Diffusion settings for [`LatentReconstruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatentOptions {
    /// Highest timestep the reconstruction starts from
    pub noise_intensity: usize,
    /// Stride between inference timesteps over the training schedule
    pub step_size: usize,
    /// Reach the starting latent by DDIM inversion instead of random noise
    pub ddim_inversion: bool,
    /// Pass the sample's normal map, once per view, to every denoiser call
    pub condition_on_normals: bool,
    pub seed: u64,
}

impl Default for LatentOptions {
    fn default() -> Self {
        Self {
            noise_intensity: 81,
            step_size: 20,
            ddim_inversion: false,
            condition_on_normals: false,
            seed: 7,
        }
    }
}

/// Latent diffusion reconstruction scored by pairwise L2 distance in latent space.
///
/// The views are encoded, partially noised (or inverted) up to the noise
/// intensity, denoised with the DDIM schedule and compared with the clean
/// latents. The latent distance map is upsampled and blurred like any other.
/// With `condition_on_normals` every denoiser call also sees the normal map.
pub struct LatentReconstruction<M> {
    name: String,
    model: M,
    scheduler: DdimScheduler,
    timesteps: Vec<usize>,
    ddim_inversion: bool,
    condition_on_normals: bool,
    rng: StdRng,
    scorer: Scorer,
}

impl<M: GenerativeModel> LatentReconstruction<M> {
    pub fn new(
        name: impl Into<String>,
        model: M,
        mut scheduler: DdimScheduler,
        latent: LatentOptions,
        options: ScoringOptions,
    ) -> Result<Self> {
        scheduler.set_step_size(latent.step_size)?;
        let timesteps = scheduler.denoising_timesteps(latent.noise_intensity);
        if timesteps.is_empty() {
            return Err(EvalError::Config(format!(
                "noise intensity {} is below every inference timestep",
                latent.noise_intensity
            )));
        }
        log::info!("Denoising timesteps: {timesteps:?}");

        Ok(Self {
            name: name.into(),
            model,
            scheduler,
            timesteps,
            ddim_inversion: latent.ddim_inversion,
            condition_on_normals: latent.condition_on_normals,
            rng: StdRng::seed_from_u64(latent.seed),
            scorer: Scorer::new(options)?,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Bring clean latents to the first denoising timestep.
    fn noise_latents(
        &mut self,
        latents: &Array4<f64>,
        condition: Option<&ArrayView4<f64>>,
    ) -> Result<Array4<f64>> {
        if self.ddim_inversion {
            let mut x = latents.clone();
            for &t in self.timesteps.iter().rev() {
                let eps = self.model.predict_noise(&x.view(), t, condition)?;
                x = self.scheduler.inversion_step(&eps.view(), t, &x.view())?;
            }
            Ok(x)
        } else {
            let noise = gaussian_noise(latents.dim(), &mut self.rng);
            self.scheduler
                .add_noise(&latents.view(), &noise.view(), self.timesteps[0])
        }
    }

    /// Noise then denoise a stack of latents, optionally guided by `condition`.
    pub fn reconstruct_latents(
        &mut self,
        latents: &Array4<f64>,
        condition: Option<&ArrayView4<f64>>,
    ) -> Result<Array4<f64>> {
        let mut x = self.noise_latents(latents, condition)?;
        for &t in &self.timesteps {
            let eps = self.model.predict_noise(&x.view(), t, condition)?;
            x = self.scheduler.step(&eps.view(), t, &x.view())?;
        }
        Ok(x)
    }
}

impl<M: GenerativeModel> ReconstructionMethod for LatentReconstruction<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, item: usize, sample: &Sample) -> Result<()> {
        let views = sample.views();
        let latents = image_to_latents(&self.model, &views)?;

        let normal_map = sample.normal_map().insert_axis(Axis(0));
        let (n, _, h, w) = views.dim();
        let condition = if self.condition_on_normals {
            Some(normal_map.broadcast((n, 3, h, w)).ok_or_else(|| {
                EvalError::shape("normal map condition", normal_map.shape(), &[n, 3, h, w])
            })?)
        } else {
            None
        };
        let rec_latents = self.reconstruct_latents(&latents, condition.as_ref())?;
        let rec_views = latents_to_image(&self.model, &rec_latents.view())?;

        let distances = pairwise_l2(&rec_latents.view(), &latents.view())?;
        let loss = mse(&rec_latents.view(), &latents.view())?;
        self.scorer
            .score(item, sample, &distances, loss, &views, &rec_views.view())?;
        Ok(())
    }

    fn calculate_metrics(&mut self) -> Result<Metrics> {
        self.scorer.finalize()
    }

    fn rec_loss(&self) -> f64 {
        self.scorer.total_loss()
    }

    fn calculator(&self) -> &MetricsCalculator {
        self.scorer.calculator()
    }
}

/// Pixel reconstruction compared through a feature extractor instead of raw pixels.
pub struct FeatureReconstruction<R, F> {
    name: String,
    reconstructor: R,
    extractor: F,
    scorer: Scorer,
}

impl<R: Reconstructor, F: FeatureExtractor> FeatureReconstruction<R, F> {
    pub fn new(
        name: impl Into<String>,
        reconstructor: R,
        extractor: F,
        options: ScoringOptions,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            reconstructor,
            extractor,
            scorer: Scorer::new(options)?,
        })
    }
}

impl<R: Reconstructor, F: FeatureExtractor> ReconstructionMethod for FeatureReconstruction<R, F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, item: usize, sample: &Sample) -> Result<()> {
        let views = sample.views();
        let rec = self.reconstructor.reconstruct(&views)?;
        check_reconstruction(&views, &rec)?;

        let original_features = self.extractor.extract(&imagenet_normalize(&views)?.view())?;
        let rec_features = self.extractor.extract(&imagenet_normalize(&rec.view())?.view())?;
        let distances = feature_distance(&rec_features, &original_features, sample.resolution())?;
        let loss = mse(&rec.view(), &views)?;
        self.scorer
            .score(item, sample, &distances, loss, &views, &rec.view())?;
        Ok(())
    }

    fn calculate_metrics(&mut self) -> Result<Metrics> {
        self.scorer.finalize()
    }

    fn rec_loss(&self) -> f64 {
        self.scorer.total_loss()
    }

    fn calculator(&self) -> &MetricsCalculator {
        self.scorer.calculator()
    }
}

/// Parameters of the model-free baselines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineSettings {
    /// Sigma of the low-pass reconstruction
    pub blur_sigma: f64,
    /// Levels in the pooling feature pyramid
    pub pyramid_levels: usize,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            blur_sigma: 2.0,
            pyramid_levels: 4,
        }
    }
}

/// Build a method of the given kind from the model-free baselines.
///
/// Latent reconstruction needs a trained [`GenerativeModel`] and cannot be
/// built this way; construct [`LatentReconstruction`] directly instead.
pub fn baseline_method(
    kind: MethodKind,
    baseline: BaselineSettings,
    options: ScoringOptions,
) -> Result<Box<dyn ReconstructionMethod>> {
    let reconstructor = BlurReconstructor::new(baseline.blur_sigma);
    let method: Box<dyn ReconstructionMethod> = match kind {
        MethodKind::Rec => Box::new(PixelReconstruction::new(
            kind.as_str(),
            reconstructor,
            InputModality::Lightings,
            options,
        )?),
        MethodKind::NmapRec => Box::new(PixelReconstruction::new(
            kind.as_str(),
            reconstructor,
            InputModality::NormalMap,
            options,
        )?),
        MethodKind::FeatureRec => Box::new(FeatureReconstruction::new(
            kind.as_str(),
            reconstructor,
            PoolingPyramid::new(baseline.pyramid_levels)?,
            options,
        )?),
        MethodKind::LatentRec | MethodKind::ControlRec => {
            return Err(EvalError::Model(format!(
                "{kind} requires a pretrained latent diffusion model"
            )))
        }
    };
    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CalculatorState;
    use crate::sample::{Label, NUM_VIEWS};
    use approx::assert_relative_eq;
    use ndarray::{s, Array2};
    use std::cell::RefCell;
    use tempfile::TempDir;

    const SIZE: usize = 16;

    fn sample(defect: bool) -> Sample {
        let mut views = Array4::from_elem((NUM_VIEWS, 3, SIZE, SIZE), 0.5);
        let mut mask = Array2::zeros((SIZE, SIZE));
        if defect {
            for r in 6..10 {
                for c in 6..10 {
                    mask[[r, c]] = 1.0;
                    for v in 0..NUM_VIEWS {
                        for ch in 0..3 {
                            views[[v, ch, r, c]] = 1.0;
                        }
                    }
                }
            }
        }
        let label = if defect { Label::Anomalous } else { Label::Normal };
        Sample::new(views, Array3::from_elem((3, SIZE, SIZE), 0.5), mask, label).unwrap()
    }

    /// Reconstructs every image as flat grey, so any deviation is an error.
    struct Flat;

    impl Reconstructor for Flat {
        fn reconstruct(&self, images: &ArrayView4<f64>) -> Result<Array4<f64>> {
            Ok(Array4::from_elem(images.raw_dim(), 0.5))
        }
    }

    struct Truncating;

    impl Reconstructor for Truncating {
        fn reconstruct(&self, _: &ArrayView4<f64>) -> Result<Array4<f64>> {
            Ok(Array4::zeros((1, 3, 2, 2)))
        }
    }

    /// Identity VAE whose denoiser predicts no noise.
    struct Passthrough;

    impl GenerativeModel for Passthrough {
        fn encode(&self, images: &ArrayView4<f64>) -> Result<Array4<f64>> {
            Ok(images.to_owned())
        }
        fn decode(&self, latents: &ArrayView4<f64>) -> Result<Array4<f64>> {
            Ok(latents.to_owned())
        }
        fn predict_noise(
            &self,
            latents: &ArrayView4<f64>,
            _: usize,
            _: Option<&ArrayView4<f64>>,
        ) -> Result<Array4<f64>> {
            Ok(Array4::zeros(latents.raw_dim()))
        }
    }

    /// VAE with an 8x smaller 4-channel latent; the denoiser predicts no noise
    /// unless it is given a control image, in which case it predicts the
    /// control's mean and logs what it saw.
    #[derive(Default)]
    struct NormalGuided {
        seen: RefCell<Vec<(usize, f64)>>,
    }

    const FACTOR: usize = 8;

    impl GenerativeModel for NormalGuided {
        fn encode(&self, images: &ArrayView4<f64>) -> Result<Array4<f64>> {
            let (n, _, h, w) = images.dim();
            Ok(Array4::from_shape_fn(
                (n, 4, h / FACTOR, w / FACTOR),
                |(i, c, r, k)| {
                    images
                        .slice(s![i, c % 3, r * FACTOR..(r + 1) * FACTOR, k * FACTOR..(k + 1) * FACTOR])
                        .mean()
                        .unwrap_or(0.0)
                },
            ))
        }
        fn decode(&self, latents: &ArrayView4<f64>) -> Result<Array4<f64>> {
            let (n, _, h, w) = latents.dim();
            Ok(Array4::from_shape_fn(
                (n, 3, h * FACTOR, w * FACTOR),
                |(i, c, r, k)| latents[[i, c, r / FACTOR, k / FACTOR]],
            ))
        }
        fn predict_noise(
            &self,
            latents: &ArrayView4<f64>,
            _: usize,
            condition: Option<&ArrayView4<f64>>,
        ) -> Result<Array4<f64>> {
            match condition {
                Some(cond) => {
                    let mean = cond.mean().unwrap_or(0.0);
                    self.seen.borrow_mut().push((cond.len_of(Axis(0)), mean));
                    Ok(Array4::from_elem(latents.raw_dim(), mean))
                }
                None => Ok(Array4::zeros(latents.raw_dim())),
            }
        }
    }

    fn options() -> ScoringOptions {
        ScoringOptions {
            blur_sigma: Some(1.0),
            ..ScoringOptions::new(SIZE)
        }
    }

    fn run(method: &mut dyn ReconstructionMethod) -> Metrics {
        for (i, s) in [sample(false), sample(true), sample(false), sample(true)]
            .iter()
            .enumerate()
        {
            method.predict(i, s).unwrap();
        }
        method.calculate_metrics().unwrap()
    }

    #[test]
    fn test_pixel_reconstruction_separates_defects() {
        let mut method =
            PixelReconstruction::new("rec", Flat, InputModality::Lightings, options()).unwrap();
        let metrics = run(&mut method);

        assert_relative_eq!(metrics.image_rocauc, 1.0);
        assert!(metrics.pixel_rocauc > 0.9);
        assert!(method.rec_loss() > 0.0);
        assert_eq!(method.calculator().len(), 4);
        assert_eq!(method.calculator().state(), CalculatorState::Finalized);
    }

    #[test]
    fn test_normal_map_modality_sees_no_defect() {
        // Defects are only painted into the lighting views
        let mut method =
            PixelReconstruction::new("nmap_rec", Flat, InputModality::NormalMap, options()).unwrap();
        method.predict(0, &sample(true)).unwrap();
        assert_relative_eq!(method.calculator().image_scores()[0], 0.0);
        assert_relative_eq!(method.rec_loss(), 0.0);
    }

    #[test]
    fn test_wrong_reconstruction_shape_is_model_error() {
        let mut method =
            PixelReconstruction::new("rec", Truncating, InputModality::Lightings, options())
                .unwrap();
        assert!(matches!(
            method.predict(0, &sample(false)),
            Err(EvalError::Model(_))
        ));
    }

    #[test]
    fn test_latent_passthrough_keeps_clean_samples_clean() {
        let latent = LatentOptions {
            ddim_inversion: true,
            ..LatentOptions::default()
        };
        let mut method = LatentReconstruction::new(
            "latent_rec",
            Passthrough,
            DdimScheduler::stable_diffusion(),
            latent,
            options(),
        )
        .unwrap();
        assert_eq!(method.timesteps(), &[81, 61, 41, 21, 1]);

        // Inversion and denoising with zero noise are exact inverses
        let s = sample(true);
        let latents = image_to_latents(&Passthrough, &s.views()).unwrap();
        let rec = method.reconstruct_latents(&latents, None).unwrap();
        for (a, b) in rec.iter().zip(latents.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_latent_noise_is_reproducible() {
        let build = || {
            LatentReconstruction::new(
                "latent_rec",
                Passthrough,
                DdimScheduler::stable_diffusion(),
                LatentOptions::default(),
                options(),
            )
            .unwrap()
        };
        let s = sample(false);
        let latents = image_to_latents(&Passthrough, &s.views()).unwrap();
        let a = build().reconstruct_latents(&latents, None).unwrap();
        let b = build().reconstruct_latents(&latents, None).unwrap();
        assert_eq!(a, b);

        let mut method = build();
        method.predict(0, &s).unwrap();
        assert!(method.rec_loss() > 0.0);
    }

    #[test]
    fn test_noise_intensity_below_schedule() {
        let latent = LatentOptions {
            noise_intensity: 0,
            ..LatentOptions::default()
        };
        assert!(LatentReconstruction::new(
            "latent_rec",
            Passthrough,
            DdimScheduler::stable_diffusion(),
            latent,
            options(),
        )
        .is_err());
    }

    fn guided(condition_on_normals: bool) -> LatentReconstruction<NormalGuided> {
        let latent = LatentOptions {
            ddim_inversion: true,
            condition_on_normals,
            ..LatentOptions::default()
        };
        LatentReconstruction::new(
            "control_rec",
            NormalGuided::default(),
            DdimScheduler::stable_diffusion(),
            latent,
            options(),
        )
        .unwrap()
    }

    #[test]
    fn test_normal_map_reaches_every_denoiser_call() {
        let base = sample(false);
        let mut normals = Array3::from_elem((3, SIZE, SIZE), 0.25);
        normals.index_axis_mut(Axis(0), 2).fill(1.0);
        let s = Sample::new(
            base.views().to_owned(),
            normals,
            base.ground_truth().to_owned(),
            base.label(),
        )
        .unwrap();

        let mut method = guided(true);
        method.predict(0, &s).unwrap();

        // Five inversion steps then five denoising steps
        let seen = method.model().seen.borrow();
        assert_eq!(seen.len(), 2 * method.timesteps().len());
        for &(views, mean) in seen.iter() {
            assert_eq!(views, NUM_VIEWS);
            assert_relative_eq!(mean, 0.5, epsilon = 1e-12);
        }
        drop(seen);

        // Without conditioning inversion and denoising cancel out exactly
        let mut plain = guided(false);
        plain.predict(0, &s).unwrap();
        assert!(plain.model().seen.borrow().is_empty());
        assert_relative_eq!(plain.rec_loss(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_latent_maps_are_upsampled_to_image_size() {
        let mut method = guided(false);
        method.predict(0, &sample(true)).unwrap();

        let map = &method.calculator().anomaly_maps()[0];
        assert_eq!(map.dim(), (SIZE, SIZE));
    }

    #[test]
    fn test_feature_reconstruction_runs() {
        let mut method = FeatureReconstruction::new(
            "feature_rec",
            Flat,
            PoolingPyramid::new(3).unwrap(),
            options(),
        )
        .unwrap();
        let metrics = run(&mut method);
        assert_relative_eq!(metrics.image_rocauc, 1.0);
    }

    #[test]
    fn test_export_every_other_item() {
        let dir = TempDir::new().unwrap();
        let opts = ScoringOptions {
            export_every: Some(2),
            reconstruct_dir: Some(dir.path().join("reconstruct")),
            ..options()
        };
        let mut method = PixelReconstruction::new("rec", Flat, InputModality::Lightings, opts).unwrap();
        for i in 0..3 {
            method.predict(i, &sample(i == 1)).unwrap();
        }
        assert!(dir.path().join("reconstruct/000.png").exists());
        assert!(!dir.path().join("reconstruct/001.png").exists());
        assert!(dir.path().join("reconstruct/002.png").exists());
    }

    #[test]
    fn test_baseline_factory() {
        for kind in [MethodKind::Rec, MethodKind::NmapRec, MethodKind::FeatureRec] {
            let method = baseline_method(kind, BaselineSettings::default(), options()).unwrap();
            assert_eq!(method.name(), kind.as_str());
            assert!(!kind.is_latent());
        }
        for kind in [MethodKind::LatentRec, MethodKind::ControlRec] {
            assert!(kind.is_latent());
            assert!(matches!(
                baseline_method(kind, BaselineSettings::default(), options()),
                Err(EvalError::Model(_))
            ));
        }
        assert!(Scorer::new(ScoringOptions {
            export_every: Some(0),
            ..options()
        })
        .is_err());
    }
}
