use crate::aggregate::ScorePolicy;
use crate::dataset::DatasetKind;
use crate::error::{EvalError, Result};
use crate::method::{BaselineSettings, LatentOptions, MethodKind, ScoringOptions};
use crate::pro::{DEFAULT_INTEGRATION_LIMIT, DEFAULT_NUM_THRESHOLDS};
use crate::smoothing::DEFAULT_BLUR_SIGMA;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for one evaluation run over a set of classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Root of the preprocessed dataset
    pub data_path: PathBuf,
    /// Directory under which timestamped run directories are created
    pub output_dir: PathBuf,
    pub dataset: DatasetKind,
    /// Classes to evaluate; empty means every class of the dataset
    pub classes: Vec<String>,
    /// Square resolution images are resized to
    pub image_size: usize,
    pub method: MethodKind,
    pub score_policy: ScorePolicy,
    /// Gaussian sigma applied to anomaly maps; `None` disables smoothing
    pub blur_sigma: Option<f64>,
    /// Export a reconstruction strip every N samples
    pub export_every: Option<usize>,
    /// Save anomaly heatmaps after each class
    pub export_heatmaps: bool,
    pub seed: u64,
    /// Highest diffusion timestep a latent reconstruction starts from
    pub noise_intensity: usize,
    /// Stride between DDIM inference timesteps
    pub step_size: usize,
    /// Start latent reconstruction from a DDIM inversion instead of random noise
    pub ddim_inversion: bool,
    /// Upper false positive rate of the AU-PRO integral
    pub integration_limit: f64,
    pub num_thresholds: usize,
    pub baseline: BaselineSettings,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("datasets/eyecandies_preprocessed"),
            output_dir: PathBuf::from("output"),
            dataset: DatasetKind::Eyecandies,
            classes: Vec::new(),
            image_size: 256,
            method: MethodKind::Rec,
            score_policy: ScorePolicy::Mean,
            blur_sigma: Some(DEFAULT_BLUR_SIGMA),
            export_every: Some(2),
            export_heatmaps: false,
            seed: 7,
            noise_intensity: 81,
            step_size: 20,
            ddim_inversion: false,
            integration_limit: DEFAULT_INTEGRATION_LIMIT,
            num_thresholds: DEFAULT_NUM_THRESHOLDS,
            baseline: BaselineSettings::default(),
        }
    }
}

impl EvalConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Reject settings that would make every class fail.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(EvalError::Config("image_size must be positive".into()));
        }
        if let Some(sigma) = self.blur_sigma {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(EvalError::Config(format!(
                    "blur_sigma must be positive, got {sigma}"
                )));
            }
        }
        if self.export_every == Some(0) {
            return Err(EvalError::Config("export_every must be positive".into()));
        }
        if self.step_size == 0 {
            return Err(EvalError::Config("step_size must be positive".into()));
        }
        if !(self.integration_limit > 0.0 && self.integration_limit <= 1.0) {
            return Err(EvalError::Config(format!(
                "integration_limit must be in (0, 1], got {}",
                self.integration_limit
            )));
        }
        if self.num_thresholds < 2 {
            return Err(EvalError::Config("num_thresholds must be at least 2".into()));
        }
        if !(self.baseline.blur_sigma.is_finite() && self.baseline.blur_sigma > 0.0) {
            return Err(EvalError::Config("baseline blur_sigma must be positive".into()));
        }
        let known = self.dataset.classes();
        if let Some(unknown) = self.classes.iter().find(|c| !known.contains(&c.as_str())) {
            return Err(EvalError::Config(format!(
                "unknown {} class {unknown}",
                self.dataset.as_str()
            )));
        }
        Ok(())
    }

    /// Classes to run, in order.
    pub fn class_list(&self) -> Vec<String> {
        if self.classes.is_empty() {
            self.dataset.classes().iter().map(|c| c.to_string()).collect()
        } else {
            self.classes.clone()
        }
    }

    /// Scoring settings for one class; strips go to `reconstruct_dir` when given.
    pub fn scoring_options(&self, reconstruct_dir: Option<PathBuf>) -> ScoringOptions {
        ScoringOptions {
            image_size: self.image_size,
            score_policy: self.score_policy,
            blur_sigma: self.blur_sigma,
            export_every: self.export_every,
            reconstruct_dir,
            integration_limit: self.integration_limit,
            num_thresholds: self.num_thresholds,
        }
    }

    /// Name of a run directory: `<timestamp>_<method>_noiseT<n>_StepSize<s>`.
    pub fn run_dir_name(&self, timestamp: &str) -> String {
        format!(
            "{timestamp}_{}_noiseT{}_StepSize{}",
            self.method, self.noise_intensity, self.step_size
        )
    }

    /// One configuration per `(noise_intensity, step_size)` pair, noise major.
    ///
    /// An empty list keeps the configured value for that axis.
    pub fn sweep(&self, noise_intensities: &[usize], step_sizes: &[usize]) -> Vec<EvalConfig> {
        let noises = if noise_intensities.is_empty() {
            vec![self.noise_intensity]
        } else {
            noise_intensities.to_vec()
        };
        let steps = if step_sizes.is_empty() {
            vec![self.step_size]
        } else {
            step_sizes.to_vec()
        };

        noises
            .iter()
            .flat_map(|&noise_intensity| {
                steps.iter().map(move |&step_size| EvalConfig {
                    noise_intensity,
                    step_size,
                    ..self.clone()
                })
            })
            .collect()
    }

    pub fn latent_options(&self) -> LatentOptions {
        LatentOptions {
            noise_intensity: self.noise_intensity,
            step_size: self.step_size,
            ddim_inversion: self.ddim_inversion,
            condition_on_normals: self.method == MethodKind::ControlRec,
            seed: self.seed,
        }
    }
}
