use imaging::ImagingError;
use score_math::{IntegrateError, RocError};
use thiserror::Error;

/// Errors produced while scoring and evaluating reconstructions.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Two arrays that must be paired element-wise have different shapes.
    #[error("shape mismatch in {context}: {left:?} vs {right:?}")]
    ShapeMismatch {
        context: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// An anomaly map does not have the configured image resolution.
    #[error("anomaly map is {found:?}, expected {expected:?}")]
    Resolution {
        found: (usize, usize),
        expected: (usize, usize),
    },

    /// Labels must be 0 (normal) or 1 (anomalous).
    #[error("invalid label {0}; expected 0 or 1")]
    InvalidLabel(u8),

    /// A reduction over views received no views.
    #[error("cannot aggregate an empty stack of view maps")]
    NoViews,

    /// `finalize` was called with nothing recorded.
    #[error("no samples recorded")]
    Empty,

    /// Only one label class present, so ROC AUC is undefined.
    #[error("{level}-level labels contain a single class ({positives} anomalous, {negatives} normal)")]
    SingleClass {
        level: &'static str,
        positives: usize,
        negatives: usize,
    },

    /// The metrics were already computed; the accumulator is closed.
    #[error("metrics already finalized; no further samples may be recorded")]
    AlreadyFinalized,

    /// Ground truth contains no defect region, so AU-PRO is undefined.
    #[error("ground truth contains no anomalous regions")]
    NoDefectRegions,

    /// Ground truth contains no defect-free pixels, so AU-PRO is undefined.
    #[error("ground truth contains no defect-free pixels")]
    NoNormalPixels,

    /// A diffusion timestep outside the noise schedule.
    #[error("timestep {timestep} outside the schedule of {num_train_timesteps} training steps")]
    InvalidTimestep {
        timestep: usize,
        num_train_timesteps: usize,
    },

    #[error("ROC computation failed: {0}")]
    Roc(#[from] RocError),

    #[error("curve integration failed: {0}")]
    Integrate(#[from] IntegrateError),

    #[error("imaging error: {0}")]
    Imaging(#[from] ImagingError),

    #[error("dataset error: {0}")]
    Dataset(String),

    /// An external model collaborator failed.
    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    pub(crate) fn shape(context: &'static str, left: &[usize], right: &[usize]) -> Self {
        EvalError::ShapeMismatch {
            context,
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}
