//! evaluator - reconstruction-based anomaly scoring over multi-lighting images
//!
//! Each test sample is photographed under six lightings. A reconstruction
//! method rebuilds the views (or the normal map) and the distance between
//! input and reconstruction becomes a per-view anomaly map. Maps are combined
//! across views, resized and blurred to image resolution, and accumulated per
//! class into image ROC AUC, pixel ROC AUC and AU-PRO.
//!
//! Pipeline per sample: Distance -> Aggregate -> Smooth -> Record.
//! Per class: Runner -> MetricsCalculator::finalize -> report.

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod export;
pub mod method;
pub mod metrics;
pub mod model;
pub mod pro;
pub mod report;
pub mod runner;
pub mod sample;
pub mod schedule;
pub mod smoothing;

pub use aggregate::{aggregate_views, Aggregate, Peak, ScorePolicy};
pub use config::EvalConfig;
pub use dataset::{Dataset, DatasetKind, InMemoryDataset, PreprocessedDataset};
pub use error::{EvalError, Result};
pub use method::{
    baseline_method, BaselineSettings, FeatureReconstruction, LatentOptions, LatentReconstruction,
    MethodKind, PixelReconstruction, ReconstructionMethod, Scorer, ScoringOptions,
};
pub use metrics::{CalculatorState, Metrics, MetricsCalculator};
pub use model::{BlurReconstructor, FeatureExtractor, GenerativeModel, PoolingPyramid, Reconstructor};
pub use report::{ClassReport, ResultsTable, TableMetric};
pub use runner::{run_classes, RunSummary, Runner};
pub use sample::{AnomalyMap, InputModality, Label, Sample, NUM_VIEWS};
pub use schedule::DdimScheduler;
pub use smoothing::Smoother;
