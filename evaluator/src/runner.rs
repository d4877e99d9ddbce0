//! Evaluation loop over one class, and over a list of classes.
//!
//! For every class the runner walks the test set once in order, lets the
//! method score each sample, then finalizes the metrics and writes the
//! per-class artifacts under `<output>/<class>/`:
//!
//! - `class_score.txt`: the appended score log line
//! - `reconstruct/`: reconstruction strips written by the method
//! - `heatmaps/`: anomaly maps and masks, when enabled

use crate::config::EvalConfig;
use crate::dataset::Dataset;
use crate::error::{EvalError, Result};
use crate::export::save_heatmaps;
use crate::method::{ReconstructionMethod, ScoringOptions};
use crate::report::{append_class_log, ClassReport, ResultsTable};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

pub const CLASS_LOG_FILE: &str = "class_score.txt";
pub const RESULTS_FILE: &str = "results.txt";

/// Evaluates one method on the test set of one class.
pub struct Runner {
    class: String,
    class_dir: PathBuf,
    method: Box<dyn ReconstructionMethod>,
    export_heatmaps: bool,
    show_progress: bool,
}

impl Runner {
    /// Create the runner and its `<output_dir>/<class>` directory.
    pub fn new<P: AsRef<Path>>(
        output_dir: P,
        class: &str,
        method: Box<dyn ReconstructionMethod>,
    ) -> Result<Self> {
        let class_dir = output_dir.as_ref().join(class);
        fs::create_dir_all(&class_dir)?;
        Ok(Self {
            class: class.to_string(),
            class_dir,
            method,
            export_heatmaps: false,
            show_progress: false,
        })
    }

    pub fn with_heatmaps(mut self, enabled: bool) -> Self {
        self.export_heatmaps = enabled;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn class_dir(&self) -> &Path {
        &self.class_dir
    }

    pub fn method(&self) -> &dyn ReconstructionMethod {
        self.method.as_ref()
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        pb.set_style(style);
        pb.set_message(self.class.clone());
        pb
    }

    /// Score every sample of `dataset`, then compute and record the metrics.
    ///
    /// Any failure aborts the class; nothing is retried.
    pub fn evaluate(&mut self, dataset: &dyn Dataset) -> Result<ClassReport> {
        let n = dataset.len();
        if n == 0 {
            return Err(EvalError::Empty);
        }
        log::info!(
            "Evaluating {} on class {} ({} samples)",
            self.method.name(),
            self.class,
            n
        );

        let pb = self.progress_bar(n);
        for item in 0..n {
            let sample = dataset.get(item)?;
            self.method.predict(item, &sample)?;
            pb.inc(1);
        }
        pb.finish_and_clear();

        let metrics = self.method.calculate_metrics()?;
        let report = ClassReport {
            class: self.class.clone(),
            method: self.method.name().to_string(),
            metrics,
            rec_loss: self.method.rec_loss() / n as f64,
            samples: n,
        };

        append_class_log(&report, self.class_dir.join(CLASS_LOG_FILE))?;
        if self.export_heatmaps {
            let calc = self.method.calculator();
            save_heatmaps(
                calc.anomaly_maps(),
                calc.masks(),
                self.class_dir.join("heatmaps"),
            )?;
        }

        log::info!(
            "Class {}: image ROCAUC {:.3}, pixel ROCAUC {:.3}, AU-PRO {:.3}, loss {:.6}",
            report.class,
            report.metrics.image_rocauc,
            report.metrics.pixel_rocauc,
            report.metrics.au_pro,
            report.rec_loss
        );
        Ok(report)
    }
}

/// Reports of a multi-class run and the tables built from them.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reports: Vec<ClassReport>,
    pub table: ResultsTable,
}

/// Evaluate every configured class in order and append the tables to
/// `<output_dir>/results.txt`.
///
/// `open_dataset` supplies the test set of a class and `build_method` a
/// fresh method for it, so no state carries over between classes.
pub fn run_classes<D, M>(
    config: &EvalConfig,
    output_dir: &Path,
    mut open_dataset: D,
    mut build_method: M,
) -> Result<RunSummary>
where
    D: FnMut(&str) -> Result<Box<dyn Dataset>>,
    M: FnMut(&str, ScoringOptions) -> Result<Box<dyn ReconstructionMethod>>,
{
    config.validate()?;
    fs::create_dir_all(output_dir)?;

    let mut reports = Vec::new();
    let mut table = ResultsTable::new();
    for class in config.class_list() {
        let dataset = open_dataset(&class)?;
        let reconstruct_dir = config
            .export_every
            .map(|_| output_dir.join(&class).join("reconstruct"));
        let method = build_method(&class, config.scoring_options(reconstruct_dir))?;

        let mut runner = Runner::new(output_dir, &class, method)?
            .with_heatmaps(config.export_heatmaps)
            .with_progress(true);
        let report = runner.evaluate(dataset.as_ref())?;

        table.add(&report);
        reports.push(report);
        log::info!("Finished running on class {class}");
    }

    table.append_to(output_dir.join(RESULTS_FILE))?;
    Ok(RunSummary { reports, table })
}
