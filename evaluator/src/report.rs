//! Human-readable summaries of evaluation results.

use crate::error::Result;
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Outcome of evaluating one method on one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub class: String,
    pub method: String,
    pub metrics: Metrics,
    /// Reconstruction loss averaged over the samples
    pub rec_loss: f64,
    pub samples: usize,
}

impl ClassReport {
    /// Two-line entry for the per-class score log.
    pub fn log_line(&self) -> String {
        format!(
            "Class: {} {}, Image ROCAUC: {:.3}, Pixel ROCAUC: {:.3}, AUPRO:  {:.3}\nReconstruction Loss: {}",
            self.class,
            self.method,
            self.metrics.image_rocauc,
            self.metrics.pixel_rocauc,
            self.metrics.au_pro,
            self.rec_loss
        )
    }
}

/// Capitalize the first letter of every alphabetic run and lowercase the rest.
///
/// `cable_gland` becomes `Cable_Gland` and `CandyCane` becomes `Candycane`.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_alpha = false;
    for ch in name.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Which metric a table shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMetric {
    ImageRocauc,
    PixelRocauc,
    AuPro,
}

impl TableMetric {
    pub const ALL: [TableMetric; 3] = [
        TableMetric::ImageRocauc,
        TableMetric::PixelRocauc,
        TableMetric::AuPro,
    ];

    pub fn title(self) -> &'static str {
        match self {
            TableMetric::ImageRocauc => "Image ROCAUC",
            TableMetric::PixelRocauc => "Pixel ROCAUC",
            TableMetric::AuPro => "AU PRO",
        }
    }

    fn pick(self, m: &Metrics) -> f64 {
        match self {
            TableMetric::ImageRocauc => m.image_rocauc,
            TableMetric::PixelRocauc => m.pixel_rocauc,
            TableMetric::AuPro => m.au_pro,
        }
    }
}

/// Metrics for every (method, class) pair, rendered as one table per metric.
///
/// Rows are methods in insertion order, columns are classes in insertion
/// order followed by the per-method mean.
#[derive(Debug, Clone, Default)]
pub struct ResultsTable {
    methods: Vec<String>,
    classes: Vec<String>,
    cells: BTreeMap<(String, String), Metrics>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, report: &ClassReport) {
        if !self.methods.contains(&report.method) {
            self.methods.push(report.method.clone());
        }
        if !self.classes.contains(&report.class) {
            self.classes.push(report.class.clone());
        }
        self.cells.insert(
            (report.method.clone(), report.class.clone()),
            report.metrics,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Mean of a method's values over the classes it was run on.
    pub fn mean(&self, method: &str, metric: TableMetric) -> Option<f64> {
        let values: Vec<f64> = self
            .classes
            .iter()
            .filter_map(|c| self.cells.get(&(method.to_string(), c.clone())))
            .map(|m| metric.pick(m))
            .collect();
        score_math::mean(&values)
    }

    /// Markdown pipe table for one metric.
    pub fn markdown(&self, metric: TableMetric) -> String {
        let mut header = vec!["Method".to_string()];
        header.extend(self.classes.iter().map(|c| title_case(c)));
        header.push("Mean".to_string());

        let mut lines = vec![
            format!("| {} |", header.join(" | ")),
            format!("|:---|{}", "---:|".repeat(header.len() - 1)),
        ];
        for method in &self.methods {
            let mut row = vec![method.clone()];
            for class in &self.classes {
                let cell = self
                    .cells
                    .get(&(method.clone(), class.clone()))
                    .map(|m| format!("{:.3}", metric.pick(m)))
                    .unwrap_or_default();
                row.push(cell);
            }
            let mean = self
                .mean(method, metric)
                .map(|m| format!("{}", round3(m)))
                .unwrap_or_default();
            row.push(mean);
            lines.push(format!("| {} |", row.join(" | ")));
        }
        lines.join("\n")
    }

    /// All three tables, each preceded by its title.
    pub fn render(&self) -> String {
        TableMetric::ALL
            .iter()
            .map(|&metric| {
                format!(
                    "{} Results \n\n{} \n\n",
                    metric.title(),
                    self.markdown(metric)
                )
            })
            .collect()
    }

    /// Append the rendered tables to `path`, creating it if needed.
    pub fn append_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        file.write_all(self.render().as_bytes())?;
        Ok(())
    }
}

/// Append `report` to the class score log at `path`.
pub fn append_class_log<P: AsRef<Path>>(report: &ClassReport, path: P) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())?;
    file.write_all(report.log_line().as_bytes())?;
    Ok(())
}
