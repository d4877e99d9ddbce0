//! Accumulation of per-sample predictions and computation of the detection metrics.
//!
//! A [`MetricsCalculator`] lives for the evaluation of one object class. The
//! evaluation loop records one entry per sample while the calculator is
//! [`CalculatorState::Accumulating`]; [`MetricsCalculator::finalize`] computes
//! the metrics and moves it to [`CalculatorState::Finalized`], after which
//! nothing more can be recorded.

use crate::error::{EvalError, Result};
use crate::pro::{au_pro, DEFAULT_INTEGRATION_LIMIT, DEFAULT_NUM_THRESHOLDS};
use crate::sample::{AnomalyMap, Label};
use ndarray::{Array2, ArrayView2};
use score_math::{roc_auc, RocError};
use serde::{Deserialize, Serialize};

/// Lifecycle of a calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculatorState {
    /// Collecting predictions from the evaluation loop
    Accumulating,
    /// Metrics computed; further recording is rejected
    Finalized,
}

/// Detection metrics for one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// ROC AUC of image scores against image labels
    pub image_rocauc: f64,
    /// ROC AUC of all pixel scores against all pixel labels
    pub pixel_rocauc: f64,
    /// Normalized area under the per-region overlap curve
    pub au_pro: f64,
}

/// Accumulated evaluation state for one object class.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    resolution: (usize, usize),
    integration_limit: f64,
    num_thresholds: usize,
    state: CalculatorState,
    image_scores: Vec<f64>,
    image_labels: Vec<Label>,
    anomaly_maps: Vec<AnomalyMap>,
    masks: Vec<Array2<f64>>,
    metrics: Option<Metrics>,
}

impl MetricsCalculator {
    /// Calculator for square `image_size` maps with the standard AU-PRO settings.
    pub fn new(image_size: usize) -> Self {
        Self::with_pro_settings(image_size, DEFAULT_INTEGRATION_LIMIT, DEFAULT_NUM_THRESHOLDS)
    }

    pub fn with_pro_settings(
        image_size: usize,
        integration_limit: f64,
        num_thresholds: usize,
    ) -> Self {
        Self {
            resolution: (image_size, image_size),
            integration_limit,
            num_thresholds,
            state: CalculatorState::Accumulating,
            image_scores: Vec::new(),
            image_labels: Vec::new(),
            anomaly_maps: Vec::new(),
            masks: Vec::new(),
            metrics: None,
        }
    }

    pub fn state(&self) -> CalculatorState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.image_scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_scores.is_empty()
    }

    pub fn image_scores(&self) -> &[f64] {
        &self.image_scores
    }

    pub fn image_labels(&self) -> &[Label] {
        &self.image_labels
    }

    pub fn anomaly_maps(&self) -> &[AnomalyMap] {
        &self.anomaly_maps
    }

    pub fn masks(&self) -> &[Array2<f64>] {
        &self.masks
    }

    /// Append one sample's image score, label, anomaly map and ground-truth mask.
    pub fn record(
        &mut self,
        image_score: f64,
        label: Label,
        anomaly_map: AnomalyMap,
        mask: &ArrayView2<f64>,
    ) -> Result<()> {
        if self.state == CalculatorState::Finalized {
            return Err(EvalError::AlreadyFinalized);
        }
        if anomaly_map.dim() != self.resolution {
            return Err(EvalError::Resolution {
                found: anomaly_map.dim(),
                expected: self.resolution,
            });
        }
        if mask.dim() != anomaly_map.dim() {
            return Err(EvalError::shape(
                "anomaly map/mask",
                anomaly_map.view().shape(),
                mask.shape(),
            ));
        }

        self.image_scores.push(image_score);
        self.image_labels.push(label);
        self.anomaly_maps.push(anomaly_map);
        self.masks.push(mask.to_owned());
        Ok(())
    }

    /// Compute image ROC AUC, pixel ROC AUC and AU-PRO over everything recorded.
    ///
    /// Fails when nothing was recorded or when either level has a single
    /// label class. On success the calculator is finalized; calling again
    /// returns the same metrics.
    pub fn finalize(&mut self) -> Result<Metrics> {
        if let Some(metrics) = self.metrics {
            return Ok(metrics);
        }
        if self.is_empty() {
            return Err(EvalError::Empty);
        }

        let image_labels: Vec<bool> = self.image_labels.iter().map(|l| l.is_anomalous()).collect();
        let image_rocauc = roc_auc(&image_labels, &self.image_scores)
            .map_err(|e| single_class_at("image", e))?;

        let pixel_scores: Vec<f64> = self
            .anomaly_maps
            .iter()
            .flat_map(|m| m.view().iter().copied().collect::<Vec<_>>())
            .collect();
        let pixel_labels: Vec<bool> = self
            .masks
            .iter()
            .flat_map(|m| m.iter().map(|&v| v > 0.5).collect::<Vec<_>>())
            .collect();
        if pixel_scores.len() != pixel_labels.len() {
            return Err(EvalError::shape(
                "pixel predictions/labels",
                &[pixel_scores.len()],
                &[pixel_labels.len()],
            ));
        }
        let pixel_rocauc = roc_auc(&pixel_labels, &pixel_scores)
            .map_err(|e| single_class_at("pixel", e))?;

        let maps: Vec<ArrayView2<f64>> = self.anomaly_maps.iter().map(|m| m.view()).collect();
        let masks: Vec<ArrayView2<f64>> = self.masks.iter().map(|m| m.view()).collect();
        let (au_pro, _) = au_pro(&maps, &masks, self.integration_limit, self.num_thresholds)?;

        let metrics = Metrics {
            image_rocauc,
            pixel_rocauc,
            au_pro,
        };
        log::debug!(
            "Finalized {} samples: image {:.3}, pixel {:.3}, AU-PRO {:.3}",
            self.len(),
            metrics.image_rocauc,
            metrics.pixel_rocauc,
            metrics.au_pro
        );

        self.metrics = Some(metrics);
        self.state = CalculatorState::Finalized;
        Ok(metrics)
    }
}

fn single_class_at(level: &'static str, err: RocError) -> EvalError {
    match err {
        RocError::SingleClass {
            positives,
            negatives,
        } => EvalError::SingleClass {
            level,
            positives,
            negatives,
        },
        other => EvalError::Roc(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn map(values: Array2<f64>) -> AnomalyMap {
        let dim = values.dim();
        AnomalyMap::new(values, dim).unwrap()
    }

    #[test]
    fn test_perfect_pixel_separation() {
        let mut calc = MetricsCalculator::new(2);
        let defect = array![[1.0, 0.0], [0.0, 1.0]];
        let clean = Array2::zeros((2, 2));

        calc.record(1.0, Label::Anomalous, map(defect.clone()), &defect.view())
            .unwrap();
        calc.record(0.0, Label::Normal, map(clean.clone()), &clean.view())
            .unwrap();

        let metrics = calc.finalize().unwrap();
        assert_relative_eq!(metrics.pixel_rocauc, 1.0);
        assert_relative_eq!(metrics.image_rocauc, 1.0);
        assert_relative_eq!(metrics.au_pro, 1.0, epsilon = 1e-12);
        assert_eq!(calc.state(), CalculatorState::Finalized);
    }

    #[test]
    fn test_single_class_fails() {
        let mut calc = MetricsCalculator::new(2);
        let clean = Array2::zeros((2, 2));
        calc.record(0.3, Label::Normal, map(clean.clone()), &clean.view())
            .unwrap();
        calc.record(0.1, Label::Normal, map(clean.clone()), &clean.view())
            .unwrap();

        let err = calc.finalize().unwrap_err();
        assert!(matches!(
            err,
            EvalError::SingleClass {
                level: "image",
                positives: 0,
                negatives: 2
            }
        ));
        assert_eq!(calc.state(), CalculatorState::Accumulating);
    }

    #[test]
    fn test_pixel_level_single_class_fails() {
        // Image labels differ but no pixel is marked defective
        let mut calc = MetricsCalculator::new(2);
        let clean = Array2::zeros((2, 2));
        calc.record(0.9, Label::Anomalous, map(clean.clone()), &clean.view())
            .unwrap();
        calc.record(0.1, Label::Normal, map(clean.clone()), &clean.view())
            .unwrap();

        assert!(matches!(
            calc.finalize(),
            Err(EvalError::SingleClass { level: "pixel", .. })
        ));
    }

    #[test]
    fn test_empty_fails() {
        assert!(matches!(
            MetricsCalculator::new(4).finalize(),
            Err(EvalError::Empty)
        ));
    }

    #[test]
    fn test_rejects_wrong_resolution_and_mask_shape() {
        let mut calc = MetricsCalculator::new(4);
        let small = Array2::zeros((2, 2));
        assert!(matches!(
            calc.record(0.0, Label::Normal, map(small.clone()), &small.view()),
            Err(EvalError::Resolution { .. })
        ));

        let full = Array2::zeros((4, 4));
        assert!(matches!(
            calc.record(0.0, Label::Normal, map(full), &small.view()),
            Err(EvalError::ShapeMismatch { .. })
        ));
        assert!(calc.is_empty());
    }

    #[test]
    fn test_no_recording_after_finalize() {
        let mut calc = MetricsCalculator::new(2);
        let defect = array![[1.0, 0.0], [0.0, 0.0]];
        let clean = Array2::zeros((2, 2));
        calc.record(0.8, Label::Anomalous, map(defect.clone()), &defect.view())
            .unwrap();
        calc.record(0.2, Label::Normal, map(clean.clone()), &clean.view())
            .unwrap();

        let first = calc.finalize().unwrap();
        assert!(matches!(
            calc.record(0.5, Label::Normal, map(clean.clone()), &clean.view()),
            Err(EvalError::AlreadyFinalized)
        ));
        assert_eq!(calc.finalize().unwrap(), first);
        assert_eq!(calc.len(), 2);
    }
}
