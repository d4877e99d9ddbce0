//! Receiver operating characteristic curves.
//!
//! Scores are ranked from most to least anomalous. Every distinct score value
//! is one operating point, so tied scores move the curve diagonally instead of
//! being broken in an arbitrary order. The area under the curve therefore
//! counts a tied (positive, negative) pair as half a correct ranking.

use thiserror::Error;

/// Errors from ROC computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RocError {
    #[error("labels and scores differ in length (labels: {labels}, scores: {scores})")]
    MismatchedLengths { labels: usize, scores: usize },
    #[error("no samples to rank")]
    Empty,
    #[error("only one class present in labels ({positives} positive, {negatives} negative); ROC AUC is undefined")]
    SingleClass { positives: usize, negatives: usize },
    #[error("score at index {index} is not finite ({value})")]
    NonFinite { index: usize, value: f64 },
}

/// A ROC curve, one point per distinct score threshold plus the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    /// False positive rate at each operating point, non-decreasing
    pub fpr: Vec<f64>,
    /// True positive rate at each operating point, non-decreasing
    pub tpr: Vec<f64>,
    /// Score threshold of each operating point; the origin uses +infinity
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    /// Area under the curve via the trapezoid rule.
    pub fn auc(&self) -> f64 {
        self.fpr
            .windows(2)
            .zip(self.tpr.windows(2))
            .map(|(x, y)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
            .sum()
    }
}

/// Compute the ROC curve of `scores` against binary `labels` (true = anomalous).
pub fn roc_curve(labels: &[bool], scores: &[f64]) -> Result<RocCurve, RocError> {
    if labels.len() != scores.len() {
        return Err(RocError::MismatchedLengths {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    if labels.is_empty() {
        return Err(RocError::Empty);
    }
    if let Some((index, &value)) = scores.iter().enumerate().find(|(_, s)| !s.is_finite()) {
        return Err(RocError::NonFinite { index, value });
    }

    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(RocError::SingleClass {
            positives,
            negatives,
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];

    let mut tp = 0usize;
    let mut fp = 0usize;
    for (rank, &idx) in order.iter().enumerate() {
        if labels[idx] {
            tp += 1;
        } else {
            fp += 1;
        }

        // Emit a point only at the last sample of each run of equal scores
        let run_ends = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if run_ends {
            fpr.push(fp as f64 / negatives as f64);
            tpr.push(tp as f64 / positives as f64);
            thresholds.push(scores[idx]);
        }
    }

    Ok(RocCurve {
        fpr,
        tpr,
        thresholds,
    })
}

/// Area under the ROC curve of `scores` against `labels`.
///
/// Fails with [`RocError::SingleClass`] when the labels contain only one class,
/// since the true or false positive rate is then undefined.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Result<f64, RocError> {
    Ok(roc_curve(labels, scores)?.auc())
}
