//! Per-region overlap (PRO) curve and the normalized area under it.
//!
//! Each connected defect in the ground truth is one region. At a given score
//! threshold a region's overlap is the fraction of its pixels scored above the
//! threshold; the PRO value is the mean overlap over all regions, so a small
//! defect counts as much as a large one. Thresholds are taken from the sorted
//! scores of defect-free pixels, which fixes the false positive rate of each
//! operating point. The area is integrated up to a false positive rate limit
//! and divided by that limit, so a perfect detector scores 1.

use crate::error::{EvalError, Result};
use imaging::{connected_components, Connectivity};
use ndarray::ArrayView2;
use score_math::trapezoid_until;

/// False positive rate up to which the PRO curve is integrated.
pub const DEFAULT_INTEGRATION_LIMIT: f64 = 0.3;
/// Number of thresholds sampled along the defect-free score distribution.
pub const DEFAULT_NUM_THRESHOLDS: usize = 100;

/// PRO curve sorted by ascending false positive rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ProCurve {
    pub fpr: Vec<f64>,
    pub pro: Vec<f64>,
}

/// Scores of one ground-truth region, swept with increasing thresholds.
struct RegionScores {
    sorted: Vec<f64>,
    below: usize,
}

impl RegionScores {
    fn new(mut scores: Vec<f64>) -> Self {
        scores.sort_by(f64::total_cmp);
        Self {
            sorted: scores,
            below: 0,
        }
    }

    /// Fraction of the region scored strictly above `threshold`.
    ///
    /// Thresholds must be passed in non-decreasing order.
    fn overlap(&mut self, threshold: f64) -> f64 {
        while self.below < self.sorted.len() && self.sorted[self.below] <= threshold {
            self.below += 1;
        }
        1.0 - self.below as f64 / self.sorted.len() as f64
    }
}

/// Split scores into per-region lists and the sorted defect-free scores.
fn collect_scores(
    maps: &[ArrayView2<f64>],
    masks: &[ArrayView2<f64>],
) -> Result<(Vec<RegionScores>, Vec<f64>)> {
    if maps.len() != masks.len() {
        return Err(EvalError::shape(
            "PRO inputs",
            &[maps.len()],
            &[masks.len()],
        ));
    }

    let mut regions = Vec::new();
    let mut normal_scores = Vec::new();

    for (map, mask) in maps.iter().zip(masks) {
        if map.dim() != mask.dim() {
            return Err(EvalError::shape("PRO map/mask", map.shape(), mask.shape()));
        }

        let binary = mask.mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });
        let labeled = connected_components(&binary.view(), Connectivity::Eight);

        let mut per_region = vec![Vec::new(); labeled.count];
        for (&label, &score) in labeled.labels.iter().zip(map.iter()) {
            if label == 0 {
                normal_scores.push(score);
            } else {
                per_region[label - 1].push(score);
            }
        }
        regions.extend(per_region.into_iter().map(RegionScores::new));
    }

    normal_scores.sort_by(f64::total_cmp);
    Ok((regions, normal_scores))
}

/// Compute the PRO curve over a set of anomaly maps and their masks.
pub fn pro_curve(
    maps: &[ArrayView2<f64>],
    masks: &[ArrayView2<f64>],
    num_thresholds: usize,
) -> Result<ProCurve> {
    let (mut regions, normal_scores) = collect_scores(maps, masks)?;
    if regions.is_empty() {
        return Err(EvalError::NoDefectRegions);
    }
    if normal_scores.is_empty() {
        return Err(EvalError::NoNormalPixels);
    }

    let n = normal_scores.len();
    let num_thresholds = num_thresholds.max(1);
    let step = if num_thresholds > 1 {
        (n - 1) as f64 / (num_thresholds - 1) as f64
    } else {
        0.0
    };

    let mut fpr = Vec::with_capacity(num_thresholds + 1);
    let mut pro = Vec::with_capacity(num_thresholds + 1);
    fpr.push(1.0);
    pro.push(1.0);

    for i in 0..num_thresholds {
        let pos = if i + 1 == num_thresholds && num_thresholds > 1 {
            n - 1
        } else {
            (i as f64 * step) as usize
        };
        let threshold = normal_scores[pos];

        let overlap: f64 = regions.iter_mut().map(|r| r.overlap(threshold)).sum();
        fpr.push(1.0 - (pos + 1) as f64 / n as f64);
        pro.push(overlap / regions.len() as f64);
    }

    fpr.reverse();
    pro.reverse();
    Ok(ProCurve { fpr, pro })
}

/// Area under the PRO curve up to `integration_limit`, normalized by the limit.
pub fn au_pro(
    maps: &[ArrayView2<f64>],
    masks: &[ArrayView2<f64>],
    integration_limit: f64,
    num_thresholds: usize,
) -> Result<(f64, ProCurve)> {
    let curve = pro_curve(maps, masks, num_thresholds)?;
    let area = trapezoid_until(&curve.fpr, &curve.pro, integration_limit)?;
    Ok((area / integration_limit, curve))
}
