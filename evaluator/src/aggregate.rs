//! Reduction of per-view distance maps to one map and one image score.
//!
//! Each lighting view yields its own distance map. Two reductions are
//! supported, chosen per run:
//!
//! - [`ScorePolicy::Mean`]: average the views per pixel, score is the largest
//!   averaged pixel.
//! - [`ScorePolicy::Max`]: take the worst view per pixel, score is the value at
//!   the arg-max pixel of that map (which also identifies the worst view).
//!
//! Ties are broken towards the lowest view index and the first pixel in
//! raster order, so both reductions are deterministic.

use crate::error::{EvalError, Result};
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// How per-view maps are combined.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Per-pixel mean across views, then the maximum pixel
    #[default]
    Mean,
    /// Per-pixel maximum across views, then the maximum pixel
    Max,
}

/// Location of the pixel that determined the image score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    /// View that produced the peak; `None` for the mean reduction
    pub view: Option<usize>,
    pub row: usize,
    pub col: usize,
}

/// Combined map and score for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub map: Array2<f64>,
    pub score: f64,
    pub peak: Peak,
}

/// First arg-max in raster order.
fn argmax(map: &ArrayView2<f64>) -> (usize, usize, f64) {
    let mut best = (0, 0, f64::NEG_INFINITY);
    for ((r, c), &v) in map.indexed_iter() {
        if v > best.2 {
            best = (r, c, v);
        }
    }
    best
}

/// Reduce a `(views, h, w)` stack according to `policy`.
pub fn aggregate_views(maps: &ArrayView3<f64>, policy: ScorePolicy) -> Result<Aggregate> {
    let (views, h, w) = maps.dim();
    if views == 0 {
        return Err(EvalError::NoViews);
    }
    if h == 0 || w == 0 {
        return Err(EvalError::Empty);
    }

    match policy {
        ScorePolicy::Mean => {
            let map = maps.mean_axis(Axis(0)).ok_or(EvalError::NoViews)?;
            let (row, col, score) = argmax(&map.view());
            Ok(Aggregate {
                map,
                score,
                peak: Peak {
                    view: None,
                    row,
                    col,
                },
            })
        }
        ScorePolicy::Max => {
            let mut map = maps.index_axis(Axis(0), 0).to_owned();
            let mut source = Array2::<usize>::zeros((h, w));
            for (view, layer) in maps.outer_iter().enumerate().skip(1) {
                ndarray::Zip::from(&mut map)
                    .and(&mut source)
                    .and(&layer)
                    .for_each(|m, s, &v| {
                        if v > *m {
                            *m = v;
                            *s = view;
                        }
                    });
            }
            let (row, col, score) = argmax(&map.view());
            Ok(Aggregate {
                score,
                peak: Peak {
                    view: Some(source[[row, col]]),
                    row,
                    col,
                },
                map,
            })
        }
    }
}
