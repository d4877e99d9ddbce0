//! Trapezoid-rule integration of sampled curves.
//!
//! Curves such as ROC or per-region overlap are only known at a finite set of
//! operating points. [`trapezoid_until`] integrates such a curve up to an upper
//! x limit, linearly interpolating the curve where the limit falls between two
//! samples.

use crate::interp::{interp, InterpError};
use thiserror::Error;

/// Errors from curve integration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrateError {
    #[error("x and y must have the same length (x: {x_len}, y: {y_len})")]
    MismatchedLengths { x_len: usize, y_len: usize },
    #[error("integration limit {limit} lies outside the sampled range [{min}, {max}]")]
    LimitOutOfRange { limit: f64, min: f64, max: f64 },
    #[error("curve has no finite samples")]
    NoFiniteSamples,
    #[error("cannot interpolate at the integration limit: {0}")]
    Interp(#[from] InterpError),
}

/// Integrate `y(x)` with the trapezoid rule.
///
/// `xs` is expected to be sorted ascending; segments with decreasing x
/// contribute negative area exactly as the plain rule would.
pub fn trapezoid(xs: &[f64], ys: &[f64]) -> Result<f64, IntegrateError> {
    if xs.len() != ys.len() {
        return Err(IntegrateError::MismatchedLengths {
            x_len: xs.len(),
            y_len: ys.len(),
        });
    }

    Ok(xs
        .windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
        .sum())
}

/// Integrate `y(x)` from the first sample up to `x_max`.
///
/// Pairs where either coordinate is not finite are dropped first. If `x_max`
/// is not itself a sample point, the curve is linearly interpolated at
/// `x_max` and the partial segment is added to the area of all samples with
/// `x <= x_max`. `xs` must be sorted ascending.
///
/// # Examples
///
/// ```
/// use score_math::trapezoid_until;
///
/// // y = 1 over [0, 1], integrated to 0.3
/// let area = trapezoid_until(&[0.0, 1.0], &[1.0, 1.0], 0.3).unwrap();
/// assert!((area - 0.3).abs() < 1e-12);
/// ```
pub fn trapezoid_until(xs: &[f64], ys: &[f64], x_max: f64) -> Result<f64, IntegrateError> {
    if xs.len() != ys.len() {
        return Err(IntegrateError::MismatchedLengths {
            x_len: xs.len(),
            y_len: ys.len(),
        });
    }

    let (xs, ys): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .unzip();

    if xs.is_empty() {
        return Err(IntegrateError::NoFiniteSamples);
    }

    let mut correction = 0.0;
    if !xs.contains(&x_max) {
        let ins = xs.partition_point(|&x| x <= x_max);
        if ins == 0 || ins == xs.len() {
            return Err(IntegrateError::LimitOutOfRange {
                limit: x_max,
                min: xs[0],
                max: xs[xs.len() - 1],
            });
        }
        let (x0, y0) = (xs[ins - 1], ys[ins - 1]);
        let y_at_limit = interp(x_max, &xs, &ys)?;
        correction = 0.5 * (y_at_limit + y0) * (x_max - x0);
    }

    let keep = xs.partition_point(|&x| x <= x_max);
    Ok(trapezoid(&xs[..keep], &ys[..keep])? + correction)
}
