//! Linear interpolation over sorted sample points.

use thiserror::Error;

/// Errors raised by [`interp`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("{0} lies outside the sampled range [{1}, {2}]")]
    OutOfBounds(f64, f64, f64),
    #[error("need at least two samples to interpolate")]
    InsufficientData,
    #[error("sample x and y lists differ in length")]
    MismatchedLengths,
    #[error("sample x values are not ascending")]
    UnsortedData,
}

/// Linearly interpolate `ys` at position `x`.
///
/// `xs` must be sorted ascending (repeated values are allowed; the last sample
/// of a run of equal x values wins). Points outside `[xs[0], xs[n-1]]` are
/// rejected rather than extrapolated.
///
/// # Examples
///
/// ```
/// use score_math::interp;
///
/// let fpr = [0.0, 0.2, 0.4];
/// let pro = [0.0, 0.5, 0.9];
/// assert!((interp(0.3, &fpr, &pro).unwrap() - 0.7).abs() < 1e-12);
/// ```
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths);
    }
    if xs.len() < 2 {
        return Err(InterpError::InsufficientData);
    }
    if xs.windows(2).any(|w| w[1] < w[0]) {
        return Err(InterpError::UnsortedData);
    }

    let last = xs.len() - 1;
    if x < xs[0] || x > xs[last] {
        return Err(InterpError::OutOfBounds(x, xs[0], xs[last]));
    }

    // First index whose x is strictly greater than the query
    let upper = xs.partition_point(|&v| v <= x);
    if upper == 0 {
        return Ok(ys[0]);
    }
    if upper == xs.len() {
        return Ok(ys[last]);
    }

    let (x0, x1) = (xs[upper - 1], xs[upper]);
    let (y0, y1) = (ys[upper - 1], ys[upper]);
    Ok(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}
