//! Bilinear resampling of 2D maps.
//!
//! Distance maps computed in latent or feature space are much smaller than the
//! input images and must be brought to image resolution before they can be
//! compared against pixel-level ground truth.
//!
//! Sample positions follow the usual deep-learning conventions:
//!
//! - `align_corners = false`: pixels are treated as unit areas, so output pixel
//!   `d` samples source coordinate `(d + 0.5) * in / out - 0.5`, clamped at 0.
//! - `align_corners = true`: the corner pixel centres of input and output
//!   coincide, so `d` samples `d * (in - 1) / (out - 1)`.

use crate::error::ImagingError;
use ndarray::{Array2, ArrayView2};

/// Source taps for one output coordinate: two indices and their weights.
#[derive(Debug, Clone, Copy)]
struct Tap {
    lo: usize,
    hi: usize,
    w_hi: f64,
}

fn taps(in_len: usize, out_len: usize, align_corners: bool) -> Vec<Tap> {
    (0..out_len)
        .map(|d| {
            let src = if align_corners {
                if out_len > 1 {
                    d as f64 * (in_len - 1) as f64 / (out_len - 1) as f64
                } else {
                    0.0
                }
            } else {
                let scale = in_len as f64 / out_len as f64;
                ((d as f64 + 0.5) * scale - 0.5).max(0.0)
            };
            let lo = (src.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            Tap {
                lo,
                hi,
                w_hi: src - lo as f64,
            }
        })
        .collect()
}

/// Resize `map` to `(rows, cols)` with bilinear interpolation.
///
/// The output always has exactly the requested shape. Resizing to the input's
/// own shape without corner alignment reproduces the input exactly.
pub fn resize_bilinear(
    map: &ArrayView2<f64>,
    (rows, cols): (usize, usize),
    align_corners: bool,
) -> Result<Array2<f64>, ImagingError> {
    let (in_rows, in_cols) = map.dim();
    if in_rows == 0 || in_cols == 0 {
        return Err(ImagingError::EmptyInput {
            rows: in_rows,
            cols: in_cols,
        });
    }
    if rows == 0 || cols == 0 {
        return Err(ImagingError::EmptyTarget { rows, cols });
    }

    let row_taps = taps(in_rows, rows, align_corners);
    let col_taps = taps(in_cols, cols, align_corners);

    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| {
        let rt = row_taps[r];
        let ct = col_taps[c];
        let top = map[[rt.lo, ct.lo]] * (1.0 - ct.w_hi) + map[[rt.lo, ct.hi]] * ct.w_hi;
        let bottom = map[[rt.hi, ct.lo]] * (1.0 - ct.w_hi) + map[[rt.hi, ct.hi]] * ct.w_hi;
        top * (1.0 - rt.w_hi) + bottom * rt.w_hi
    }))
}
