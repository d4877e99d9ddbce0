//! Distance maps between reconstructions and their originals.
//!
//! Every function reduces the channel axis of `(N, C, H, W)` stacks and
//! returns one `(N, H, W)` map per image.

use crate::error::{EvalError, Result};
use imaging::resize_bilinear;
use ndarray::{Array3, Array4, ArrayView4, Axis, Zip};

/// Per-channel mean of the ImageNet training set.
pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation of the ImageNet training set.
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Offset added to differences before the L2 norm, keeping gradients finite at zero.
pub const PAIRWISE_EPS: f64 = 1e-12;

fn check_same_shape(
    context: &'static str,
    reconstructed: &ArrayView4<f64>,
    original: &ArrayView4<f64>,
) -> Result<()> {
    if reconstructed.shape() != original.shape() {
        return Err(EvalError::shape(
            context,
            reconstructed.shape(),
            original.shape(),
        ));
    }
    Ok(())
}

/// Euclidean distance over channels: `sqrt(sum_c (original - reconstructed + eps)^2)`.
///
/// Used in latent space, where the maps are low resolution.
pub fn pairwise_l2(reconstructed: &ArrayView4<f64>, original: &ArrayView4<f64>) -> Result<Array3<f64>> {
    check_same_shape("pairwise distance", reconstructed, original)?;

    let (n, _, h, w) = original.dim();
    let mut out = Array3::zeros((n, h, w));
    for (c_orig, c_rec) in original.axis_iter(Axis(1)).zip(reconstructed.axis_iter(Axis(1))) {
        Zip::from(&mut out)
            .and(&c_orig)
            .and(&c_rec)
            .for_each(|acc, &o, &r| {
                let d = o - r + PAIRWISE_EPS;
                *acc += d * d;
            });
    }
    out.mapv_inplace(f64::sqrt);
    Ok(out)
}

/// Normalize `(N, 3, H, W)` images in `[0, 1]` with the ImageNet statistics.
pub fn imagenet_normalize(images: &ArrayView4<f64>) -> Result<Array4<f64>> {
    let channels = images.len_of(Axis(1));
    if channels != 3 {
        return Err(EvalError::shape(
            "ImageNet normalization",
            images.shape(),
            &[images.len_of(Axis(0)), 3, images.len_of(Axis(2)), images.len_of(Axis(3))],
        ));
    }

    let mut out = images.to_owned();
    for (c, mut plane) in out.axis_iter_mut(Axis(1)).enumerate() {
        let (mean, std) = (IMAGENET_MEAN[c], IMAGENET_STD[c]);
        plane.mapv_inplace(|v| (v - mean) / std);
    }
    Ok(out)
}

/// Mean absolute difference over channels after ImageNet normalization.
///
/// Used in pixel space, where the maps already have image resolution.
pub fn pixel_l1(reconstructed: &ArrayView4<f64>, original: &ArrayView4<f64>) -> Result<Array3<f64>> {
    check_same_shape("pixel distance", reconstructed, original)?;

    let rec = imagenet_normalize(reconstructed)?;
    let orig = imagenet_normalize(original)?;
    let abs_diff = (&rec - &orig).mapv(f64::abs);
    abs_diff
        .mean_axis(Axis(1))
        .ok_or_else(|| EvalError::shape("pixel distance", original.shape(), &[0]))
}

/// Distance between two feature pyramids, accumulated at image resolution.
///
/// For every layer after the first, the mean squared difference over channels
/// is upsampled bilinearly with corner alignment to `resolution` and summed.
/// Layers are `(N, C_l, H_l, W_l)` and must match pairwise.
pub fn feature_distance(
    reconstructed: &[Array4<f64>],
    original: &[Array4<f64>],
    resolution: (usize, usize),
) -> Result<Array3<f64>> {
    if reconstructed.len() != original.len() || original.is_empty() {
        return Err(EvalError::shape(
            "feature pyramid depth",
            &[reconstructed.len()],
            &[original.len()],
        ));
    }

    let n = original[0].len_of(Axis(0));
    let mut out = Array3::zeros((n, resolution.0, resolution.1));

    // The first layer is too shallow to carry semantic differences
    for (rec, orig) in reconstructed.iter().zip(original).skip(1) {
        let (rec, orig) = (rec.view(), orig.view());
        check_same_shape("feature layer", &rec, &orig)?;
        if orig.len_of(Axis(0)) != n {
            return Err(EvalError::shape("feature batch", orig.shape(), &[n]));
        }

        let sq_diff = (&rec - &orig).mapv(|d| d * d);
        let layer_map = sq_diff
            .mean_axis(Axis(1))
            .ok_or_else(|| EvalError::shape("feature layer", orig.shape(), &[0]))?;

        for (mut acc, map) in out.outer_iter_mut().zip(layer_map.outer_iter()) {
            acc += &resize_bilinear(&map, resolution, true)?;
        }
    }
    Ok(out)
}

/// Mean squared error between two equally shaped stacks.
pub fn mse(reconstructed: &ArrayView4<f64>, original: &ArrayView4<f64>) -> Result<f64> {
    check_same_shape("reconstruction loss", reconstructed, original)?;
    if original.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = Zip::from(reconstructed)
        .and(original)
        .fold(0.0, |acc, &r, &o| acc + (r - o) * (r - o));
    Ok(sum / original.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pairwise_l2_reduces_channels() {
        let original = Array4::zeros((2, 4, 3, 3));
        let mut reconstructed = Array4::zeros((2, 4, 3, 3));
        reconstructed.slice_mut(ndarray::s![1, .., 1, 2]).fill(0.5);

        let d = pairwise_l2(&reconstructed.view(), &original.view()).unwrap();
        assert_eq!(d.dim(), (2, 3, 3));
        // sqrt(4 * 0.25) = 1
        assert_relative_eq!(d[[1, 1, 2]], 1.0, epsilon = 1e-9);
        assert!(d[[0, 0, 0]] < 1e-9);
    }

    #[test]
    fn test_pixel_l1_scales_by_channel_std() {
        let original = Array4::zeros((1, 3, 2, 2));
        let mut reconstructed = Array4::zeros((1, 3, 2, 2));
        reconstructed.slice_mut(ndarray::s![0, .., 0, 0]).fill(0.1);

        let d = pixel_l1(&reconstructed.view(), &original.view()).unwrap();
        let expected = (0.1 / 0.229 + 0.1 / 0.224 + 0.1 / 0.225) / 3.0;
        assert_relative_eq!(d[[0, 0, 0]], expected, epsilon = 1e-12);
        assert_relative_eq!(d[[0, 1, 1]], 0.0);
    }

    #[test]
    fn test_identical_inputs_have_zero_pixel_distance() {
        let images = Array4::from_shape_fn((6, 3, 4, 4), |(v, c, y, x)| {
            ((v + c + y * x) % 7) as f64 / 7.0
        });
        let d = pixel_l1(&images.view(), &images.view()).unwrap();
        assert!(d.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let a = Array4::<f64>::zeros((1, 3, 4, 4));
        let b = Array4::<f64>::zeros((1, 3, 4, 5));
        assert!(matches!(
            pairwise_l2(&a.view(), &b.view()),
            Err(EvalError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            pixel_l1(&a.view(), &b.view()),
            Err(EvalError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_feature_distance_skips_first_layer() {
        let shallow_orig = Array4::zeros((1, 2, 8, 8));
        let shallow_rec = Array4::from_elem((1, 2, 8, 8), 5.0);
        let deep_orig = Array4::zeros((1, 4, 2, 2));
        let deep_rec = Array4::from_elem((1, 4, 2, 2), 0.5);

        let d = feature_distance(
            &[shallow_rec, deep_rec],
            &[shallow_orig, deep_orig],
            (8, 8),
        )
        .unwrap();
        assert_eq!(d.dim(), (1, 8, 8));
        for v in d.iter() {
            assert_relative_eq!(*v, 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mse() {
        let a = Array4::from_elem((1, 1, 2, 2), 1.0);
        let b = Array4::zeros((1, 1, 2, 2));
        assert_relative_eq!(mse(&a.view(), &b.view()).unwrap(), 1.0);
    }
}
