//! PNG artifacts written during and after an evaluation run.

use crate::error::{EvalError, Result};
use crate::sample::AnomalyMap;
use imaging::{save_gray_map, save_rgb};
use ndarray::{s, Array2, Array3, ArrayView4};
use std::fs;
use std::path::{Path, PathBuf};

/// Save inputs and reconstructions side by side: inputs on the top row,
/// their reconstructions directly below.
///
/// Both stacks are `(N, 3, H, W)` in `[0, 1]`.
pub fn save_reconstruction_strip<P: AsRef<Path>>(
    originals: &ArrayView4<f64>,
    reconstructions: &ArrayView4<f64>,
    path: P,
) -> Result<()> {
    if originals.shape() != reconstructions.shape() {
        return Err(EvalError::shape(
            "reconstruction strip",
            originals.shape(),
            reconstructions.shape(),
        ));
    }

    let (n, c, h, w) = originals.dim();
    let mut canvas = Array3::zeros((c, 2 * h, n * w));
    for (i, (orig, rec)) in originals
        .outer_iter()
        .zip(reconstructions.outer_iter())
        .enumerate()
    {
        let cols = i * w..(i + 1) * w;
        canvas.slice_mut(s![.., 0..h, cols.clone()]).assign(&orig);
        canvas.slice_mut(s![.., h..2 * h, cols]).assign(&rec);
    }

    save_rgb(&canvas.view(), path.as_ref())?;
    log::trace!("Wrote reconstruction strip {}", path.as_ref().display());
    Ok(())
}

/// Save every anomaly map next to its ground-truth mask.
///
/// Maps share one min-max normalization across the whole class so that
/// brightness is comparable between samples. Files are named
/// `NNN_map.png` and `NNN_mask.png`; returns the map paths.
pub fn save_heatmaps<P: AsRef<Path>>(
    maps: &[AnomalyMap],
    masks: &[Array2<f64>],
    dir: P,
) -> Result<Vec<PathBuf>> {
    if maps.len() != masks.len() {
        return Err(EvalError::shape("heatmaps/masks", &[maps.len()], &[masks.len()]));
    }
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let (lo, hi) = maps
        .iter()
        .flat_map(|m| m.view().iter().copied().collect::<Vec<_>>())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;

    let mut written = Vec::with_capacity(maps.len());
    for (i, (map, mask)) in maps.iter().zip(masks).enumerate() {
        let normalized = if range > 0.0 {
            map.view().mapv(|v| (v - lo) / range)
        } else {
            Array2::zeros(map.dim())
        };

        let map_path = dir.join(format!("{i:03}_map.png"));
        save_gray_map(&normalized.view(), &map_path)?;
        save_gray_map(&mask.view(), dir.join(format!("{i:03}_mask.png")))?;
        written.push(map_path);
    }
    log::info!("Saved {} heatmaps to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imaging::gray_image_to_array2;
    use ndarray::Array4;
    use tempfile::TempDir;

    #[test]
    fn test_strip_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strip.png");
        let originals = Array4::from_elem((2, 3, 4, 5), 1.0);
        let recs = Array4::zeros((2, 3, 4, 5));

        save_reconstruction_strip(&originals.view(), &recs.view(), &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (10, 8));
        assert_eq!(img.get_pixel(9, 0)[0], 255);
        assert_eq!(img.get_pixel(0, 7)[0], 0);
    }

    #[test]
    fn test_strip_shape_mismatch() {
        let dir = TempDir::new().unwrap();
        let a = Array4::zeros((2, 3, 4, 4));
        let b = Array4::zeros((1, 3, 4, 4));
        assert!(save_reconstruction_strip(&a.view(), &b.view(), dir.path().join("x.png")).is_err());
    }

    #[test]
    fn test_heatmaps_share_normalization() {
        let dir = TempDir::new().unwrap();
        let low = AnomalyMap::new(Array2::from_elem((3, 3), 1.0), (3, 3)).unwrap();
        let high = AnomalyMap::new(Array2::from_elem((3, 3), 3.0), (3, 3)).unwrap();
        let masks = vec![Array2::zeros((3, 3)), Array2::ones((3, 3))];

        let paths = save_heatmaps(&[low, high], &masks, dir.path().join("heat")).unwrap();
        assert_eq!(paths.len(), 2);

        let first = gray_image_to_array2(&image::open(&paths[0]).unwrap().to_luma8());
        let second = gray_image_to_array2(&image::open(&paths[1]).unwrap().to_luma8());
        assert_eq!(first[[1, 1]], 0.0);
        assert_eq!(second[[1, 1]], 1.0);
        assert!(dir.path().join("heat/001_mask.png").exists());
    }
}
