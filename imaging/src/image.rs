//! Conversions between ndarray arrays and `image` crate buffers.
//!
//! - **ndarray**: matrix indexing `[row, col]` with `(height, width)` shape;
//!   colour images are channel-first `[channel, row, col]`
//! - **image crate**: graphics indexing `(x, y)` with `(width, height)` size
//!
//! Floating point arrays hold intensities in `[0, 1]`; values outside that
//! range are clamped on export.

use crate::error::ImagingError;
use image::imageops::FilterType;
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::path::Path;

fn to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert an 8-bit RGB image to a `(3, height, width)` array scaled to `[0, 1]`.
pub fn rgb_image_to_array3(img: &RgbImage) -> Array3<f64> {
    let (width, height) = img.dimensions();
    Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
        img.get_pixel(x as u32, y as u32)[c] as f64 / 255.0
    })
}

/// Convert a `(3, height, width)` array in `[0, 1]` to an 8-bit RGB image.
pub fn array3_to_rgb_image(arr: &ArrayView3<f64>) -> Result<RgbImage, ImagingError> {
    let (channels, height, width) = arr.dim();
    if channels != 3 {
        return Err(ImagingError::ChannelCount {
            expected: 3,
            found: channels,
        });
    }
    Ok(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            to_u8(arr[[0, y, x]]),
            to_u8(arr[[1, y, x]]),
            to_u8(arr[[2, y, x]]),
        ])
    }))
}

/// Convert an 8-bit grayscale image to a `(height, width)` array scaled to `[0, 1]`.
pub fn gray_image_to_array2(img: &GrayImage) -> Array2<f64> {
    let (width, height) = img.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32)[0] as f64 / 255.0
    })
}

/// Convert a `(height, width)` array in `[0, 1]` to an 8-bit grayscale image.
pub fn array2_to_gray_image(arr: &ArrayView2<f64>) -> GrayImage {
    let (height, width) = arr.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        Luma([to_u8(arr[[y as usize, x as usize]])])
    })
}

/// Load an image as RGB, resampled to `size x size` with bicubic (Catmull-Rom) filtering.
pub fn load_rgb<P: AsRef<Path>>(path: P, size: u32) -> Result<Array3<f64>, ImagingError> {
    let img = image::open(path.as_ref())?.to_rgb8();
    log::trace!(
        "Loaded {} ({}x{})",
        path.as_ref().display(),
        img.width(),
        img.height()
    );
    let resized = image::imageops::resize(&img, size, size, FilterType::CatmullRom);
    Ok(rgb_image_to_array3(&resized))
}

/// Load a ground-truth mask resampled to `size x size` with nearest-neighbour
/// filtering and binarized at 0.5.
///
/// Also returns whether the mask at its original resolution contains any
/// non-zero pixel, which decides the sample label.
pub fn load_mask<P: AsRef<Path>>(path: P, size: u32) -> Result<(Array2<f64>, bool), ImagingError> {
    let img = image::open(path.as_ref())?.to_luma8();
    let any_defect = img.pixels().any(|p| p[0] > 0);
    let resized = image::imageops::resize(&img, size, size, FilterType::Nearest);
    let mask = gray_image_to_array2(&resized).mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });
    Ok((mask, any_defect))
}

/// Save a `(3, height, width)` array as an 8-bit RGB image.
pub fn save_rgb<P: AsRef<Path>>(arr: &ArrayView3<f64>, path: P) -> Result<(), ImagingError> {
    array3_to_rgb_image(arr)?.save(path.as_ref())?;
    Ok(())
}

/// Save a single-channel map in `[0, 1]` as an 8-bit grayscale image.
pub fn save_gray_map<P: AsRef<Path>>(arr: &ArrayView2<f64>, path: P) -> Result<(), ImagingError> {
    array2_to_gray_image(arr).save(path.as_ref())?;
    Ok(())
}
