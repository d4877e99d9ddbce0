//! Image processing for reconstruction-based anomaly maps.
//!
//! Everything here works on `ndarray` arrays indexed `[row, col]`, with
//! channel-first layouts (`[channel, row, col]`) for colour images.
//!
//! # Module Organization
//!
//! - **gaussian**: Gaussian kernels and the separable blur applied to every
//!   anomaly map
//! - **resize**: bilinear resampling between map and image resolutions
//! - **labeling**: connected-component labelling of ground-truth defect masks
//! - **image**: conversions between ndarray and `image` crate buffers, PNG
//!   loading with resampling, and saving

pub mod error;
pub mod gaussian;
pub mod image;
pub mod labeling;
pub mod resize;

pub use error::ImagingError;
pub use gaussian::{gaussian_kernel_1d, kernel_size_for_sigma, GaussianBlur};
pub use image::{
    array2_to_gray_image, array3_to_rgb_image, gray_image_to_array2, load_mask, load_rgb,
    rgb_image_to_array3, save_gray_map, save_rgb,
};
pub use labeling::{connected_components, Connectivity, LabeledRegions};
pub use resize::resize_bilinear;
