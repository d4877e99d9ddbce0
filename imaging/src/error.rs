//! Error type shared by the imaging operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("image I/O failed: {0}")]
    Image(#[from] ::image::ImageError),
    #[error("cannot resample an empty array of shape {rows}x{cols}")]
    EmptyInput { rows: usize, cols: usize },
    #[error("target size {rows}x{cols} must be non-zero")]
    EmptyTarget { rows: usize, cols: usize },
    #[error("expected {expected} channels, found {found}")]
    ChannelCount { expected: usize, found: usize },
}
