//! Error types for refmatch.

use thiserror::Error;

/// Result alias for refmatch operations.
pub type RefMatchResult<T> = std::result::Result<T, RefMatchError>;

/// Errors returned for caller mistakes and I/O failures.
///
/// Per-reference outcomes such as too few matches are not errors; they are
/// reported as [`crate::select::Rejection`] values.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RefMatchError {
    /// Width or height is zero or overflows.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    /// Stride is smaller than the row width.
    #[error("invalid stride {stride} for width {width}")]
    InvalidStride { width: usize, stride: usize },
    /// The backing buffer cannot hold the described image.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// A region of interest does not fit inside the image.
    #[error(
        "roi ({x}, {y}, {width}x{height}) out of bounds for image {img_width}x{img_height}"
    )]
    RoiOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        img_width: usize,
        img_height: usize,
    },
    /// A configuration value is outside its valid range.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: &'static str },
    /// Two descriptor sets cannot be compared.
    #[error("descriptor mismatch: {reason}")]
    DescriptorMismatch { reason: &'static str },
    /// An index is outside a collection.
    #[error("index {index} out of bounds for {context} (len {len})")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        context: &'static str,
    },
    /// No reference images were supplied.
    #[error("reference set is empty")]
    EmptyReferenceSet,
    /// Image decoding or encoding failed.
    #[error("image i/o failed: {reason}")]
    ImageIo { reason: String },
    /// Model loading or inference failed.
    #[error("inference failed: {reason}")]
    Inference { reason: String },
}
