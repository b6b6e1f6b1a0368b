//! Convenience helpers for loading and encoding images via the `image` crate.
//!
//! Available when the `image-io` feature is enabled.

use crate::image::{ImageView, OwnedImage};
use crate::util::{RefMatchError, RefMatchResult};
use image::codecs::jpeg::JpegEncoder;
use std::path::Path;

fn io_error(err: image::ImageError) -> RefMatchError {
    RefMatchError::ImageIo {
        reason: err.to_string(),
    }
}

/// Creates a borrowed view from a grayscale image buffer.
pub fn view_from_gray_image(img: &image::GrayImage) -> RefMatchResult<ImageView<'_, u8>> {
    ImageView::from_slice(img.as_raw(), img.width() as usize, img.height() as usize)
}

/// Creates an owned grayscale image from a dynamic image.
pub fn owned_from_dynamic_image(img: &image::DynamicImage) -> RefMatchResult<OwnedImage> {
    let gray = img.to_luma8();
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    OwnedImage::new(gray.into_raw(), width, height)
}

/// Converts an owned grayscale image back into an `image` buffer.
pub fn to_gray_image(img: &OwnedImage) -> RefMatchResult<image::GrayImage> {
    image::GrayImage::from_raw(img.width() as u32, img.height() as u32, img.data().to_vec())
        .ok_or(RefMatchError::BufferTooSmall {
            needed: img.width() * img.height(),
            got: img.data().len(),
        })
}

/// Loads an image from disk and converts it to a grayscale owned image.
pub fn load_gray_image<P: AsRef<Path>>(path: P) -> RefMatchResult<OwnedImage> {
    let img = image::open(path).map_err(io_error)?;
    owned_from_dynamic_image(&img)
}

/// Decodes an encoded still (JPEG, PNG) from memory.
pub fn decode_image(bytes: &[u8]) -> RefMatchResult<image::DynamicImage> {
    image::load_from_memory(bytes).map_err(io_error)
}

/// Encodes an RGB image as JPEG with the given quality (1-100).
pub fn encode_jpeg(img: &image::RgbImage, quality: u8) -> RefMatchResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(img)
        .map_err(io_error)?;
    Ok(buf)
}

/// Saves any `image` buffer, picking the format from the path extension.
pub fn save_image<P: AsRef<Path>>(img: &image::DynamicImage, path: P) -> RefMatchResult<()> {
    img.save(path).map_err(io_error)
}
