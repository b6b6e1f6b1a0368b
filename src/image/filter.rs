//! Photometric and resampling filters.
//!
//! Borders use reflect-101 (`gfedcb|abcdefgh|gfedcba`) for convolution and
//! clamping for resampling. All filters are deterministic and return new
//! buffers.

use crate::image::{FloatImage, ImageView, OwnedImage};
use crate::util::{RefMatchError, RefMatchResult};

/// Sigma OpenCV derives for a 3x3 Gaussian kernel when none is given.
pub const BLUR3_SIGMA: f32 = 0.8;

/// Optional photometric normalisation applied before feature extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preprocess {
    /// Equalise the grayscale histogram.
    pub equalize: bool,
    /// Apply a 3x3 Gaussian blur after equalisation.
    pub blur: bool,
}

impl Default for Preprocess {
    fn default() -> Self {
        Self {
            equalize: true,
            blur: true,
        }
    }
}

impl Preprocess {
    /// No preprocessing.
    pub fn none() -> Self {
        Self {
            equalize: false,
            blur: false,
        }
    }

    /// Applies the configured steps, always returning a contiguous copy.
    pub fn apply(&self, image: ImageView<'_, u8>) -> RefMatchResult<OwnedImage> {
        let mut out = if self.equalize {
            equalize_hist(image)?
        } else {
            OwnedImage::from_view(image)?
        };
        if self.blur {
            out = gaussian_blur_u8(out.view(), BLUR3_SIGMA, 1)?;
        }
        Ok(out)
    }
}

/// Histogram equalisation for 8-bit grayscale images.
pub fn equalize_hist(image: ImageView<'_, u8>) -> RefMatchResult<OwnedImage> {
    let mut hist = [0usize; 256];
    for y in 0..image.height() {
        if let Some(row) = image.row(y) {
            for &v in row {
                hist[v as usize] += 1;
            }
        }
    }
    let total = image.width() * image.height();
    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);

    let mut lut = [first as u8; 256];
    if hist[first] < total {
        let scale = 255.0 / (total - hist[first]) as f64;
        let mut sum = 0usize;
        lut[first] = 0;
        for (value, count) in hist.iter().enumerate().skip(first + 1) {
            sum += count;
            lut[value] = (sum as f64 * scale).round().clamp(0.0, 255.0) as u8;
        }
    }

    let mut data = Vec::with_capacity(total);
    for y in 0..image.height() {
        if let Some(row) = image.row(y) {
            data.extend(row.iter().map(|&v| lut[v as usize]));
        }
    }
    OwnedImage::new(data, image.width(), image.height())
}

/// Builds a normalised 1D Gaussian kernel of length `2 * radius + 1`.
pub fn gaussian_kernel(sigma: f32, radius: usize) -> Vec<f32> {
    let sigma = sigma.max(1e-3);
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in kernel.iter_mut() {
        *w /= sum;
    }
    kernel
}

#[inline]
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

fn convolve_separable(
    src: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
) -> Vec<f32> {
    let radius = (kernel.len() / 2) as isize;
    let mut tmp = vec![0.0f32; width * height];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, w) in kernel.iter().enumerate() {
                let sx = reflect101(x as isize + k as isize - radius, width);
                acc += w * row[sx];
            }
            tmp[y * width + x] = acc;
        }
    }

    let mut out = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, w) in kernel.iter().enumerate() {
                let sy = reflect101(y as isize + k as isize - radius, height);
                acc += w * tmp[sy * width + x];
            }
            out[y * width + x] = acc;
        }
    }
    out
}

/// Separable Gaussian blur for 8-bit images with an explicit kernel radius.
pub fn gaussian_blur_u8(
    image: ImageView<'_, u8>,
    sigma: f32,
    radius: usize,
) -> RefMatchResult<OwnedImage> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(RefMatchError::InvalidConfig {
            reason: "blur sigma must be finite and > 0",
        });
    }
    let width = image.width();
    let height = image.height();
    let src = FloatImage::from_u8(image, 1.0);
    let kernel = gaussian_kernel(sigma, radius);
    let out = convolve_separable(src.data(), width, height, &kernel);
    let data = out
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    OwnedImage::new(data, width, height)
}

/// Separable Gaussian blur for float images; the radius is `ceil(3 * sigma)`.
pub fn gaussian_blur_f32(image: &FloatImage, sigma: f32) -> FloatImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let kernel = gaussian_kernel(sigma, radius);
    let data = convolve_separable(image.data(), image.width(), image.height(), &kernel);
    FloatImage {
        data,
        width: image.width(),
        height: image.height(),
    }
}

/// Bilinear resize with pixel-centre alignment.
pub fn resize_bilinear(
    image: ImageView<'_, u8>,
    new_width: usize,
    new_height: usize,
) -> RefMatchResult<OwnedImage> {
    if new_width == 0 || new_height == 0 {
        return Err(RefMatchError::InvalidDimensions {
            width: new_width,
            height: new_height,
        });
    }
    let width = image.width();
    let height = image.height();
    let sx = width as f32 / new_width as f32;
    let sy = height as f32 / new_height as f32;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    let mut data = Vec::with_capacity(new_width * new_height);
    for y in 0..new_height {
        let src_y = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;
        let row0 = image.row(y0).ok_or(RefMatchError::BufferTooSmall {
            needed: (y0 + 1) * image.stride(),
            got: image.as_slice().len(),
        })?;
        let row1 = image.row(y1).ok_or(RefMatchError::BufferTooSmall {
            needed: (y1 + 1) * image.stride(),
            got: image.as_slice().len(),
        })?;
        for x in 0..new_width {
            let src_x = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;
            let top = row0[x0] as f32 * (1.0 - fx) + row0[x1] as f32 * fx;
            let bottom = row1[x0] as f32 * (1.0 - fx) + row1[x1] as f32 * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            data.push(value.round().clamp(0.0, 255.0) as u8);
        }
    }
    OwnedImage::new(data, new_width, new_height)
}

/// Halves a float image by averaging 2x2 blocks.
pub fn downsample_half(image: &FloatImage) -> FloatImage {
    let width = (image.width() / 2).max(1);
    let height = (image.height() / 2).max(1);
    let mut out = FloatImage::zeros(width, height);
    for y in 0..height {
        for x in 0..width {
            let sx = (2 * x) as isize;
            let sy = (2 * y) as isize;
            let sum = image.at_clamped(sx, sy)
                + image.at_clamped(sx + 1, sy)
                + image.at_clamped(sx, sy + 1)
                + image.at_clamped(sx + 1, sy + 1);
            out.set(x, y, sum * 0.25);
        }
    }
    out
}

/// Central-difference gradients `(dx, dy)` with clamped borders.
pub fn gradients(image: &FloatImage) -> (FloatImage, FloatImage) {
    let width = image.width();
    let height = image.height();
    let mut gx = FloatImage::zeros(width, height);
    let mut gy = FloatImage::zeros(width, height);
    for y in 0..height {
        for x in 0..width {
            let xi = x as isize;
            let yi = y as isize;
            gx.set(
                x,
                y,
                0.5 * (image.at_clamped(xi + 1, yi) - image.at_clamped(xi - 1, yi)),
            );
            gy.set(
                x,
                y,
                0.5 * (image.at_clamped(xi, yi + 1) - image.at_clamped(xi, yi - 1)),
            );
        }
    }
    (gx, gy)
}
