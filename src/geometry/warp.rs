//! Perspective warping with bilinear sampling.

use crate::geometry::Homography;
use crate::image::{ImageView, OwnedImage};

/// Bilinear sample of an interleaved `u8` buffer at `(x, y)`.
///
/// Returns `false` and leaves `out` untouched when the point falls outside the
/// source; indices are clamped for the right and bottom neighbours.
fn sample_bilinear(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    x: f64,
    y: f64,
    out: &mut [u8],
) -> bool {
    let eps = 1e-6;
    let max_x = width as f64 - 1.0;
    let max_y = height as f64 - 1.0;
    if !x.is_finite()
        || !y.is_finite()
        || x < -eps
        || y < -eps
        || x > max_x + eps
        || y > max_y + eps
    {
        return false;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let w00 = (1.0 - fx) * (1.0 - fy);
    let w10 = fx * (1.0 - fy);
    let w01 = (1.0 - fx) * fy;
    let w11 = fx * fy;
    for (c, dst) in out.iter_mut().enumerate().take(channels) {
        let at = |xx: usize, yy: usize| data[(yy * width + xx) * channels + c] as f64;
        let value = at(x0, y0) * w00 + at(x1, y0) * w10 + at(x0, y1) * w01 + at(x1, y1) * w11;
        *dst = value.round().clamp(0.0, 255.0) as u8;
    }
    true
}

/// Warps an interleaved image into an `out_width x out_height` canvas.
///
/// `dst_to_src` maps every output pixel centre to source coordinates.
/// Pixels that map outside the source stay zero (black).
pub fn warp_perspective(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    dst_to_src: &Homography,
    out_width: usize,
    out_height: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; out_width * out_height * channels];
    if width == 0 || height == 0 || channels == 0 || data.len() < width * height * channels {
        return out;
    }
    for y in 0..out_height {
        for x in 0..out_width {
            let Some([sx, sy]) = dst_to_src.project([x as f64, y as f64]) else {
                continue;
            };
            let start = (y * out_width + x) * channels;
            sample_bilinear(
                data,
                width,
                height,
                channels,
                sx,
                sy,
                &mut out[start..start + channels],
            );
        }
    }
    out
}

/// Grayscale convenience wrapper around [`warp_perspective`].
pub fn warp_perspective_u8(
    src: ImageView<'_, u8>,
    dst_to_src: &Homography,
    out_width: usize,
    out_height: usize,
) -> Option<OwnedImage> {
    let contiguous = OwnedImage::from_view(src).ok()?;
    let data = warp_perspective(
        contiguous.data(),
        contiguous.width(),
        contiguous.height(),
        1,
        dst_to_src,
        out_width,
        out_height,
    );
    OwnedImage::new(data, out_width, out_height).ok()
}

#[cfg(test)]
mod tests {
    use super::warp_perspective_u8;
    use crate::geometry::Homography;
    use crate::image::OwnedImage;
    use nalgebra::Matrix3;

    #[test]
    fn translation_shifts_content_and_fills_black() {
        let data: Vec<u8> = (0..16).map(|v| v * 10 + 5).collect();
        let src = OwnedImage::new(data, 4, 4).unwrap();
        // Output (x, y) samples source (x + 1, y).
        let shift = Matrix3::new(1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let h = Homography::from_matrix(shift).unwrap();
        let out = warp_perspective_u8(src.view(), &h, 4, 4).unwrap();
        assert_eq!(out.data()[0], src.data()[1]);
        assert_eq!(out.data()[3], 0);
    }
}
