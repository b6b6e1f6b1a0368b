//! Image pyramid construction for grayscale `u8` images.
//!
//! Two flavours are provided: a dyadic pyramid where each level is a 2x2 box
//! average of the previous one (`dst = ((a + b + c + d) + 2) / 4`), and a
//! geometric pyramid where level `i` is the base resampled by
//! `1 / factor^i`. Every level records its scale relative to the base so
//! keypoints can be mapped back to base coordinates.

use crate::image::filter::resize_bilinear;
use crate::image::{ImageView, OwnedImage};
use crate::util::{RefMatchError, RefMatchResult};

/// Owned image pyramid built from a base level.
pub struct ImagePyramid {
    levels: Vec<OwnedImage>,
    scales: Vec<f32>,
}

impl ImagePyramid {
    /// Builds a dyadic pyramid from a base grayscale view.
    ///
    /// `max_levels` is clamped to at least 1 so the base level is always present.
    pub fn build_u8(base: ImageView<'_, u8>, max_levels: usize) -> RefMatchResult<Self> {
        let max_levels = max_levels.max(1);
        let mut levels = vec![OwnedImage::from_view(base)?];
        let mut scales = vec![1.0f32];

        while levels.len() < max_levels {
            let Some(prev) = levels.last() else { break };
            let src = prev.view();
            if src.width() < 2 || src.height() < 2 {
                break;
            }

            let dst_width = src.width() / 2;
            let dst_height = src.height() / 2;
            let mut dst = vec![0u8; dst_width * dst_height];
            let data = prev.data();
            let stride = prev.width();
            for y in 0..dst_height {
                let row0 = &data[(2 * y) * stride..];
                let row1 = &data[(2 * y + 1) * stride..];
                for x in 0..dst_width {
                    let sum = u16::from(row0[2 * x])
                        + u16::from(row0[2 * x + 1])
                        + u16::from(row1[2 * x])
                        + u16::from(row1[2 * x + 1]);
                    dst[y * dst_width + x] = ((sum + 2) / 4) as u8;
                }
            }

            let scale = scales[scales.len() - 1] * 2.0;
            levels.push(OwnedImage::new(dst, dst_width, dst_height)?);
            scales.push(scale);
        }

        Ok(Self { levels, scales })
    }

    /// Builds a geometric pyramid with `factor > 1` between levels.
    ///
    /// Construction stops early once a level would be smaller than
    /// `min_size` on either side.
    pub fn build_scaled(
        base: ImageView<'_, u8>,
        max_levels: usize,
        factor: f32,
        min_size: usize,
    ) -> RefMatchResult<Self> {
        if !factor.is_finite() || factor <= 1.0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "pyramid scale factor must be > 1",
            });
        }
        let max_levels = max_levels.max(1);
        let mut levels = vec![OwnedImage::from_view(base)?];
        let mut scales = vec![1.0f32];

        for level in 1..max_levels {
            let scale = factor.powi(level as i32);
            let width = (base.width() as f32 / scale).round() as usize;
            let height = (base.height() as f32 / scale).round() as usize;
            if width < min_size.max(1) || height < min_size.max(1) {
                break;
            }
            levels.push(resize_bilinear(base, width, height)?);
            scales.push(scale);
        }

        Ok(Self { levels, scales })
    }

    /// Returns all pyramid levels (level 0 is the base resolution).
    pub fn levels(&self) -> &[OwnedImage] {
        &self.levels
    }

    /// Returns the number of levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true when the pyramid holds no levels.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Returns a view for a specific pyramid level.
    pub fn level(&self, index: usize) -> Option<ImageView<'_, u8>> {
        self.levels.get(index).map(|level| level.view())
    }

    /// Returns the downscale factor of a level relative to the base.
    pub fn scale(&self, index: usize) -> Option<f32> {
        self.scales.get(index).copied()
    }
}
