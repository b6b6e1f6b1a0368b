//! ORB: oriented FAST keypoints with rotated BRIEF descriptors.
//!
//! Keypoints are detected with FAST-9 on a geometric pyramid, ranked by the
//! Harris response, oriented by the intensity centroid and described with a
//! steered 256-bit BRIEF test pattern sampled on a smoothed level image.

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::{
    fast, set_bit, sort_by_response, Descriptors, DetectorKind, FeatureExtractor, Features,
    Keypoint,
};
use crate::image::filter::gaussian_blur_u8;
use crate::image::pyramid::ImagePyramid;
use crate::image::{ImageView, OwnedImage};
use crate::trace::{trace_event, trace_span};
use crate::util::math::{sin_cos_deg, wrap_deg_360};
use crate::util::{RefMatchError, RefMatchResult};

const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS / 8;
const PATTERN_HALF: i32 = 13;
const PATTERN_SEED: u64 = 0x0b1e_5eed;
const HARRIS_K: f32 = 0.04;
const HARRIS_BLOCK: isize = 7;
/// Largest reach of a rotated test point plus one pixel.
const MIN_BORDER: usize = 20;

/// Parameters for [`Orb`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbParams {
    /// Maximum number of features to retain.
    pub n_features: usize,
    /// Scale ratio between pyramid levels (> 1).
    pub scale_factor: f32,
    /// Number of pyramid levels.
    pub n_levels: usize,
    /// Border in pixels where no features are detected.
    pub edge_threshold: usize,
    /// Diameter of the orientation patch.
    pub patch_size: usize,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            n_features: 1000,
            scale_factor: 1.2,
            n_levels: 5,
            edge_threshold: 31,
            patch_size: 31,
            fast_threshold: 10,
        }
    }
}

impl OrbParams {
    fn validate(&self) -> RefMatchResult<()> {
        if self.n_features == 0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "orb n_features must be > 0",
            });
        }
        if self.n_levels == 0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "orb n_levels must be > 0",
            });
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "orb scale_factor must be > 1",
            });
        }
        if self.patch_size < 3 {
            return Err(RefMatchError::InvalidConfig {
                reason: "orb patch_size must be >= 3",
            });
        }
        Ok(())
    }
}

/// ORB feature extractor.
#[derive(Clone, Debug, Default)]
pub struct Orb {
    params: OrbParams,
}

impl Orb {
    /// Creates an extractor with explicit parameters.
    pub fn new(params: OrbParams) -> Self {
        Self { params }
    }

    /// Returns the active parameters.
    pub fn params(&self) -> &OrbParams {
        &self.params
    }
}

/// Lazily generated BRIEF point pairs `[x1, y1, x2, y2]` inside `±13`.
fn pattern() -> &'static [[i8; 4]] {
    static PATTERN: OnceLock<Vec<[i8; 4]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        (0..DESCRIPTOR_BITS)
            .map(|_| {
                let mut pair = [0i8; 4];
                for v in &mut pair {
                    *v = rng.random_range(-PATTERN_HALF..=PATTERN_HALF) as i8;
                }
                pair
            })
            .collect()
    })
}

/// Splits `total` features across levels with a geometric falloff.
fn features_per_level(total: usize, n_levels: usize, scale_factor: f32) -> Vec<usize> {
    let factor = 1.0 / scale_factor;
    let denom = 1.0 - factor.powi(n_levels as i32);
    let mut per_level = Vec::with_capacity(n_levels);
    let mut desired = total as f32 * (1.0 - factor) / denom;
    let mut assigned = 0usize;
    for _ in 0..n_levels.saturating_sub(1) {
        let n = (desired.round() as usize).min(total - assigned);
        per_level.push(n);
        assigned += n;
        desired *= factor;
    }
    per_level.push(total - assigned);
    per_level
}

fn harris_response(img: &OwnedImage, x: usize, y: usize) -> f32 {
    let half = HARRIS_BLOCK / 2;
    let norm = 1.0 / (4.0 * HARRIS_BLOCK as f32 * 255.0);
    let (xi, yi) = (x as isize, y as isize);
    let p = |dx: isize, dy: isize| img.at_clamped(xi + dx, yi + dy) as f32;

    let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
    for dy in -half..=half {
        for dx in -half..=half {
            let gx = (p(dx + 1, dy - 1) + 2.0 * p(dx + 1, dy) + p(dx + 1, dy + 1))
                - (p(dx - 1, dy - 1) + 2.0 * p(dx - 1, dy) + p(dx - 1, dy + 1));
            let gy = (p(dx - 1, dy + 1) + 2.0 * p(dx, dy + 1) + p(dx + 1, dy + 1))
                - (p(dx - 1, dy - 1) + 2.0 * p(dx, dy - 1) + p(dx + 1, dy - 1));
            let (gx, gy) = (gx * norm, gy * norm);
            sxx += gx * gx;
            syy += gy * gy;
            sxy += gx * gy;
        }
    }
    let trace = sxx + syy;
    sxx * syy - sxy * sxy - HARRIS_K * trace * trace
}

/// Orientation of the intensity centroid within a disc of `radius`.
fn centroid_angle(img: &OwnedImage, x: usize, y: usize, radius: isize) -> f32 {
    let (mut m01, mut m10) = (0.0f32, 0.0f32);
    let r2 = radius * radius;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = img.at_clamped(x as isize + dx, y as isize + dy) as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    wrap_deg_360(m01.atan2(m10).to_degrees())
}

fn describe(blurred: &OwnedImage, x: usize, y: usize, angle_deg: f32, out: &mut [u8]) {
    let (sin, cos) = sin_cos_deg(angle_deg);
    let sample = |px: i8, py: i8| {
        let (px, py) = (px as f32, py as f32);
        let rx = (cos * px - sin * py).round() as isize;
        let ry = (sin * px + cos * py).round() as isize;
        blurred.at_clamped(x as isize + rx, y as isize + ry)
    };
    for (bit, pair) in pattern().iter().enumerate() {
        if sample(pair[0], pair[1]) < sample(pair[2], pair[3]) {
            set_bit(out, bit);
        }
    }
}

impl FeatureExtractor for Orb {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Orb
    }

    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features> {
        self.params.validate()?;
        let _span = trace_span!(
            "orb_extract",
            width = image.width(),
            height = image.height()
        )
        .entered();

        let p = &self.params;
        let border = p.edge_threshold.max(MIN_BORDER);
        let pyramid =
            ImagePyramid::build_scaled(image, p.n_levels, p.scale_factor, 2 * border + 1)?;
        let quotas = features_per_level(p.n_features, p.n_levels, p.scale_factor);
        let radius = (p.patch_size / 2) as isize;

        let mut keypoints = Vec::new();
        let mut data = Vec::new();
        for (level, img) in pyramid.levels().iter().enumerate() {
            let quota = quotas.get(level).copied().unwrap_or(0);
            if quota == 0 {
                continue;
            }
            let scale = pyramid.scale(level).unwrap_or(1.0);

            let mut ranked: Vec<Keypoint> = fast::detect(img, p.fast_threshold, border)
                .into_iter()
                .map(|c| Keypoint {
                    x: c.x as f32,
                    y: c.y as f32,
                    size: p.patch_size as f32 * scale,
                    angle_deg: 0.0,
                    response: harris_response(img, c.x, c.y),
                    octave: level as u8,
                })
                .collect();
            sort_by_response(&mut ranked);
            ranked.truncate(quota);
            if ranked.is_empty() {
                continue;
            }

            let blurred = gaussian_blur_u8(img.view(), 2.0, 3)?;
            for mut kp in ranked {
                let (lx, ly) = (kp.x as usize, kp.y as usize);
                kp.angle_deg = centroid_angle(img, lx, ly, radius);
                let mut row = [0u8; DESCRIPTOR_BYTES];
                describe(&blurred, lx, ly, kp.angle_deg, &mut row);
                data.extend_from_slice(&row);
                kp.x *= scale;
                kp.y *= scale;
                keypoints.push(kp);
            }
        }

        trace_event!("orb_features", count = keypoints.len());
        Features::new(
            keypoints,
            Descriptors::Binary {
                bytes_per_row: DESCRIPTOR_BYTES,
                data,
            },
        )
    }
}
