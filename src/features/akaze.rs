//! AKAZE-style features on a nonlinear scale space.
//!
//! The scale space is built by Perona-Malik diffusion (g2 conductivity) with
//! explicit time steps. Keypoints are scale-normalised Hessian determinant
//! maxima, oriented by a sliding sector over first-order derivatives and
//! described by a 486-bit modified local difference binary (M-LDB) vector
//! comparing cell means of intensity and both derivatives on 2x2, 3x3 and
//! 4x4 grids.

use std::f32::consts::PI;

use crate::features::{set_bit, Descriptors, DetectorKind, FeatureExtractor, Features, Keypoint};
use crate::image::filter::{downsample_half, gaussian_blur_f32, gradients};
use crate::image::{FloatImage, ImageView};
use crate::trace::{trace_event, trace_span};
use crate::util::math::{quad_peak_offset_1d, sin_cos_deg, wrap_deg_360};
use crate::util::{RefMatchError, RefMatchResult};

const BASE_SIGMA: f32 = 1.6;
const MAX_TAU: f32 = 0.25;
const MIN_OCTAVE_SIZE: usize = 32;
const DESCRIPTOR_BITS: usize = 486;
const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS.div_ceil(8);
const PATTERN_HALF: f32 = 10.0;
const SAMPLES_PER_CELL: usize = 4;

/// Parameters for [`Akaze`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AkazeParams {
    /// Minimum normalised Hessian response.
    pub threshold: f32,
    /// Maximum number of octaves.
    pub octaves: usize,
    /// Sublevels per octave.
    pub sublevels: usize,
    /// Gradient histogram percentile used as the contrast factor.
    pub contrast_percentile: f32,
    /// Maximum number of features; 0 keeps all.
    pub max_features: usize,
}

impl Default for AkazeParams {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            octaves: 4,
            sublevels: 4,
            contrast_percentile: 0.7,
            max_features: 2000,
        }
    }
}

/// AKAZE feature extractor.
#[derive(Clone, Debug, Default)]
pub struct Akaze {
    params: AkazeParams,
}

impl Akaze {
    pub fn new(params: AkazeParams) -> Self {
        Self { params }
    }
}

struct Level {
    image: FloatImage,
    det: FloatImage,
    octave: usize,
    /// Scale in octave pixel units.
    sigma: f32,
}

/// Gradient magnitude at the given percentile of the non-zero histogram.
fn contrast_factor(image: &FloatImage, percentile: f32) -> f32 {
    let smoothed = gaussian_blur_f32(image, 1.0);
    let (gx, gy) = gradients(&smoothed);
    let mut mags: Vec<f32> = gx
        .data()
        .iter()
        .zip(gy.data())
        .map(|(a, b)| a.hypot(*b))
        .filter(|m| *m > 0.0)
        .collect();
    if mags.is_empty() {
        return 0.03;
    }
    mags.sort_by(f32::total_cmp);
    let idx = ((mags.len() - 1) as f32 * percentile.clamp(0.0, 1.0)).round() as usize;
    mags[idx].max(1e-4)
}

/// Advances `image` by diffusion time `dt` with g2 conductivity.
fn diffuse(image: &mut FloatImage, dt: f32, k: f32) {
    if dt <= 0.0 {
        return;
    }
    let (width, height) = (image.width(), image.height());
    let smoothed = gaussian_blur_f32(image, 1.0);
    let (gx, gy) = gradients(&smoothed);
    let inv_k2 = 1.0 / (k * k);
    let mut cond = FloatImage::zeros(width, height);
    for y in 0..height {
        for x in 0..width {
            let m2 = gx.at(x, y).powi(2) + gy.at(x, y).powi(2);
            cond.set(x, y, 1.0 / (1.0 + m2 * inv_k2));
        }
    }

    let steps = (dt / MAX_TAU).ceil().max(1.0) as usize;
    let tau = dt / steps as f32;
    for _ in 0..steps {
        let mut next = FloatImage::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                let (xi, yi) = (x as isize, y as isize);
                let v = image.at(x, y);
                let g = cond.at(x, y);
                let mut flux = 0.0f32;
                for (dx, dy) in [(1isize, 0isize), (-1, 0), (0, 1), (0, -1)] {
                    let nv = image.at_clamped(xi + dx, yi + dy);
                    let ng = cond.at_clamped(xi + dx, yi + dy);
                    flux += 0.5 * (g + ng) * (nv - v);
                }
                next.set(x, y, v + tau * flux);
            }
        }
        *image = next;
    }
}

fn hessian_det(image: &FloatImage, sigma: f32) -> FloatImage {
    let (width, height) = (image.width(), image.height());
    let norm = sigma.powi(4);
    let mut det = FloatImage::zeros(width, height);
    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (x as isize, y as isize);
            let p = |dx: isize, dy: isize| image.at_clamped(xi + dx, yi + dy);
            let c = p(0, 0);
            let lxx = p(1, 0) - 2.0 * c + p(-1, 0);
            let lyy = p(0, 1) - 2.0 * c + p(0, -1);
            let lxy = 0.25 * (p(1, 1) - p(1, -1) - p(-1, 1) + p(-1, -1));
            det.set(x, y, (lxx * lyy - lxy * lxy) * norm);
        }
    }
    det
}

fn build_scale_space(base: &FloatImage, params: &AkazeParams) -> Vec<Level> {
    let mut k = contrast_factor(base, params.contrast_percentile);
    let mut current = gaussian_blur_f32(base, BASE_SIGMA);
    let sub = params.sublevels as f32;
    let mut levels: Vec<Level> = Vec::new();

    for octave in 0..params.octaves {
        let ratio = (1usize << octave) as f32;
        let mut t_prev = if octave == 0 {
            0.5 * BASE_SIGMA * BASE_SIGMA
        } else {
            let Some(last) = levels.last() else { break };
            let (w, h) = (last.image.width() / 2, last.image.height() / 2);
            if w < MIN_OCTAVE_SIZE || h < MIN_OCTAVE_SIZE {
                break;
            }
            current = downsample_half(&last.image);
            k *= 0.75;
            let prev_sigma = last.sigma / 2.0;
            0.5 * prev_sigma * prev_sigma
        };

        for s in 0..params.sublevels {
            let sigma_base = BASE_SIGMA * 2f32.powf(octave as f32 + s as f32 / sub);
            let sigma = sigma_base / ratio;
            let t = 0.5 * sigma * sigma;
            diffuse(&mut current, t - t_prev, k);
            t_prev = t;
            levels.push(Level {
                det: hessian_det(&current, sigma),
                image: current.clone(),
                octave,
                sigma,
            });
        }
    }
    levels
}

fn is_spatial_max(det: &FloatImage, x: usize, y: usize, value: f32) -> bool {
    let idx = y * det.width() + x;
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x as isize + dx) as usize;
            let ny = (y as isize + dy) as usize;
            let other = det.at(nx, ny);
            if other > value || (other == value && ny * det.width() + nx < idx) {
                return false;
            }
        }
    }
    true
}

fn dominates_level(det: &FloatImage, x: usize, y: usize, value: f32) -> bool {
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if det.at_clamped(x as isize + dx, y as isize + dy) >= value {
                return false;
            }
        }
    }
    true
}

fn detect(levels: &[Level], threshold: f32) -> Vec<(usize, Keypoint)> {
    let border = 2usize;
    let mut found = Vec::new();
    for (i, level) in levels.iter().enumerate() {
        let det = &level.det;
        let (width, height) = (det.width(), det.height());
        if width <= 2 * border || height <= 2 * border {
            continue;
        }
        let neighbours: Vec<&Level> = [i.checked_sub(1), Some(i + 1)]
            .into_iter()
            .flatten()
            .filter_map(|j| levels.get(j))
            .filter(|other| other.octave == level.octave)
            .collect();
        let ratio = (1usize << level.octave) as f32;

        for y in border..height - border {
            for x in border..width - border {
                let v = det.at(x, y);
                if v <= threshold || !is_spatial_max(det, x, y, v) {
                    continue;
                }
                if !neighbours
                    .iter()
                    .all(|other| dominates_level(&other.det, x, y, v))
                {
                    continue;
                }
                let ox = quad_peak_offset_1d(det.at(x - 1, y), v, det.at(x + 1, y));
                let oy = quad_peak_offset_1d(det.at(x, y - 1), v, det.at(x, y + 1));
                let (ox, oy) = (ox.unwrap_or(0.0), oy.unwrap_or(0.0));
                found.push((
                    i,
                    Keypoint {
                        x: (x as f32 + ox) * ratio,
                        y: (y as f32 + oy) * ratio,
                        size: 2.0 * level.sigma * ratio,
                        angle_deg: 0.0,
                        response: v,
                        octave: level.octave as u8,
                    },
                ));
            }
        }
    }
    found
}

struct Derivatives {
    lx: FloatImage,
    ly: FloatImage,
}

/// Dominant orientation in radians from a sliding `pi / 3` sector.
fn dominant_orientation(d: &Derivatives, x: f32, y: f32, sigma: f32) -> f32 {
    let step = sigma.round().max(1.0) as isize;
    let (cx, cy) = (x.round() as isize, y.round() as isize);
    let mut samples = Vec::with_capacity(113);
    for j in -6isize..=6 {
        for i in -6isize..=6 {
            if i * i + j * j >= 36 {
                continue;
            }
            let w = (-((i * i + j * j) as f32) / (2.0 * 2.5 * 2.5)).exp();
            let gx = w * d.lx.at_clamped(cx + i * step, cy + j * step);
            let gy = w * d.ly.at_clamped(cx + i * step, cy + j * step);
            samples.push((gy.atan2(gx).rem_euclid(2.0 * PI), gx, gy));
        }
    }

    let mut best = (0.0f32, 0.0f32, 0.0f32);
    let mut start = 0.0f32;
    while start < 2.0 * PI {
        let end = start + PI / 3.0;
        let (mut sx, mut sy) = (0.0f32, 0.0f32);
        for &(a, gx, gy) in &samples {
            let inside = (a >= start && a < end) || (end > 2.0 * PI && a < end - 2.0 * PI);
            if inside {
                sx += gx;
                sy += gy;
            }
        }
        let mag = sx * sx + sy * sy;
        if mag > best.0 {
            best = (mag, sx, sy);
        }
        start += 0.15;
    }
    best.2.atan2(best.1)
}

#[inline]
fn sub_offset(i: usize) -> f32 {
    (i as f32 + 0.5) / SAMPLES_PER_CELL as f32
}

fn describe(level: &Level, d: &Derivatives, x: f32, y: f32, angle_deg: f32, out: &mut [u8]) {
    let (sin, cos) = sin_cos_deg(angle_deg);
    let half = PATTERN_HALF * level.sigma;
    let mut bit = 0usize;
    for grid in [2usize, 3, 4] {
        let cell = 2.0 * half / grid as f32;
        let mut cells = Vec::with_capacity(grid * grid);
        for gy in 0..grid {
            for gx in 0..grid {
                let mut acc = [0.0f32; 3];
                for sy in 0..SAMPLES_PER_CELL {
                    for sx in 0..SAMPLES_PER_CELL {
                        let u = -half + cell * (gx as f32 + sub_offset(sx));
                        let v = -half + cell * (gy as f32 + sub_offset(sy));
                        let px = (x + cos * u - sin * v).round() as isize;
                        let py = (y + sin * u + cos * v).round() as isize;
                        let lx = d.lx.at_clamped(px, py);
                        let ly = d.ly.at_clamped(px, py);
                        acc[0] += level.image.at_clamped(px, py);
                        acc[1] += lx * cos + ly * sin;
                        acc[2] += -lx * sin + ly * cos;
                    }
                }
                cells.push(acc);
            }
        }
        for i in 0..cells.len() {
            for j in i + 1..cells.len() {
                for c in 0..3 {
                    if cells[i][c] > cells[j][c] {
                        set_bit(out, bit);
                    }
                    bit += 1;
                }
            }
        }
    }
}

impl FeatureExtractor for Akaze {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Akaze
    }

    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features> {
        let p = &self.params;
        if p.octaves == 0 || p.sublevels == 0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "akaze octaves and sublevels must be > 0",
            });
        }
        if !p.threshold.is_finite() || p.threshold <= 0.0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "akaze threshold must be > 0",
            });
        }
        let _span = trace_span!("akaze_extract").entered();

        let base = FloatImage::from_u8(image, 1.0 / 255.0);
        let levels = build_scale_space(&base, p);
        let mut found = detect(&levels, p.threshold);
        found.sort_by(|a, b| b.1.response.total_cmp(&a.1.response));
        if p.max_features > 0 {
            found.truncate(p.max_features);
        }

        let mut derivs: Vec<Option<Derivatives>> = levels.iter().map(|_| None).collect();
        let mut keypoints = Vec::with_capacity(found.len());
        let mut data = Vec::with_capacity(found.len() * DESCRIPTOR_BYTES);
        for (idx, mut kp) in found {
            let level = &levels[idx];
            let d = derivs[idx].get_or_insert_with(|| {
                let (gx, gy) = gradients(&level.image);
                let scale = level.sigma;
                let scaled = |img: &FloatImage| {
                    let mut out = FloatImage::zeros(img.width(), img.height());
                    for y in 0..img.height() {
                        for x in 0..img.width() {
                            out.set(x, y, img.at(x, y) * scale);
                        }
                    }
                    out
                };
                Derivatives {
                    lx: scaled(&gx),
                    ly: scaled(&gy),
                }
            });
            let ratio = (1usize << level.octave) as f32;
            let (lx, ly) = (kp.x / ratio, kp.y / ratio);
            let theta = dominant_orientation(d, lx, ly, level.sigma);
            kp.angle_deg = wrap_deg_360(theta.to_degrees());

            let mut row = [0u8; DESCRIPTOR_BYTES];
            describe(level, d, lx, ly, kp.angle_deg, &mut row);
            data.extend_from_slice(&row);
            keypoints.push(kp);
        }

        trace_event!("akaze_features", count = keypoints.len());
        Features::new(
            keypoints,
            Descriptors::Binary {
                bytes_per_row: DESCRIPTOR_BYTES,
                data,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{diffuse, DESCRIPTOR_BYTES};
    use crate::image::FloatImage;

    #[test]
    fn descriptor_fits_486_bits() {
        assert_eq!(DESCRIPTOR_BYTES, 61);
        assert_eq!(3 * (6 + 36 + 120), 486);
    }

    #[test]
    fn diffusion_preserves_mean_and_smooths_step() {
        let mut img = FloatImage::zeros(16, 8);
        for y in 0..8 {
            for x in 8..16 {
                img.set(x, y, 1.0);
            }
        }
        let before: f32 = img.data().iter().sum();
        diffuse(&mut img, 2.0, 0.5);
        let after: f32 = img.data().iter().sum();
        assert!((before - after).abs() < 1e-3);
        assert!(img.at(7, 4) > 0.0 && img.at(8, 4) < 1.0);
    }
}
