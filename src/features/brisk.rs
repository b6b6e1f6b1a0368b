//! BRISK: FAST keypoints on a dyadic pyramid with a ring sampling pattern.
//!
//! The 60-point pattern sits on concentric rings. Long-distance pairs
//! estimate the local gradient direction, which rotates the pattern; the first
//! 512 short-distance pairs produce the binary comparisons.

use std::f32::consts::PI;
use std::sync::OnceLock;

use crate::features::{
    fast, set_bit, sort_by_response, Descriptors, DetectorKind, FeatureExtractor, Features,
    Keypoint,
};
use crate::image::pyramid::ImagePyramid;
use crate::image::{ImageView, OwnedImage};
use crate::trace::{trace_event, trace_span};
use crate::util::math::wrap_deg_360;
use crate::util::{RefMatchError, RefMatchResult};

const RING_SCALE: f32 = 0.85;
const RING_RADII: [f32; 5] = [0.0, 2.9, 4.9, 7.4, 10.8];
const RING_COUNTS: [usize; 5] = [1, 10, 14, 15, 20];
const SIGMA_SCALE: f32 = 1.3;
const D_MAX: f32 = 5.85;
const D_MIN: f32 = 8.2;
const DESCRIPTOR_BITS: usize = 512;
const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS / 8;

/// Parameters for [`Brisk`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BriskParams {
    /// FAST threshold used on every octave.
    pub threshold: u8,
    /// Number of octaves above the base level.
    pub octaves: usize,
    /// Maximum number of features; 0 keeps all.
    pub max_features: usize,
}

impl Default for BriskParams {
    fn default() -> Self {
        Self {
            threshold: 30,
            octaves: 3,
            max_features: 2000,
        }
    }
}

/// BRISK feature extractor.
#[derive(Clone, Debug, Default)]
pub struct Brisk {
    params: BriskParams,
}

impl Brisk {
    pub fn new(params: BriskParams) -> Self {
        Self { params }
    }
}

#[derive(Clone, Copy, Debug)]
struct PatternPoint {
    x: f32,
    y: f32,
    radius: f32,
    angle: f32,
    half_box: isize,
}

struct Pattern {
    points: Vec<PatternPoint>,
    short_pairs: Vec<(usize, usize)>,
    long_pairs: Vec<(usize, usize)>,
    reach: usize,
}

fn pattern() -> &'static Pattern {
    static PATTERN: OnceLock<Pattern> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut points = Vec::with_capacity(60);
        for (ring, (&r, &n)) in RING_RADII.iter().zip(RING_COUNTS.iter()).enumerate() {
            let radius = r * RING_SCALE;
            let sigma = if ring == 0 {
                0.5
            } else {
                SIGMA_SCALE * radius * (PI / n as f32).sin()
            };
            let offset = if ring % 2 == 1 { PI / n as f32 } else { 0.0 };
            for j in 0..n {
                let angle = 2.0 * PI * j as f32 / n as f32 + offset;
                points.push(PatternPoint {
                    x: radius * angle.cos(),
                    y: radius * angle.sin(),
                    radius,
                    angle,
                    half_box: sigma.round() as isize,
                });
            }
        }

        let mut short_pairs = Vec::new();
        let mut long_pairs = Vec::new();
        for i in 1..points.len() {
            for j in 0..i {
                let d = (points[i].x - points[j].x).hypot(points[i].y - points[j].y);
                if d < D_MAX && short_pairs.len() < DESCRIPTOR_BITS {
                    short_pairs.push((i, j));
                }
                if d > D_MIN {
                    long_pairs.push((i, j));
                }
            }
        }

        let reach = points
            .iter()
            .map(|p| p.radius + p.half_box as f32)
            .fold(0.0f32, f32::max)
            .ceil() as usize
            + 2;
        Pattern {
            points,
            short_pairs,
            long_pairs,
            reach,
        }
    })
}

/// Summed-area table for constant-time box means.
struct Integral {
    sums: Vec<u64>,
    width: usize,
    height: usize,
}

impl Integral {
    fn new(img: &OwnedImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let stride = width + 1;
        let mut sums = vec![0u64; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                row_sum += img.data()[y * width + x] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self {
            sums,
            width,
            height,
        }
    }

    fn box_mean(&self, cx: isize, cy: isize, half: isize) -> f32 {
        let x0 = (cx - half).clamp(0, self.width as isize - 1) as usize;
        let y0 = (cy - half).clamp(0, self.height as isize - 1) as usize;
        let x1 = (cx + half).clamp(0, self.width as isize - 1) as usize + 1;
        let y1 = (cy + half).clamp(0, self.height as isize - 1) as usize + 1;
        let stride = self.width + 1;
        let total = self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0];
        total as f32 / ((x1 - x0) * (y1 - y0)) as f32
    }
}

fn sample_pattern(integral: &Integral, x: f32, y: f32, rotation: f32, out: &mut [f32]) {
    for (value, p) in out.iter_mut().zip(pattern().points.iter()) {
        let a = p.angle + rotation;
        let px = (x + p.radius * a.cos()).round() as isize;
        let py = (y + p.radius * a.sin()).round() as isize;
        *value = integral.box_mean(px, py, p.half_box);
    }
}

/// Local gradient direction from the long pairs, in radians.
fn orientation(values: &[f32]) -> f32 {
    let points = &pattern().points;
    let (mut gx, mut gy) = (0.0f32, 0.0f32);
    for &(i, j) in &pattern().long_pairs {
        let dx = points[j].x - points[i].x;
        let dy = points[j].y - points[i].y;
        let d2 = dx * dx + dy * dy;
        let di = values[j] - values[i];
        gx += di * dx / d2;
        gy += di * dy / d2;
    }
    gy.atan2(gx)
}

impl FeatureExtractor for Brisk {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Brisk
    }

    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features> {
        if self.params.threshold == 0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "brisk threshold must be > 0",
            });
        }
        let _span = trace_span!("brisk_extract").entered();

        let pat = pattern();
        let pyramid = ImagePyramid::build_u8(image, self.params.octaves + 1)?;
        let mut candidates: Vec<Keypoint> = Vec::new();
        for (level, img) in pyramid.levels().iter().enumerate() {
            let scale = pyramid.scale(level).unwrap_or(1.0);
            for c in fast::detect(img, self.params.threshold, pat.reach) {
                candidates.push(Keypoint {
                    x: c.x as f32,
                    y: c.y as f32,
                    size: 2.0 * RING_RADII[4] * RING_SCALE * scale,
                    angle_deg: 0.0,
                    response: c.score,
                    octave: level as u8,
                });
            }
        }
        sort_by_response(&mut candidates);
        if self.params.max_features > 0 {
            candidates.truncate(self.params.max_features);
        }

        let integrals: Vec<Integral> = pyramid.levels().iter().map(Integral::new).collect();
        let mut values = vec![0.0f32; pat.points.len()];
        let mut keypoints = Vec::with_capacity(candidates.len());
        let mut data = Vec::with_capacity(candidates.len() * DESCRIPTOR_BYTES);
        for mut kp in candidates {
            let level = kp.octave as usize;
            let integral = &integrals[level];
            sample_pattern(integral, kp.x, kp.y, 0.0, &mut values);
            let theta = orientation(&values);
            sample_pattern(integral, kp.x, kp.y, theta, &mut values);

            let mut row = [0u8; DESCRIPTOR_BYTES];
            for (bit, &(i, j)) in pat.short_pairs.iter().enumerate() {
                if values[i] > values[j] {
                    set_bit(&mut row, bit);
                }
            }
            data.extend_from_slice(&row);

            let scale = pyramid.scale(level).unwrap_or(1.0);
            kp.angle_deg = wrap_deg_360(theta.to_degrees());
            kp.x *= scale;
            kp.y *= scale;
            keypoints.push(kp);
        }

        trace_event!("brisk_features", count = keypoints.len());
        Features::new(
            keypoints,
            Descriptors::Binary {
                bytes_per_row: DESCRIPTOR_BYTES,
                data,
            },
        )
    }
}
