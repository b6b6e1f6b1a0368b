//! SIFT: difference-of-Gaussian extrema with 128-D gradient histograms.

use std::f32::consts::PI;

use crate::features::{Descriptors, DetectorKind, FeatureExtractor, Features, Keypoint};
use crate::image::filter::gaussian_blur_f32;
use crate::image::{FloatImage, ImageView};
use crate::trace::{trace_event, trace_span};
use crate::util::math::{quad_peak_offset_1d, quad_valley_offset_1d, sin_cos_deg, wrap_deg_360};
use crate::util::{RefMatchError, RefMatchResult};

const INITIAL_SIGMA: f32 = 0.5;
const ORI_BINS: usize = 36;
const ORI_PEAK_RATIO: f32 = 0.8;
const ORI_SIGMA_FACTOR: f32 = 1.5;
const DESC_WIDTH: usize = 4;
const DESC_BINS: usize = 8;
const DESC_DIMS: usize = DESC_WIDTH * DESC_WIDTH * DESC_BINS;
const DESC_SCALE_FACTOR: f32 = 3.0;
const DESC_MAG_THRESHOLD: f32 = 0.2;
const MIN_OCTAVE_SIZE: usize = 16;
const BORDER: usize = 5;

/// Parameters for [`Sift`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SiftParams {
    /// Scale layers per octave.
    pub octave_layers: usize,
    /// Contrast threshold on the `[0, 1]` intensity scale.
    pub contrast_threshold: f32,
    /// Principal curvature ratio limit.
    pub edge_threshold: f32,
    /// Base blur of the first octave.
    pub sigma: f32,
    /// Maximum number of features; 0 keeps all.
    pub max_features: usize,
}

impl Default for SiftParams {
    fn default() -> Self {
        Self {
            octave_layers: 3,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            sigma: 1.6,
            max_features: 2000,
        }
    }
}

/// SIFT feature extractor.
#[derive(Clone, Debug, Default)]
pub struct Sift {
    params: SiftParams,
}

impl Sift {
    pub fn new(params: SiftParams) -> Self {
        Self { params }
    }
}

struct Octave {
    gaussians: Vec<FloatImage>,
    dogs: Vec<FloatImage>,
}

fn decimate(image: &FloatImage) -> FloatImage {
    let width = (image.width() / 2).max(1);
    let height = (image.height() / 2).max(1);
    let mut out = FloatImage::zeros(width, height);
    for y in 0..height {
        for x in 0..width {
            out.set(x, y, image.at(2 * x, 2 * y));
        }
    }
    out
}

fn build_octaves(base: &FloatImage, p: &SiftParams) -> Vec<Octave> {
    let layers = p.octave_layers;
    let k = 2f32.powf(1.0 / layers as f32);
    // Incremental blur between consecutive layers.
    let mut deltas = Vec::with_capacity(layers + 3);
    deltas.push(p.sigma);
    for i in 1..layers + 3 {
        let prev = p.sigma * k.powi(i as i32 - 1);
        let total = prev * k;
        deltas.push((total * total - prev * prev).sqrt());
    }

    let min_side = base.width().min(base.height()) as f32;
    let n_octaves = ((min_side.log2() - 3.0).floor() as i32).max(1) as usize;
    let initial = (p.sigma * p.sigma - INITIAL_SIGMA * INITIAL_SIGMA).max(0.01).sqrt();

    let mut octaves: Vec<Octave> = Vec::with_capacity(n_octaves);
    for _ in 0..n_octaves {
        let first = match octaves.last() {
            None => gaussian_blur_f32(base, initial),
            Some(prev) => {
                let src = &prev.gaussians[layers];
                if src.width() / 2 < MIN_OCTAVE_SIZE || src.height() / 2 < MIN_OCTAVE_SIZE {
                    break;
                }
                decimate(src)
            }
        };
        let mut gaussians = Vec::with_capacity(layers + 3);
        gaussians.push(first);
        for delta in deltas.iter().skip(1) {
            let Some(last) = gaussians.last() else { break };
            let next = gaussian_blur_f32(last, *delta);
            gaussians.push(next);
        }
        let dogs = gaussians.windows(2).map(|w| w[1].sub(&w[0])).collect();
        octaves.push(Octave { gaussians, dogs });
    }
    octaves
}

fn is_extremum(dogs: &[FloatImage], layer: usize, x: usize, y: usize) -> bool {
    let v = dogs[layer].at(x, y);
    let is_max = v > 0.0;
    for l in layer - 1..=layer + 1 {
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                if l == layer && dx == 0 && dy == 0 {
                    continue;
                }
                let n = dogs[l].at((x as isize + dx) as usize, (y as isize + dy) as usize);
                if (is_max && n >= v) || (!is_max && n <= v) {
                    return false;
                }
            }
        }
    }
    true
}

fn passes_edge_test(dog: &FloatImage, x: usize, y: usize, r: f32) -> bool {
    let c = dog.at(x, y);
    let dxx = dog.at(x + 1, y) + dog.at(x - 1, y) - 2.0 * c;
    let dyy = dog.at(x, y + 1) + dog.at(x, y - 1) - 2.0 * c;
    let dxy = 0.25
        * (dog.at(x + 1, y + 1) - dog.at(x - 1, y + 1) - dog.at(x + 1, y - 1)
            + dog.at(x - 1, y - 1));
    let tr = dxx + dyy;
    let det = dxx * dyy - dxy * dxy;
    det > 0.0 && tr * tr * r < (r + 1.0) * (r + 1.0) * det
}

fn subpixel(dog: &FloatImage, x: usize, y: usize, is_max: bool) -> (f32, f32) {
    let fit: fn(f32, f32, f32) -> Option<f32> = if is_max {
        quad_peak_offset_1d
    } else {
        quad_valley_offset_1d
    };
    let c = dog.at(x, y);
    let ox = fit(dog.at(x - 1, y), c, dog.at(x + 1, y)).unwrap_or(0.0);
    let oy = fit(dog.at(x, y - 1), c, dog.at(x, y + 1)).unwrap_or(0.0);
    (ox.clamp(-0.5, 0.5), oy.clamp(-0.5, 0.5))
}

/// Orientation histogram peaks in degrees.
fn orientations(img: &FloatImage, x: usize, y: usize, sigma: f32) -> Vec<f32> {
    let sigma_w = ORI_SIGMA_FACTOR * sigma;
    let radius = (3.0 * sigma_w).round() as isize;
    let denom = 2.0 * sigma_w * sigma_w;
    let mut hist = [0.0f32; ORI_BINS];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let px = x as isize + dx;
            let py = y as isize + dy;
            let gx = img.at_clamped(px + 1, py) - img.at_clamped(px - 1, py);
            let gy = img.at_clamped(px, py + 1) - img.at_clamped(px, py - 1);
            let w = (-((dx * dx + dy * dy) as f32) / denom).exp();
            let angle = gy.atan2(gx).rem_euclid(2.0 * PI);
            let bin = ((angle / (2.0 * PI) * ORI_BINS as f32) as usize) % ORI_BINS;
            hist[bin] += w * gx.hypot(gy);
        }
    }

    let max = hist.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0];
    }
    let mut peaks = Vec::new();
    for i in 0..ORI_BINS {
        let left = hist[(i + ORI_BINS - 1) % ORI_BINS];
        let right = hist[(i + 1) % ORI_BINS];
        let v = hist[i];
        if v > left && v > right && v >= ORI_PEAK_RATIO * max {
            let offset = quad_peak_offset_1d(left, v, right).unwrap_or(0.0);
            let bin = i as f32 + offset;
            peaks.push(wrap_deg_360(bin * 360.0 / ORI_BINS as f32));
        }
    }
    if peaks.is_empty() {
        peaks.push(0.0);
    }
    peaks
}

fn describe(img: &FloatImage, x: f32, y: f32, sigma: f32, angle_deg: f32) -> [f32; DESC_DIMS] {
    let (sin, cos) = sin_cos_deg(angle_deg);
    let hist_width = DESC_SCALE_FACTOR * sigma;
    let radius = (hist_width * std::f32::consts::SQRT_2 * (DESC_WIDTH as f32 + 1.0) * 0.5)
        .round() as isize;
    let weight_denom = 0.5 * (DESC_WIDTH * DESC_WIDTH) as f32;
    let bins_per_rad = DESC_BINS as f32 / (2.0 * PI);
    let mut desc = [0.0f32; DESC_DIMS];

    let (cx, cy) = (x.round() as isize, y.round() as isize);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            // Rotate into the keypoint frame, in histogram cell units.
            let rx = (cos * dx as f32 + sin * dy as f32) / hist_width;
            let ry = (-sin * dx as f32 + cos * dy as f32) / hist_width;
            let cell_x = rx + DESC_WIDTH as f32 / 2.0 - 0.5;
            let cell_y = ry + DESC_WIDTH as f32 / 2.0 - 0.5;
            if cell_x <= -1.0
                || cell_y <= -1.0
                || cell_x >= DESC_WIDTH as f32
                || cell_y >= DESC_WIDTH as f32
            {
                continue;
            }
            let px = cx + dx;
            let py = cy + dy;
            let gx = img.at_clamped(px + 1, py) - img.at_clamped(px - 1, py);
            let gy = img.at_clamped(px, py + 1) - img.at_clamped(px, py - 1);
            let mag = gx.hypot(gy) * (-(rx * rx + ry * ry) / weight_denom).exp();
            let theta = (gy.atan2(gx) - angle_deg.to_radians()).rem_euclid(2.0 * PI);
            let obin = theta * bins_per_rad;

            // Trilinear interpolation into (row, col, orientation).
            let (r0, c0, o0) = (cell_y.floor(), cell_x.floor(), obin.floor());
            let (fr, fc, fo) = (cell_y - r0, cell_x - c0, obin - o0);
            for (ri, wr) in [(r0 as isize, 1.0 - fr), (r0 as isize + 1, fr)] {
                if ri < 0 || ri >= DESC_WIDTH as isize {
                    continue;
                }
                for (ci, wc) in [(c0 as isize, 1.0 - fc), (c0 as isize + 1, fc)] {
                    if ci < 0 || ci >= DESC_WIDTH as isize {
                        continue;
                    }
                    for (oi, wo) in [(o0 as usize, 1.0 - fo), (o0 as usize + 1, fo)] {
                        let idx = (ri as usize * DESC_WIDTH + ci as usize) * DESC_BINS
                            + oi % DESC_BINS;
                        desc[idx] += mag * wr * wc * wo;
                    }
                }
            }
        }
    }

    normalize(&mut desc);
    for v in &mut desc {
        *v = v.min(DESC_MAG_THRESHOLD);
    }
    normalize(&mut desc);
    desc
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl FeatureExtractor for Sift {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Sift
    }

    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features> {
        let p = &self.params;
        if p.octave_layers == 0 || !p.sigma.is_finite() || p.sigma <= INITIAL_SIGMA {
            return Err(RefMatchError::InvalidConfig {
                reason: "sift needs octave_layers > 0 and sigma > 0.5",
            });
        }
        let _span = trace_span!("sift_extract").entered();

        let base = FloatImage::from_u8(image, 1.0 / 255.0);
        let octaves = build_octaves(&base, p);
        let prelim = 0.5 * p.contrast_threshold / p.octave_layers as f32;
        let contrast = p.contrast_threshold / p.octave_layers as f32;

        let mut keypoints = Vec::new();
        let mut data = Vec::new();
        for (o, octave) in octaves.iter().enumerate() {
            let ratio = (1usize << o) as f32;
            let (width, height) = (octave.dogs[0].width(), octave.dogs[0].height());
            if width <= 2 * BORDER || height <= 2 * BORDER {
                continue;
            }
            for layer in 1..=p.octave_layers {
                let dog = &octave.dogs[layer];
                let layer_sigma = p.sigma * 2f32.powf(layer as f32 / p.octave_layers as f32);
                for y in BORDER..height - BORDER {
                    for x in BORDER..width - BORDER {
                        let v = dog.at(x, y);
                        if v.abs() <= prelim || !is_extremum(&octave.dogs, layer, x, y) {
                            continue;
                        }
                        if v.abs() < contrast || !passes_edge_test(dog, x, y, p.edge_threshold) {
                            continue;
                        }
                        let (ox, oy) = subpixel(dog, x, y, v > 0.0);
                        let img = &octave.gaussians[layer];
                        let (fx, fy) = (x as f32 + ox, y as f32 + oy);
                        for angle in orientations(img, x, y, layer_sigma) {
                            let row = describe(img, fx, fy, layer_sigma, angle);
                            data.extend_from_slice(&row);
                            keypoints.push(Keypoint {
                                x: fx * ratio,
                                y: fy * ratio,
                                size: 2.0 * layer_sigma * ratio,
                                angle_deg: angle,
                                response: v.abs(),
                                octave: o as u8,
                            });
                        }
                    }
                }
            }
        }

        if p.max_features > 0 && keypoints.len() > p.max_features {
            let mut order: Vec<usize> = (0..keypoints.len()).collect();
            order.sort_by(|&a, &b| keypoints[b].response.total_cmp(&keypoints[a].response));
            order.truncate(p.max_features);
            let mut kept_kp = Vec::with_capacity(order.len());
            let mut kept_data = Vec::with_capacity(order.len() * DESC_DIMS);
            for i in order {
                kept_kp.push(keypoints[i]);
                kept_data.extend_from_slice(&data[i * DESC_DIMS..(i + 1) * DESC_DIMS]);
            }
            keypoints = kept_kp;
            data = kept_data;
        }

        trace_event!("sift_features", count = keypoints.len());
        Features::new(
            keypoints,
            Descriptors::Float {
                dims: DESC_DIMS,
                data,
            },
        )
    }
}
