//! Robust homography estimation with seeded RANSAC.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::geometry::homography::{estimate_dlt, Homography};
use crate::geometry::Point;
use crate::trace::trace_event;

/// Verified transform with its inlier mask.
#[derive(Clone, Debug, PartialEq)]
pub struct Verified {
    /// Transform mapping source points onto destination points.
    pub homography: Homography,
    /// One flag per input pair.
    pub inliers: Vec<bool>,
}

impl Verified {
    /// Number of pairs flagged as inliers.
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&v| v).count()
    }
}

/// Correspondences to transform plus inlier mask.
pub trait GeometricVerifier: Send + Sync {
    /// Fits a transform mapping `src[i]` onto `dst[i]`.
    ///
    /// Returns `None` when no usable transform exists.
    fn verify(&self, src: &[Point], dst: &[Point]) -> Option<Verified>;
}

/// RANSAC over minimal four-point DLT fits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RansacHomography {
    /// Maximum reprojection error in pixels for an inlier.
    pub threshold: f64,
    /// Upper bound on sampling iterations.
    pub max_iters: usize,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Seed for the sampling RNG.
    pub seed: u64,
}

impl Default for RansacHomography {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            max_iters: 2000,
            confidence: 0.995,
            seed: 0,
        }
    }
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// True when any three of the four points are (nearly) collinear.
fn degenerate_sample(pts: &[Point; 4]) -> bool {
    const EPS: f64 = 1e-6;
    let triples = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    triples
        .iter()
        .any(|&(i, j, k)| cross(pts[i], pts[j], pts[k]).abs() < EPS)
}

/// Number of iterations needed for `confidence` at the given inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, max_iters: usize) -> usize {
    let w4 = inlier_ratio.powi(4);
    if w4 <= f64::EPSILON {
        return max_iters;
    }
    if w4 >= 1.0 - f64::EPSILON {
        return 1;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - w4).ln();
    if needed.is_finite() && needed >= 0.0 {
        (needed.ceil() as usize).clamp(1, max_iters)
    } else {
        max_iters
    }
}

impl RansacHomography {
    fn mask(&self, h: &Homography, src: &[Point], dst: &[Point]) -> (Vec<bool>, usize) {
        let thr2 = self.threshold * self.threshold;
        let mask: Vec<bool> = src
            .iter()
            .zip(dst)
            .map(|(s, d)| h.transfer_error_sq(*s, *d) <= thr2)
            .collect();
        let count = mask.iter().filter(|&&v| v).count();
        (mask, count)
    }
}

impl GeometricVerifier for RansacHomography {
    fn verify(&self, src: &[Point], dst: &[Point]) -> Option<Verified> {
        let n = src.len();
        if n < 4 || dst.len() != n || self.max_iters == 0 {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<(Homography, Vec<bool>, usize)> = None;
        let mut limit = self.max_iters;
        let mut iter = 0;
        while iter < limit {
            iter += 1;
            let idx = sample(&mut rng, n, 4);
            let pick =
                |pts: &[Point]| -> [Point; 4] { std::array::from_fn(|k| pts[idx.index(k)]) };
            let (s, d) = (pick(src), pick(dst));
            if degenerate_sample(&s) || degenerate_sample(&d) {
                continue;
            }
            let Some(h) = estimate_dlt(&s, &d) else {
                continue;
            };
            let (mask, count) = self.mask(&h, src, dst);
            let improves = best.as_ref().map_or(true, |(_, _, c)| count > *c);
            if improves {
                limit = limit.min(required_iterations(
                    self.confidence,
                    count as f64 / n as f64,
                    self.max_iters,
                ));
                best = Some((h, mask, count));
            }
        }

        let (h, mask, count) = best?;
        if count < 4 {
            return None;
        }

        // Least-squares refit on the consensus set.
        let (in_src, in_dst): (Vec<Point>, Vec<Point>) = src
            .iter()
            .zip(dst)
            .zip(&mask)
            .filter(|(_, m)| **m)
            .map(|((s, d), _)| (*s, *d))
            .unzip();
        let (homography, inliers) = match estimate_dlt(&in_src, &in_dst) {
            Some(refit) => {
                let (refit_mask, refit_count) = self.mask(&refit, src, dst);
                if refit_count >= count {
                    (refit, refit_mask)
                } else {
                    (h, mask)
                }
            }
            None => (h, mask),
        };

        trace_event!("ransac_done", iterations = iter, inliers = count);
        Some(Verified {
            homography,
            inliers,
        })
    }
}
