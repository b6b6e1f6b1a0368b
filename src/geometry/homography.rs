//! 3x3 planar homographies and the normalised DLT solver.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::geometry::{Point, Quad};

const DET_EPS: f64 = 1e-12;

/// Projective transform between two image planes.
///
/// In a pass the matrix maps frame pixels to reference pixels; its inverse
/// carries the reference outline back onto the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// Wraps a matrix, rejecting singular or non-finite ones.
    ///
    /// The matrix is scaled so that `h[2][2] == 1` when possible.
    pub fn from_matrix(m: Matrix3<f64>) -> Option<Self> {
        if m.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let scale = if m[(2, 2)].abs() > DET_EPS {
            m[(2, 2)]
        } else {
            m.norm()
        };
        if scale == 0.0 {
            return None;
        }
        let m = m / scale;
        let det = m.determinant();
        if !det.is_finite() || det.abs() < DET_EPS {
            return None;
        }
        Some(Self(m))
    }

    /// Identity transform.
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// Returns the underlying matrix.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Returns the row-major coefficients.
    pub fn to_row_major(&self) -> [[f64; 3]; 3] {
        let m = &self.0;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    /// Maps a point; `None` when it lands on the line at infinity.
    pub fn project(&self, p: Point) -> Option<Point> {
        let v = self.0 * Vector3::new(p[0], p[1], 1.0);
        if v.z.abs() < DET_EPS {
            return None;
        }
        let out = [v.x / v.z, v.y / v.z];
        (out[0].is_finite() && out[1].is_finite()).then_some(out)
    }

    /// Maps all four corners of a quad.
    pub fn project_quad(&self, quad: &Quad) -> Option<Quad> {
        let mut out = [[0.0; 2]; 4];
        for (dst, src) in out.iter_mut().zip(quad.iter()) {
            *dst = self.project(*src)?;
        }
        Some(out)
    }

    /// Returns the inverse transform.
    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().and_then(Self::from_matrix)
    }

    /// Composes `self` after `other` (`self * other`).
    pub fn compose(&self, other: &Homography) -> Option<Self> {
        Self::from_matrix(self.0 * other.0)
    }

    /// Squared reprojection error of `src -> dst`.
    pub fn transfer_error_sq(&self, src: Point, dst: Point) -> f64 {
        match self.project(src) {
            Some(p) => (p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2),
            None => f64::INFINITY,
        }
    }
}

/// Similarity that moves the centroid to the origin and sets the mean
/// distance from it to `sqrt(2)`.
fn normalizer(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 || !mean_dist.is_finite() {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply(t: &Matrix3<f64>, p: Point) -> Point {
    let v = t * Vector3::new(p[0], p[1], 1.0);
    [v.x / v.z, v.y / v.z]
}

/// Estimates the homography mapping `src[i]` to `dst[i]` by normalised DLT.
///
/// Needs at least four non-degenerate pairs; more pairs give the algebraic
/// least-squares solution.
pub fn estimate_dlt(src: &[Point], dst: &[Point]) -> Option<Homography> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let ts = normalizer(src)?;
    let td = normalizer(dst)?;

    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for i in 0..n {
        let [x, y] = apply(&ts, src[i]);
        let [u, v] = apply(&td, dst[i]);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;
        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = v_t.row(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let td_inv = td.try_inverse()?;
    Homography::from_matrix(td_inv * hn * ts)
}

#[cfg(test)]
mod tests {
    use super::{estimate_dlt, Homography};
    use nalgebra::Matrix3;

    #[test]
    fn dlt_recovers_exact_transform() {
        let truth = Homography::from_matrix(Matrix3::new(
            1.1, 0.05, 12.0, -0.03, 0.95, -7.0, 1e-4, -2e-4, 1.0,
        ))
        .unwrap();
        let src = [
            [0.0, 0.0],
            [200.0, 10.0],
            [190.0, 150.0],
            [5.0, 160.0],
            [100.0, 80.0],
        ];
        let dst: Vec<_> = src.iter().map(|p| truth.project(*p).unwrap()).collect();
        let est = estimate_dlt(&src, &dst).unwrap();
        for p in &src {
            let a = truth.project(*p).unwrap();
            let b = est.project(*p).unwrap();
            assert!((a[0] - b[0]).abs() < 1e-6 && (a[1] - b[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn singular_matrix_is_rejected() {
        assert!(Homography::from_matrix(Matrix3::zeros()).is_none());
        let inv = Homography::identity().inverse().unwrap();
        assert_eq!(inv, Homography::identity());
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        let h = Homography::from_matrix(Matrix3::new(
            0.9, 0.1, 30.0, -0.05, 1.2, 4.0, 2e-4, 1e-4, 1.0,
        ))
        .unwrap();
        let round = h.compose(&h.inverse().unwrap()).unwrap();
        let p = round.project([123.0, 45.0]).unwrap();
        assert!((p[0] - 123.0).abs() < 1e-9 && (p[1] - 45.0).abs() < 1e-9);
    }
}
