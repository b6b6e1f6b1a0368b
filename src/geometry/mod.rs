//! Planar geometry: homographies, robust estimation, polygon area and warping.

pub mod homography;
pub mod ransac;
pub mod warp;

pub use homography::Homography;
pub use ransac::{GeometricVerifier, RansacHomography, Verified};
pub use warp::{warp_perspective, warp_perspective_u8};

/// A 2D point `[x, y]` in pixels.
pub type Point = [f64; 2];

/// Four corners of a planar region, in drawing order.
pub type Quad = [Point; 4];

/// Corners of a `width x height` image in the order
/// `(0, 0), (0, h), (w, h), (w, 0)`.
pub fn reference_corners(width: usize, height: usize) -> Quad {
    let (w, h) = (width as f64, height as f64);
    [[0.0, 0.0], [0.0, h], [w, h], [w, 0.0]]
}

/// Absolute shoelace area of a simple polygon.
///
/// The result does not depend on winding order. Fewer than three points
/// enclose no area.
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0f64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p[0] * q[1] - q[0] * p[1];
    }
    (0.5 * twice).abs()
}

#[cfg(test)]
mod tests {
    use super::{polygon_area, reference_corners};

    #[test]
    fn rectangle_area_ignores_winding() {
        let mut quad = reference_corners(400, 300);
        assert!((polygon_area(&quad) - 120_000.0).abs() < 1e-9);
        quad.reverse();
        assert!((polygon_area(&quad) - 120_000.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_polygons_have_zero_area() {
        assert_eq!(polygon_area(&[[0.0, 0.0], [1.0, 1.0]]), 0.0);
        assert_eq!(polygon_area(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]), 0.0);
    }
}
