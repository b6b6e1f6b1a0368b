//! Angle and peak-fitting helpers shared by the feature backends.

/// Wraps an angle in degrees to the range [0, 360).
pub(crate) fn wrap_deg_360(angle_deg: f32) -> f32 {
    let wrapped = angle_deg % 360.0;
    let wrapped = if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    };
    // Tiny negative inputs round up to exactly 360 in f32.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Computes sine and cosine for an angle in degrees.
pub(crate) fn sin_cos_deg(angle_deg: f32) -> (f32, f32) {
    angle_deg.to_radians().sin_cos()
}

/// Estimates the sub-sample peak offset for a quadratic fit.
///
/// Given samples at `x = -1, 0, +1` (`fm`, `f0`, `fp`), this returns the peak
/// offset `dx` in `[-1, 1]` when the fitted parabola is concave and stable.
pub(crate) fn quad_peak_offset_1d(fm: f32, f0: f32, fp: f32) -> Option<f32> {
    if !fm.is_finite() || !f0.is_finite() || !fp.is_finite() {
        return None;
    }

    let denom = fm - 2.0 * f0 + fp;
    if denom.abs() < 1e-6 || denom >= 0.0 {
        return None;
    }

    let dx = 0.5 * (fm - fp) / denom;
    if dx.is_finite() && dx.abs() <= 1.0 {
        Some(dx)
    } else {
        None
    }
}

/// Same as [`quad_peak_offset_1d`] but for a minimum (convex parabola).
pub(crate) fn quad_valley_offset_1d(fm: f32, f0: f32, fp: f32) -> Option<f32> {
    quad_peak_offset_1d(-fm, -f0, -fp)
}

#[cfg(test)]
mod tests {
    use super::{quad_peak_offset_1d, quad_valley_offset_1d, sin_cos_deg, wrap_deg_360};

    #[test]
    fn wrap_deg_360_maps_to_expected_range() {
        assert!((wrap_deg_360(-90.0) - 270.0).abs() < 1e-4);
        assert!((wrap_deg_360(725.0) - 5.0).abs() < 1e-4);
        assert!(wrap_deg_360(360.0).abs() < 1e-4);
    }

    #[test]
    fn sin_cos_deg_matches_quadrants() {
        let (sin, cos) = sin_cos_deg(90.0);
        assert!(sin > 0.999);
        assert!(cos.abs() < 1e-6);
    }

    #[test]
    fn quad_peak_offset_shifted() {
        let f = |x: f32| 1.0 - (x - 0.25).powi(2);
        let dx = quad_peak_offset_1d(f(-1.0), f(0.0), f(1.0)).unwrap();
        assert!((dx - 0.25).abs() < 1e-5);
    }

    #[test]
    fn quad_peak_offset_rejects_non_concave() {
        assert!(quad_peak_offset_1d(1.0, 0.5, 1.0).is_none());
        assert!(quad_valley_offset_1d(1.0, 0.5, 1.0).is_some());
    }
}
