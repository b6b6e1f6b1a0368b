//! SIMD L2 distance using the `wide` crate.
//!
//! The inner loop processes eight lanes at a time with `f32x8`; the tail is
//! accumulated in scalar code.

use wide::f32x8;

const LANES: usize = 8;

#[inline]
fn load_f32x8(slice: &[f32]) -> f32x8 {
    f32x8::from([
        slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
    ])
}

#[inline]
fn hsum(v: f32x8) -> f32 {
    v.to_array().iter().sum()
}

/// Euclidean distance between two float rows.
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let simd_end = len / LANES * LANES;
    let mut acc = f32x8::ZERO;
    let mut i = 0;
    while i < simd_end {
        let d = load_f32x8(&a[i..i + LANES]) - load_f32x8(&b[i..i + LANES]);
        acc += d * d;
        i += LANES;
    }
    let mut sum = hsum(acc);
    for j in simd_end..len {
        let d = a[j] - b[j];
        sum += d * d;
    }
    sum.sqrt()
}

#[cfg(test)]
mod tests {
    use super::l2;
    use crate::matching::distance;

    #[test]
    fn simd_l2_agrees_with_scalar() {
        let a: Vec<f32> = (0..131).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..131).map(|i| (i as f32 * 0.11).cos()).collect();
        assert!((l2(&a, &b) - distance::l2(&a, &b)).abs() < 1e-4);
    }
}
