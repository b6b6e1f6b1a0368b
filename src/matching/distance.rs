//! Scalar descriptor distances.

/// Number of differing bits between two packed binary rows.
///
/// Rows are compared eight bytes at a time; a trailing partial chunk is
/// handled byte-wise.
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);
    let mut bits = 0u32;
    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        let wa = u64::from_le_bytes([ca[0], ca[1], ca[2], ca[3], ca[4], ca[5], ca[6], ca[7]]);
        let wb = u64::from_le_bytes([cb[0], cb[1], cb[2], cb[3], cb[4], cb[5], cb[6], cb[7]]);
        bits += (wa ^ wb).count_ones();
    }
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        bits += (x ^ y).count_ones();
    }
    bits
}

/// Euclidean distance between two float rows.
#[inline]
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::{hamming, l2};

    #[test]
    fn hamming_counts_bits_across_chunk_boundary() {
        let a = [0u8; 10];
        let mut b = [0u8; 10];
        b[0] = 0b1010_0001;
        b[9] = 0xff;
        assert_eq!(hamming(&a, &b), 3 + 8);
        assert_eq!(hamming(&b, &b), 0);
    }

    #[test]
    fn l2_matches_pythagoras() {
        assert!((l2(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}
