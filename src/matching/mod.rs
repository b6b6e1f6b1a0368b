//! Descriptor matching: two-nearest-neighbour search and the ratio test.
//!
//! The query side is the frame, the train side a reference image. For every
//! query row the two closest train rows are found; the ratio test then keeps a
//! correspondence only when the best distance is clearly smaller than the
//! runner-up.

use crate::features::{Descriptors, Metric};
use crate::util::{RefMatchError, RefMatchResult};

pub mod distance;
#[cfg(feature = "rayon")]
pub mod rayon;
#[cfg(feature = "simd")]
pub mod simd;

/// One query-to-train descriptor pairing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    /// Row in the query (frame) descriptors.
    pub query_idx: usize,
    /// Row in the train (reference) descriptors.
    pub train_idx: usize,
    /// Descriptor distance (Hamming bits or L2).
    pub distance: f32,
}

/// Best and second-best train rows for one query row.
pub type KnnPair = [Option<Correspondence>; 2];

/// Finds the two nearest train rows for each query row.
pub trait DescriptorMatcher: Send + Sync {
    /// Returns one entry per query row, in query order.
    fn knn2(&self, query: &Descriptors, train: &Descriptors) -> RefMatchResult<Vec<KnnPair>>;
}

/// Keeps the best correspondence of each pair when `d1 < ratio * d2`.
///
/// Pairs without a second neighbour never pass.
pub fn ratio_test(pairs: &[KnnPair], ratio: f32) -> Vec<Correspondence> {
    pairs
        .iter()
        .filter_map(|pair| match pair {
            [Some(best), Some(second)] if best.distance < ratio * second.distance => Some(*best),
            _ => None,
        })
        .collect()
}

fn check_compatible(query: &Descriptors, train: &Descriptors) -> RefMatchResult<()> {
    if query.metric() != train.metric() {
        return Err(RefMatchError::DescriptorMismatch {
            reason: "binary and float descriptors cannot be compared",
        });
    }
    if query.row_width() != train.row_width() {
        return Err(RefMatchError::DescriptorMismatch {
            reason: "descriptor row widths differ",
        });
    }
    Ok(())
}

#[inline]
fn row_distance(query: &Descriptors, qi: usize, train: &Descriptors, ti: usize) -> f32 {
    match query.metric() {
        Metric::Hamming => match (query.binary_row(qi), train.binary_row(ti)) {
            (Some(a), Some(b)) => distance::hamming(a, b) as f32,
            _ => f32::INFINITY,
        },
        Metric::L2 => match (query.float_row(qi), train.float_row(ti)) {
            #[cfg(feature = "simd")]
            (Some(a), Some(b)) => simd::l2(a, b),
            #[cfg(not(feature = "simd"))]
            (Some(a), Some(b)) => distance::l2(a, b),
            _ => f32::INFINITY,
        },
    }
}

/// Exhaustive two-nearest search for a single query row.
///
/// Equal distances keep the lower train index first.
pub(crate) fn knn2_row(query: &Descriptors, qi: usize, train: &Descriptors) -> KnnPair {
    let mut best: KnnPair = [None, None];
    for ti in 0..train.len() {
        let distance = row_distance(query, qi, train, ti);
        let candidate = Correspondence {
            query_idx: qi,
            train_idx: ti,
            distance,
        };
        match best {
            [None, _] => best[0] = Some(candidate),
            [Some(b0), _] if distance < b0.distance => {
                best[1] = best[0];
                best[0] = Some(candidate);
            }
            [Some(_), None] => best[1] = Some(candidate),
            [Some(_), Some(b1)] if distance < b1.distance => best[1] = Some(candidate),
            _ => {}
        }
    }
    best
}

/// Brute-force matcher using the metric implied by the descriptors.
#[derive(Clone, Copy, Debug, Default)]
pub struct BruteForceMatcher {
    #[cfg_attr(not(feature = "rayon"), allow(dead_code))]
    parallel: bool,
}

impl BruteForceMatcher {
    /// Creates a sequential matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spreads query rows over the rayon pool when the `rayon` feature is on.
    ///
    /// Without the feature this flag is ignored.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl DescriptorMatcher for BruteForceMatcher {
    fn knn2(&self, query: &Descriptors, train: &Descriptors) -> RefMatchResult<Vec<KnnPair>> {
        check_compatible(query, train)?;
        #[cfg(feature = "rayon")]
        if self.parallel {
            return Ok(self::rayon::knn2_par(query, train));
        }
        Ok((0..query.len())
            .map(|qi| knn2_row(query, qi, train))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{knn2_row, ratio_test, Correspondence};
    use crate::features::Descriptors;

    fn c(train_idx: usize, distance: f32) -> Option<Correspondence> {
        Some(Correspondence {
            query_idx: 0,
            train_idx,
            distance,
        })
    }

    #[test]
    fn ratio_test_is_strict() {
        let pairs = vec![[c(0, 7.0), c(1, 10.0)], [c(0, 7.5), c(1, 10.0)], [c(2, 1.0), None]];
        let kept = ratio_test(&pairs, 0.75);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].distance, 7.0);
    }

    #[test]
    fn knn2_row_prefers_lower_index_on_ties() {
        let train = Descriptors::Binary {
            bytes_per_row: 1,
            data: vec![0b1111, 0b0001, 0b0001, 0b0000],
        };
        let query = Descriptors::Binary {
            bytes_per_row: 1,
            data: vec![0b0011],
        };
        let pair = knn2_row(&query, 0, &train);
        assert_eq!(pair[0].map(|m| m.train_idx), Some(1));
        assert_eq!(pair[1].map(|m| m.train_idx), Some(2));
    }
}
