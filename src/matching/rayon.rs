//! Rayon-parallel brute-force matching (feature-gated).
//!
//! Query rows are distributed across threads; `collect` keeps the output in
//! query order so results equal the sequential path.

use crate::features::Descriptors;
use crate::matching::{knn2_row, KnnPair};
use rayon::prelude::*;

/// Parallel two-nearest-neighbour search over every query row.
pub fn knn2_par(query: &Descriptors, train: &Descriptors) -> Vec<KnnPair> {
    (0..query.len())
        .into_par_iter()
        .map(|qi| knn2_row(query, qi, train))
        .collect()
}
