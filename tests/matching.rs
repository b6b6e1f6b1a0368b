use refmatch::features::Descriptors;
use refmatch::lowlevel::{hamming, ratio_test};
use refmatch::{BruteForceMatcher, DescriptorMatcher, RefMatchError};

fn binary(rows: &[[u8; 2]]) -> Descriptors {
    Descriptors::Binary {
        bytes_per_row: 2,
        data: rows.iter().flatten().copied().collect(),
    }
}

#[test]
fn knn_returns_two_nearest_in_order() {
    let query = binary(&[[0b0000_0000, 0]]);
    let train = binary(&[[0b1111_0000, 0], [0b0000_0001, 0], [0b0000_0111, 0]]);
    let pairs = BruteForceMatcher::new().knn2(&query, &train).unwrap();
    assert_eq!(pairs.len(), 1);
    let [first, second] = pairs[0];
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!((first.train_idx, first.distance), (1, 1.0));
    assert_eq!((second.train_idx, second.distance), (2, 3.0));
}

#[test]
fn ratio_test_is_strict() {
    let query = binary(&[[0, 0], [0xFF, 0]]);
    // Row 0: d1 = 3, d2 = 4 -> 3 < 0.75 * 4 fails (equal).
    // Row 1: d1 = 0, d2 = 4 -> kept.
    let train = binary(&[[0b0000_0111, 0], [0b0000_1111, 0], [0xFF, 0]]);
    let pairs = BruteForceMatcher::new().knn2(&query, &train).unwrap();
    let good = ratio_test(&pairs, 0.75);
    assert_eq!(good.len(), 1);
    assert_eq!((good[0].query_idx, good[0].train_idx), (1, 2));
}

#[test]
fn single_train_row_never_passes_ratio_test() {
    let query = binary(&[[1, 2], [3, 4]]);
    let train = binary(&[[1, 2]]);
    let pairs = BruteForceMatcher::new().knn2(&query, &train).unwrap();
    assert!(pairs.iter().all(|p| p[1].is_none()));
    assert!(ratio_test(&pairs, 0.75).is_empty());
}

#[test]
fn equal_distances_prefer_lower_train_index() {
    let query = binary(&[[0, 0]]);
    let train = binary(&[[1, 0], [2, 0], [4, 0]]);
    let pairs = BruteForceMatcher::new().knn2(&query, &train).unwrap();
    assert_eq!(pairs[0][0].map(|c| c.train_idx), Some(0));
    assert_eq!(pairs[0][1].map(|c| c.train_idx), Some(1));
}

#[test]
fn float_descriptors_use_l2() {
    let query = Descriptors::Float {
        dims: 3,
        data: vec![0.0, 0.0, 0.0],
    };
    let train = Descriptors::Float {
        dims: 3,
        data: vec![3.0, 4.0, 0.0, 0.0, 0.0, 1.0],
    };
    let pairs = BruteForceMatcher::new().knn2(&query, &train).unwrap();
    let best = pairs[0][0].unwrap();
    assert_eq!(best.train_idx, 1);
    assert!((best.distance - 1.0).abs() < 1e-6);
    assert!((pairs[0][1].unwrap().distance - 5.0).abs() < 1e-6);
}

#[test]
fn mixed_layouts_are_rejected() {
    let query = binary(&[[0, 0]]);
    let train = Descriptors::Float {
        dims: 2,
        data: vec![0.0, 0.0],
    };
    assert!(matches!(
        BruteForceMatcher::new().knn2(&query, &train),
        Err(RefMatchError::DescriptorMismatch { .. })
    ));
}

#[test]
fn hamming_counts_differing_bits() {
    let a = [0xFFu8; 32];
    let mut b = [0xFFu8; 32];
    b[0] = 0;
    b[31] = 0b1010_1010;
    assert_eq!(hamming(&a, &b), 12);
}
