use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refmatch::features::{Descriptors, Metric};
use refmatch::lowlevel::ratio_test;
use refmatch::{
    extractor_for, BruteForceMatcher, DescriptorMatcher, DetectorKind, FeatureExtractor, OwnedImage,
};

fn block_texture(width: usize, height: usize, block: usize, seed: u64) -> OwnedImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(block);
    let rows = height.div_ceil(block);
    let cells: Vec<u8> = (0..cols * rows).map(|_| rng.random_range(0..=255)).collect();
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            data.push(cells[(y / block) * cols + x / block]);
        }
    }
    OwnedImage::new(data, width, height).unwrap()
}

fn expected_layout(kind: DetectorKind) -> (Metric, usize) {
    match kind {
        DetectorKind::Orb => (Metric::Hamming, 32),
        DetectorKind::Brisk => (Metric::Hamming, 64),
        DetectorKind::Akaze => (Metric::Hamming, 61),
        DetectorKind::Sift => (Metric::L2, 128),
    }
}

#[test]
fn every_family_produces_consistent_features() {
    let image = block_texture(192, 160, 8, 1);
    for kind in DetectorKind::ALL {
        let extractor = extractor_for(kind);
        assert_eq!(extractor.kind(), kind);
        let features = extractor.extract(image.view()).unwrap();
        assert!(!features.is_empty(), "{} found nothing", kind.name());

        let (metric, width) = expected_layout(kind);
        assert_eq!(kind.metric(), metric);
        assert_eq!(features.descriptors().metric(), metric);
        assert_eq!(features.descriptors().row_width(), width);
        assert_eq!(features.descriptors().len(), features.len());

        for kp in features.keypoints() {
            assert!(kp.x >= 0.0 && kp.x < 192.0, "{}: x {}", kind.name(), kp.x);
            assert!(kp.y >= 0.0 && kp.y < 160.0, "{}: y {}", kind.name(), kp.y);
            assert!((0.0..360.0).contains(&kp.angle_deg));
            assert!(kp.size > 0.0);
        }
    }
}

#[test]
fn extraction_is_deterministic() {
    let image = block_texture(160, 128, 6, 2);
    for kind in DetectorKind::ALL {
        let extractor = extractor_for(kind);
        let a = extractor.extract(image.view()).unwrap();
        let b = extractor.extract(image.view()).unwrap();
        assert_eq!(a, b, "{}", kind.name());
    }
}

#[test]
fn self_matching_keeps_identity_pairs() {
    let image = block_texture(192, 160, 8, 3);
    let matcher = BruteForceMatcher::new();
    for kind in DetectorKind::ALL {
        let features = extractor_for(kind).extract(image.view()).unwrap();
        let pairs = matcher
            .knn2(features.descriptors(), features.descriptors())
            .unwrap();
        let good = ratio_test(&pairs, 0.75);
        assert!(good.len() >= 10, "{}: {} good", kind.name(), good.len());
        assert!(good.iter().all(|m| m.query_idx == m.train_idx));
    }
}

#[test]
fn flat_image_yields_no_features() {
    let flat = OwnedImage::filled(128, 128, 90).unwrap();
    for kind in DetectorKind::ALL {
        let features = extractor_for(kind).extract(flat.view()).unwrap();
        assert!(features.is_empty(), "{}", kind.name());
        let layout_ok = match features.descriptors() {
            Descriptors::Binary { .. } => kind.metric() == Metric::Hamming,
            Descriptors::Float { .. } => kind.metric() == Metric::L2,
        };
        assert!(layout_ok);
    }
}
