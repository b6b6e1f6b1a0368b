use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refmatch::features::{Descriptors, Keypoint};
use refmatch::lowlevel::{GeometricVerifier, Point, RansacHomography, Verified};
use refmatch::{
    DetectorKind, ExtractOptions, FeatureExtractor, Features, ImageView, MatchCountSource,
    OwnedImage, PipelineConfig, RefMatchError, RefMatchResult, Reference, ReferenceMatcher,
    ReferenceSet, Rejection, Thresholds, Verdict,
};

/// Frame keypoints shared by every scene.
fn frame_points(n: usize) -> Vec<(f32, f32)> {
    let mut rng = StdRng::seed_from_u64(21);
    (0..n)
        .map(|_| (rng.random_range(20.0..600.0), rng.random_range(20.0..440.0)))
        .collect()
}

const CODE_BYTES: usize = 64;
const DECOY_ID: usize = 511;

/// Row `i` of a 512x512 Sylvester-Hadamard matrix: distinct rows are exactly
/// 256 bits apart, so only identical ids pass the ratio test.
fn descriptor(i: usize) -> [u8; CODE_BYTES] {
    let mut row = [0u8; CODE_BYTES];
    for j in 0..CODE_BYTES * 8 {
        if (i & j).count_ones() % 2 == 1 {
            row[j / 8] |= 1 << (j % 8);
        }
    }
    row
}

fn features(points: &[(f32, f32)], ids: &[usize]) -> Features {
    let keypoints = points
        .iter()
        .map(|&(x, y)| Keypoint {
            x,
            y,
            size: 7.0,
            angle_deg: 0.0,
            response: 1.0,
            octave: 0,
        })
        .collect();
    let data = ids.iter().flat_map(|&i| descriptor(i)).collect();
    Features::new(
        keypoints,
        Descriptors::Binary {
            bytes_per_row: CODE_BYTES,
            data,
        },
    )
    .unwrap()
}

/// Reference seen by the frame through a pure translation: its first
/// `matches` frame points appear at `frame - offset`.
struct Scene {
    offset: (f32, f32),
    matches: usize,
    size: (usize, usize),
}

/// Extractor that looks up canned features by the first pixel value.
/// Value 0 is the frame, value `k + 1` is reference `k`.
struct TableExtractor {
    frame: Vec<(f32, f32)>,
    scenes: Vec<Scene>,
    calls: Arc<AtomicUsize>,
    kind: DetectorKind,
}

impl TableExtractor {
    fn new(scenes: Vec<Scene>) -> Self {
        Self {
            frame: frame_points(300),
            scenes,
            calls: Arc::new(AtomicUsize::new(0)),
            kind: DetectorKind::Orb,
        }
    }
}

impl FeatureExtractor for TableExtractor {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = *image.get(0, 0).unwrap() as usize;
        if tag == 0 {
            let ids: Vec<usize> = (0..self.frame.len()).collect();
            return Ok(features(&self.frame, &ids));
        }
        let Some(scene) = self.scenes.get(tag - 1) else {
            return Err(RefMatchError::InvalidConfig {
                reason: "unknown reference",
            });
        };
        let mut pts: Vec<(f32, f32)> = self.frame[..scene.matches]
            .iter()
            .map(|&(x, y)| (x - scene.offset.0, y - scene.offset.1))
            .collect();
        let mut ids: Vec<usize> = (0..scene.matches).collect();
        // One row the frame never contains, so a single shared id still has
        // a second neighbour for the ratio test.
        pts.push((1.0, 1.0));
        ids.push(DECOY_ID);
        Ok(features(&pts, &ids))
    }
}

fn reference_set(scenes: &[Scene]) -> ReferenceSet {
    let refs = scenes
        .iter()
        .enumerate()
        .map(|(k, s)| {
            Reference::new(
                format!("ref{k}"),
                OwnedImage::filled(s.size.0, s.size.1, (k + 1) as u8).unwrap(),
            )
        })
        .collect();
    ReferenceSet::new(refs).unwrap()
}

fn plain_config() -> PipelineConfig {
    PipelineConfig {
        extract: ExtractOptions::default(),
        ..PipelineConfig::default()
    }
}

fn frame() -> OwnedImage {
    OwnedImage::filled(640, 480, 0).unwrap()
}

fn matcher_for(scenes: Vec<Scene>) -> ReferenceMatcher {
    let set = reference_set(&scenes);
    ReferenceMatcher::new(set, TableExtractor::new(scenes)).with_config(plain_config())
}

#[test]
fn keeps_reference_with_most_matches() {
    let matcher = matcher_for(vec![
        Scene {
            offset: (10.0, 5.0),
            matches: 40,
            size: (400, 300),
        },
        Scene {
            offset: (-3.0, 8.0),
            matches: 90,
            size: (400, 300),
        },
        Scene {
            offset: (0.0, 0.0),
            matches: 60,
            size: (400, 300),
        },
    ]);
    let outcome = matcher.evaluate(frame().view()).unwrap();
    let best = outcome.best.expect("a reference should be kept");
    assert_eq!(best.reference_id, 1);
    assert_eq!(best.match_count, 90);
    assert_eq!(best.inliers, 90);
    assert_eq!(best.reference_size, (400, 300));
    assert!((best.area - 120_000.0).abs() < 1.0);
    let expected = [[-3.0, 8.0], [-3.0, 308.0], [397.0, 308.0], [397.0, 8.0]];
    for (got, want) in best.corners.iter().zip(expected) {
        assert!((got[0] - want[0]).abs() < 1e-3 && (got[1] - want[1]).abs() < 1e-3);
    }

    let verdicts: Vec<Verdict> = outcome.reports.iter().map(|r| r.verdict).collect();
    assert_eq!(
        verdicts,
        [
            Verdict::Superseded,
            Verdict::Kept,
            Verdict::Rejected(Rejection::NotImproved { got: 60, best: 90 }),
        ]
    );
    assert!(!outcome.used_fallback);
}

#[test]
fn tie_keeps_first_reference() {
    let matcher = matcher_for(vec![
        Scene {
            offset: (0.0, 0.0),
            matches: 50,
            size: (400, 300),
        },
        Scene {
            offset: (5.0, 5.0),
            matches: 50,
            size: (400, 300),
        },
    ]);
    let outcome = matcher.evaluate(frame().view()).unwrap();
    assert_eq!(outcome.best.map(|b| b.reference_id), Some(0));
    assert_eq!(
        outcome.reports[1].verdict,
        Verdict::Rejected(Rejection::NotImproved { got: 50, best: 50 })
    );
}

#[test]
fn small_or_weak_references_are_rejected() {
    let matcher = matcher_for(vec![
        Scene {
            offset: (0.0, 0.0),
            matches: 6,
            size: (400, 300),
        },
        Scene {
            offset: (0.0, 0.0),
            matches: 120,
            size: (200, 150),
        },
    ]);
    let outcome = matcher.evaluate(frame().view()).unwrap();
    assert!(outcome.best.is_none());
    assert_eq!(
        outcome.reports[0].verdict,
        Verdict::Rejected(Rejection::InsufficientMatches { got: 6, min: 10 })
    );
    assert_eq!(outcome.reports[0].inliers, 0);
    match outcome.reports[1].verdict {
        Verdict::Rejected(Rejection::DegenerateGeometry { area, min }) => {
            assert!((area - 30_000.0).abs() < 1.0);
            assert_eq!(min, 80_000.0);
        }
        other => panic!("unexpected verdict {other:?}"),
    }
}

#[test]
fn inlier_count_can_drive_selection() {
    let config = PipelineConfig {
        match_count: MatchCountSource::Inliers,
        ..plain_config()
    };
    let scenes = vec![Scene {
        offset: (2.0, 2.0),
        matches: 30,
        size: (400, 300),
    }];
    let set = reference_set(&scenes);
    let outcome = ReferenceMatcher::new(set, TableExtractor::new(scenes))
        .with_config(config)
        .evaluate(frame().view())
        .unwrap();
    let report = &outcome.reports[0];
    assert_eq!(report.match_count, report.inliers);
    assert_eq!(outcome.best.map(|b| b.match_count), Some(30));
}

#[test]
fn reference_features_are_extracted_once() {
    let scenes = vec![
        Scene {
            offset: (0.0, 0.0),
            matches: 20,
            size: (400, 300),
        },
        Scene {
            offset: (1.0, 1.0),
            matches: 25,
            size: (400, 300),
        },
    ];
    let set = reference_set(&scenes);
    let extractor = TableExtractor::new(scenes);
    let calls = Arc::clone(&extractor.calls);
    let matcher = ReferenceMatcher::new(set, extractor).with_config(plain_config());

    let first = matcher.evaluate(frame().view()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let second = matcher.evaluate(frame().view()).unwrap();
    // Only the frame is extracted again.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(first, second);
}

#[test]
fn fallback_runs_only_when_primary_keeps_nothing() {
    let weak = || {
        vec![Scene {
            offset: (0.0, 0.0),
            matches: 4,
            size: (400, 300),
        }]
    };
    let strong = || {
        vec![Scene {
            offset: (0.0, 0.0),
            matches: 40,
            size: (400, 300),
        }]
    };

    let mut fallback = TableExtractor::new(strong());
    fallback.kind = DetectorKind::Akaze;
    let outcome = ReferenceMatcher::new(reference_set(&weak()), TableExtractor::new(weak()))
        .with_config(plain_config())
        .with_fallback(fallback)
        .evaluate(frame().view())
        .unwrap();
    assert!(outcome.used_fallback);
    assert_eq!(outcome.reports.len(), 2);
    assert_eq!(outcome.reports[0].detector, DetectorKind::Orb);
    assert_eq!(outcome.reports[1].detector, DetectorKind::Akaze);
    assert_eq!(outcome.best.map(|b| b.detector), Some(DetectorKind::Akaze));

    let mut unused = TableExtractor::new(strong());
    unused.kind = DetectorKind::Akaze;
    let unused_calls = Arc::clone(&unused.calls);
    let outcome = ReferenceMatcher::new(reference_set(&strong()), TableExtractor::new(strong()))
        .with_config(plain_config())
        .with_fallback(unused)
        .evaluate(frame().view())
        .unwrap();
    assert!(!outcome.used_fallback);
    assert_eq!(unused_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_reference_extraction_only_skips_that_reference() {
    let scenes = vec![Scene {
        offset: (0.0, 0.0),
        matches: 40,
        size: (400, 300),
    }];
    // Reference tagged 2 has no scene entry, so its extraction fails.
    let refs = vec![
        Reference::new("broken", OwnedImage::filled(400, 300, 2).unwrap()),
        Reference::new("good", OwnedImage::filled(400, 300, 1).unwrap()),
    ];
    let outcome = ReferenceMatcher::new(ReferenceSet::new(refs).unwrap(), TableExtractor::new(scenes))
        .with_config(plain_config())
        .evaluate(frame().view())
        .unwrap();
    assert_eq!(
        outcome.reports[0].verdict,
        Verdict::Rejected(Rejection::InsufficientMatches { got: 0, min: 10 })
    );
    assert_eq!(outcome.best.map(|b| b.reference_id), Some(1));
}

#[test]
fn invalid_config_is_an_error() {
    let scenes = vec![Scene {
        offset: (0.0, 0.0),
        matches: 40,
        size: (400, 300),
    }];
    let set = reference_set(&scenes);
    let matcher = ReferenceMatcher::new(set, TableExtractor::new(scenes)).with_config(
        PipelineConfig {
            ratio: 0.0,
            ..plain_config()
        },
    );
    assert!(matches!(
        matcher.evaluate(frame().view()),
        Err(RefMatchError::InvalidConfig { .. })
    ));
}

#[test]
fn single_correspondence_is_skipped_and_pass_continues() {
    let scenes = vec![
        Scene {
            offset: (0.0, 0.0),
            matches: 1,
            size: (400, 300),
        },
        Scene {
            offset: (4.0, 2.0),
            matches: 60,
            size: (400, 300),
        },
    ];
    let set = reference_set(&scenes);
    let outcome = ReferenceMatcher::new(set, TableExtractor::new(scenes))
        .with_config(PipelineConfig {
            thresholds: Thresholds {
                min_matches: 1,
                min_area: 80_000.0,
            },
            ..plain_config()
        })
        .evaluate(frame().view())
        .unwrap();
    assert_eq!(outcome.reports[0].good_matches, 1);
    assert_eq!(
        outcome.reports[0].verdict,
        Verdict::Rejected(Rejection::InsufficientMatches { got: 1, min: 1 })
    );
    assert_eq!(outcome.reports[1].verdict, Verdict::Kept);
    assert_eq!(outcome.best.map(|b| b.reference_id), Some(1));
}

/// Refuses to fit exactly `refuse` correspondences, otherwise runs RANSAC.
struct RefusingVerifier {
    refuse: usize,
    inner: RansacHomography,
}

impl GeometricVerifier for RefusingVerifier {
    fn verify(&self, src: &[Point], dst: &[Point]) -> Option<Verified> {
        if src.len() == self.refuse {
            return None;
        }
        self.inner.verify(src, dst)
    }
}

#[test]
fn failed_verification_is_degenerate_and_pass_continues() {
    let scenes = || {
        vec![
            Scene {
                offset: (0.0, 0.0),
                matches: 40,
                size: (400, 300),
            },
            Scene {
                offset: (-2.0, 3.0),
                matches: 60,
                size: (400, 300),
            },
        ]
    };
    let run = |match_count| {
        ReferenceMatcher::new(reference_set(&scenes()), TableExtractor::new(scenes()))
            .with_config(PipelineConfig {
                match_count,
                ..plain_config()
            })
            .with_verifier(RefusingVerifier {
                refuse: 40,
                inner: RansacHomography::default(),
            })
            .evaluate(frame().view())
            .unwrap()
    };

    let outcome = run(MatchCountSource::GoodMatches);
    let failed = &outcome.reports[0];
    assert_eq!(
        failed.verdict,
        Verdict::Rejected(Rejection::DegenerateGeometry {
            area: 0.0,
            min: 80_000.0
        })
    );
    assert_eq!((failed.good_matches, failed.inliers), (40, 0));
    assert_eq!(failed.match_count, 40);
    assert_eq!(outcome.best.map(|b| b.reference_id), Some(1));

    // The failed report counts what the selector would have counted.
    let outcome = run(MatchCountSource::Inliers);
    assert_eq!(outcome.reports[0].match_count, 0);
    assert_eq!(outcome.best.map(|b| b.match_count), Some(60));
}

fn block_texture(width: usize, height: usize, seed: u64) -> OwnedImage {
    let block = 8;
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(block);
    let cells: Vec<u8> = (0..cols * height.div_ceil(block))
        .map(|_| rng.random_range(0..=255))
        .collect();
    let data = (0..width * height)
        .map(|i| cells[(i / width / block) * cols + (i % width) / block])
        .collect();
    OwnedImage::new(data, width, height).unwrap()
}

#[test]
fn orb_pipeline_locates_pasted_reference() {
    let target = block_texture(200, 160, 100);
    let distractor = block_texture(200, 160, 200);
    let mut scene = OwnedImage::filled(400, 300, 128).unwrap();
    scene.paste(target.view(), 100, 70);

    let set = ReferenceSet::new(vec![
        Reference::new("distractor", distractor),
        Reference::new("target", target),
    ])
    .unwrap();
    let config = PipelineConfig {
        thresholds: Thresholds {
            min_matches: 10,
            min_area: 20_000.0,
        },
        ..plain_config()
    };
    let outcome = ReferenceMatcher::new(set, refmatch::features::Orb::default())
        .with_config(config)
        .evaluate(scene.view())
        .unwrap();

    let best = outcome.best.expect("target should be found");
    assert_eq!(best.reference_id, 1);
    let expected = [[100.0, 70.0], [100.0, 230.0], [300.0, 230.0], [300.0, 70.0]];
    for (got, want) in best.corners.iter().zip(expected) {
        assert!(
            (got[0] - want[0]).abs() < 3.0 && (got[1] - want[1]).abs() < 3.0,
            "{got:?} vs {want:?}"
        );
    }
    assert!(matches!(outcome.reports[0].verdict, Verdict::Rejected(_)));
}
