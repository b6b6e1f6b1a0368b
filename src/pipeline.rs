//! Frame evaluation against a reference set.
//!
//! One pass extracts the frame features once, then visits every reference in
//! order: ratio-tested knn matching, RANSAC homography (frame to reference),
//! projection of the reference outline into the frame and a decision by the
//! selection policy. Everything a reference iteration allocates is owned by
//! that iteration; only the retained best transform survives the loop.

use crate::features::{extract_with, DetectorKind, ExtractOptions, FeatureExtractor, Features};
use crate::geometry::{
    polygon_area, reference_corners, GeometricVerifier, Homography, Point, Quad, RansacHomography,
};
use crate::image::ImageView;
use crate::matching::{ratio_test, BruteForceMatcher, DescriptorMatcher};
use crate::reference::{FeatureCache, Reference, ReferenceSet};
use crate::select::{CandidateResult, Rejection, SelectionState, Thresholds};
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::{RefMatchError, RefMatchResult};

/// Which count feeds the selection policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchCountSource {
    /// Correspondences that survived the ratio test.
    #[default]
    GoodMatches,
    /// RANSAC inliers among the good matches.
    Inliers,
}

/// Pass configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Lowe ratio for the nearest/second-nearest test.
    pub ratio: f32,
    /// Selection thresholds.
    pub thresholds: Thresholds,
    /// RANSAC reprojection threshold in pixels.
    pub ransac_threshold: f64,
    /// RANSAC iteration cap.
    pub ransac_max_iters: usize,
    /// RANSAC confidence.
    pub ransac_confidence: f64,
    /// RANSAC sampling seed.
    pub ransac_seed: u64,
    /// Count used for selection.
    pub match_count: MatchCountSource,
    /// Image preparation before extraction.
    pub extract: ExtractOptions,
    /// Use rayon inside matching and reference extraction.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ratio: 0.75,
            thresholds: Thresholds::default(),
            ransac_threshold: 5.0,
            ransac_max_iters: 2000,
            ransac_confidence: 0.995,
            ransac_seed: 0,
            match_count: MatchCountSource::GoodMatches,
            extract: ExtractOptions::default(),
            parallel: false,
        }
    }
}

impl PipelineConfig {
    /// Checks value ranges.
    pub fn validate(&self) -> RefMatchResult<()> {
        if !self.ratio.is_finite() || self.ratio <= 0.0 || self.ratio > 1.0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "ratio must be in (0, 1]",
            });
        }
        if !self.thresholds.min_area.is_finite() || self.thresholds.min_area < 0.0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "min_area must be finite and >= 0",
            });
        }
        if !self.ransac_threshold.is_finite() || self.ransac_threshold <= 0.0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "ransac_threshold must be > 0",
            });
        }
        if self.ransac_max_iters == 0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "ransac_max_iters must be > 0",
            });
        }
        if !(self.ransac_confidence > 0.0 && self.ransac_confidence < 1.0) {
            return Err(RefMatchError::InvalidConfig {
                reason: "ransac_confidence must be in (0, 1)",
            });
        }
        if self.extract.working_width == Some(0) {
            return Err(RefMatchError::InvalidConfig {
                reason: "working_width must be > 0",
            });
        }
        Ok(())
    }

    fn ransac(&self) -> RansacHomography {
        RansacHomography {
            threshold: self.ransac_threshold,
            max_iters: self.ransac_max_iters,
            confidence: self.ransac_confidence,
            seed: self.ransac_seed,
        }
    }
}

/// Final verdict for one reference in a pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    /// Retained as the best match at the end of the pass.
    Kept,
    /// Was the best for a while, then replaced by a later reference.
    Superseded,
    /// Never became the best.
    Rejected(Rejection),
}

/// Per-reference record of a pass.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateReport {
    /// Position in the reference set.
    pub reference_id: usize,
    /// Family used for this evaluation.
    pub detector: DetectorKind,
    /// Correspondences after the ratio test.
    pub good_matches: usize,
    /// RANSAC inliers (0 when geometry was not attempted).
    pub inliers: usize,
    /// Count fed to the selection policy.
    pub match_count: usize,
    /// Projected outline area (0 without a transform).
    pub area: f64,
    /// Outcome.
    pub verdict: Verdict,
}

/// The retained best reference and its transform.
#[derive(Clone, Debug, PartialEq)]
pub struct BestMatch {
    /// Position in the reference set.
    pub reference_id: usize,
    /// Family that produced the match.
    pub detector: DetectorKind,
    /// Count used by the selection policy.
    pub match_count: usize,
    /// RANSAC inliers.
    pub inliers: usize,
    /// Projected outline area.
    pub area: f64,
    /// Frame to reference transform.
    pub homography: Homography,
    /// Reference outline in frame coordinates.
    pub corners: Quad,
    /// Reference width and height.
    pub reference_size: (usize, usize),
}

/// Result of one pass; "no match" is `best == None`, not an error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassOutcome {
    /// Retained best, if any reference qualified.
    pub best: Option<BestMatch>,
    /// One report per evaluated reference (primary, then fallback).
    pub reports: Vec<CandidateReport>,
    /// True when the fallback family produced this outcome.
    pub used_fallback: bool,
}

/// Transform state carried by the selection state for the current best.
struct Retained {
    homography: Homography,
    corners: Quad,
    inliers: usize,
}

struct Evaluated {
    candidate: CandidateResult,
    good_matches: usize,
    inliers: usize,
    retained: Retained,
}

struct Family {
    extractor: Box<dyn FeatureExtractor>,
    cache: FeatureCache,
}

impl Family {
    fn new(extractor: Box<dyn FeatureExtractor>) -> Self {
        Self {
            extractor,
            cache: FeatureCache::new(),
        }
    }
}

/// Matches frames against a fixed reference set.
///
/// Reference features are extracted on the first pass and reused afterwards.
pub struct ReferenceMatcher {
    references: ReferenceSet,
    primary: Family,
    fallback: Option<Family>,
    matcher: Option<Box<dyn DescriptorMatcher>>,
    verifier: Option<Box<dyn GeometricVerifier>>,
    config: PipelineConfig,
}

impl ReferenceMatcher {
    /// Creates a matcher with default configuration and native collaborators.
    pub fn new<E: FeatureExtractor + 'static>(references: ReferenceSet, extractor: E) -> Self {
        Self {
            references,
            primary: Family::new(Box::new(extractor)),
            fallback: None,
            matcher: None,
            verifier: None,
            config: PipelineConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Family to rerun with once when the primary pass keeps nothing.
    pub fn with_fallback<E: FeatureExtractor + 'static>(mut self, extractor: E) -> Self {
        self.fallback = Some(Family::new(Box::new(extractor)));
        self
    }

    /// Replaces the descriptor matcher; by default a brute-force matcher
    /// honouring `PipelineConfig::parallel` is used.
    pub fn with_matcher<M: DescriptorMatcher + 'static>(mut self, matcher: M) -> Self {
        self.matcher = Some(Box::new(matcher));
        self
    }

    /// Replaces the geometric verifier; by default RANSAC is built from the
    /// configuration.
    pub fn with_verifier<V: GeometricVerifier + 'static>(mut self, verifier: V) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    /// Returns the reference set.
    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Evaluates one frame against every reference.
    pub fn evaluate(&self, frame: ImageView<'_, u8>) -> RefMatchResult<PassOutcome> {
        self.config.validate()?;
        let _span = trace_span!(
            "evaluate_pass",
            references = self.references.len(),
            width = frame.width(),
            height = frame.height()
        )
        .entered();

        let mut outcome = self.run_family(frame, &self.primary);
        if outcome.best.is_none() {
            if let Some(fallback) = &self.fallback {
                trace_event!("fallback_pass", references = self.references.len());
                let second = self.run_family(frame, fallback);
                outcome.reports.extend(second.reports);
                outcome.best = second.best;
                outcome.used_fallback = true;
            }
        }
        if let Some(best) = &outcome.best {
            trace_event!("pass_done", kept = true, reference = best.reference_id);
        } else {
            trace_event!("pass_done", kept = false);
        }
        Ok(outcome)
    }

    fn run_family(&self, frame: ImageView<'_, u8>, family: &Family) -> PassOutcome {
        let kind = family.extractor.kind();
        let _span = trace_span!("family_pass", detector = kind.name()).entered();
        let cfg = &self.config;

        let frame_features = match extract_with(&*family.extractor, frame, &cfg.extract) {
            Ok(features) => Some(features),
            Err(err) => {
                trace_warn!(
                    "frame_extract_failed",
                    detector = kind.name(),
                    error = err.to_string().as_str()
                );
                None
            }
        };
        let reference_features = family.cache.get_or_extract(
            &self.references,
            &*family.extractor,
            &cfg.extract,
            cfg.parallel,
        );

        let owned_matcher;
        let matcher: &dyn DescriptorMatcher = match &self.matcher {
            Some(m) => m.as_ref(),
            None => {
                owned_matcher = BruteForceMatcher::new().with_parallel(cfg.parallel);
                &owned_matcher
            }
        };
        let owned_verifier;
        let verifier: &dyn GeometricVerifier = match &self.verifier {
            Some(v) => v.as_ref(),
            None => {
                owned_verifier = cfg.ransac();
                &owned_verifier
            }
        };

        let mut state: SelectionState<Retained> = SelectionState::new();
        let mut reports: Vec<CandidateReport> = Vec::with_capacity(self.references.len());
        let mut kept_report: Option<usize> = None;
        for (idx, reference) in self.references.iter().enumerate() {
            let evaluated = self.evaluate_reference(
                idx,
                reference,
                frame_features.as_ref(),
                reference_features.get(idx).and_then(Option::as_ref),
                matcher,
                verifier,
            );
            let report = match evaluated {
                Ok(ev) => {
                    let mut report = CandidateReport {
                        reference_id: idx,
                        detector: kind,
                        good_matches: ev.good_matches,
                        inliers: ev.inliers,
                        match_count: ev.candidate.match_count,
                        area: ev.candidate.area,
                        verdict: Verdict::Kept,
                    };
                    match state.offer(ev.candidate, ev.retained, &cfg.thresholds) {
                        Ok(()) => {
                            if let Some(prev) = kept_report.replace(reports.len()) {
                                reports[prev].verdict = Verdict::Superseded;
                            }
                        }
                        Err(rejection) => report.verdict = Verdict::Rejected(rejection),
                    }
                    report
                }
                Err((rejection, good_matches, inliers)) => CandidateReport {
                    reference_id: idx,
                    detector: kind,
                    good_matches,
                    inliers,
                    match_count: match cfg.match_count {
                        MatchCountSource::GoodMatches => good_matches,
                        MatchCountSource::Inliers => inliers,
                    },
                    area: 0.0,
                    verdict: Verdict::Rejected(rejection),
                },
            };
            trace_event!(
                "candidate",
                reference = idx,
                good = report.good_matches,
                inliers = report.inliers,
                area = report.area
            );
            reports.push(report);
        }

        let best = state.finish().and_then(|(candidate, retained)| {
            let reference = self.references.get(candidate.reference_id).ok()?;
            Some(BestMatch {
                reference_id: candidate.reference_id,
                detector: kind,
                match_count: candidate.match_count,
                inliers: retained.inliers,
                area: candidate.area,
                homography: retained.homography,
                corners: retained.corners,
                reference_size: reference.size(),
            })
        });
        PassOutcome {
            best,
            reports,
            used_fallback: false,
        }
    }

    /// Matches and verifies one reference.
    ///
    /// Failures carry the rejection plus the good-match and inlier counts
    /// reached before the failure.
    fn evaluate_reference(
        &self,
        idx: usize,
        reference: &Reference,
        frame: Option<&Features>,
        train: Option<&Features>,
        matcher: &dyn DescriptorMatcher,
        verifier: &dyn GeometricVerifier,
    ) -> Result<Evaluated, (Rejection, usize, usize)> {
        let cfg = &self.config;
        let min_matches = cfg.thresholds.min_matches;
        let insufficient = |got: usize| Rejection::InsufficientMatches {
            got,
            min: min_matches,
        };
        let degenerate = Rejection::DegenerateGeometry {
            area: 0.0,
            min: cfg.thresholds.min_area,
        };

        let (Some(frame), Some(train)) = (frame, train) else {
            return Err((insufficient(0), 0, 0));
        };
        if frame.is_empty() || train.is_empty() {
            return Err((insufficient(0), 0, 0));
        }

        let pairs = match matcher.knn2(frame.descriptors(), train.descriptors()) {
            Ok(pairs) => pairs,
            Err(err) => {
                trace_warn!("match_failed", error = err.to_string().as_str());
                return Err((insufficient(0), 0, 0));
            }
        };
        let good = ratio_test(&pairs, cfg.ratio);
        let good_count = good.len();
        if good_count < 2 || good_count < min_matches {
            return Err((insufficient(good_count), good_count, 0));
        }

        // Correspondences with indices outside either keypoint list are dropped.
        let (src, dst): (Vec<Point>, Vec<Point>) = good
            .iter()
            .filter_map(|m| {
                let q = frame.keypoints().get(m.query_idx)?;
                let t = train.keypoints().get(m.train_idx)?;
                Some(([q.x as f64, q.y as f64], [t.x as f64, t.y as f64]))
            })
            .unzip();
        if src.len() < 2 {
            return Err((insufficient(src.len()), good_count, 0));
        }

        let Some(verified) = verifier.verify(&src, &dst) else {
            return Err((degenerate, good_count, 0));
        };
        let inliers = verified.inlier_count();
        let (width, height) = reference.size();
        let corners = verified
            .homography
            .inverse()
            .and_then(|inv| inv.project_quad(&reference_corners(width, height)));
        let Some(corners) = corners else {
            return Err((degenerate, good_count, inliers));
        };
        let area = polygon_area(&corners);

        let match_count = match cfg.match_count {
            MatchCountSource::GoodMatches => good_count,
            MatchCountSource::Inliers => inliers,
        };
        Ok(Evaluated {
            candidate: CandidateResult {
                reference_id: idx,
                match_count,
                area,
            },
            good_matches: good_count,
            inliers,
            retained: Retained {
                homography: verified.homography,
                corners,
                inliers,
            },
        })
    }
}
