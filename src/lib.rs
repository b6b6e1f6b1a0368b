//! RefMatch finds which of several reference images appears in a frame and
//! where.
//!
//! A frame is matched against every reference with a classical feature
//! pipeline (ORB, BRISK, AKAZE or SIFT), verified with a RANSAC homography and
//! ranked by a simple policy: a reference is kept only when it has enough
//! matches, projects to a large enough region and beats every earlier
//! reference. The retained transform can be drawn as a bounding quad or used
//! to warp the frame into alignment. A neural detector path is available with
//! the `onnx` feature.
//!
//! Optional features: `rayon` (parallel matching and reference extraction),
//! `simd` (vectorised L2 distances), `image-io` (loading, encoding, drawing),
//! `tracing` (spans and events), `onnx` (ONNX Runtime detector).

pub mod capture;
pub mod detect;
pub mod features;
pub mod geometry;
pub mod image;
pub mod lowlevel;
pub mod matching;
pub mod pipeline;
pub mod reference;
#[cfg(feature = "image-io")]
pub mod render;
pub mod select;
mod trace;
pub mod util;

pub use capture::{CaptureRegion, FrameCapture};
pub use detect::{best_prediction, parse_predictions, Detection, DetectionConfig, VisibleRegion};
pub use features::{extractor_for, DetectorKind, ExtractOptions, FeatureExtractor, Features};
pub use geometry::{Homography, Quad};
pub use image::filter::Preprocess;
pub use image::{ImageView, OwnedImage};
pub use matching::{BruteForceMatcher, Correspondence, DescriptorMatcher};
pub use pipeline::{
    BestMatch, CandidateReport, MatchCountSource, PassOutcome, PipelineConfig, ReferenceMatcher,
    Verdict,
};
pub use reference::{Reference, ReferenceSet};
pub use select::{should_keep, CandidateResult, Rejection, SelectionState, Thresholds};
pub use util::{RefMatchError, RefMatchResult};
