//! Low-level building blocks for custom pipelines.
//!
//! These expose the individual stages behind [`crate::ReferenceMatcher`]:
//! preprocessing filters, pyramids, descriptor distances, DLT/RANSAC and
//! warping. Most users should prefer the top-level API.

pub use crate::features::fast::{detect as detect_fast, Corner};
pub use crate::features::{extract_with, Descriptors, Keypoint, Metric};
pub use crate::geometry::homography::estimate_dlt;
pub use crate::geometry::{
    polygon_area, reference_corners, warp_perspective, warp_perspective_u8, GeometricVerifier,
    Point, RansacHomography, Verified,
};
pub use crate::image::filter::{equalize_hist, gaussian_blur_u8, resize_bilinear};
pub use crate::image::pyramid::ImagePyramid;
pub use crate::matching::distance::{hamming, l2};
pub use crate::matching::{ratio_test, KnnPair};
pub use crate::select::judge;
