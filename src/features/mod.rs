//! Keypoints, descriptors and the feature extraction seam.
//!
//! Every detector family implements [`FeatureExtractor`]. The pipeline only
//! relies on the trait, so any backend producing [`Features`] can be plugged
//! in. The native backends in this module are compact renditions of the
//! classic algorithms.

use crate::image::filter::{resize_bilinear, Preprocess};
use crate::image::ImageView;
use crate::util::{RefMatchError, RefMatchResult};

pub mod akaze;
pub mod brisk;
pub mod fast;
pub mod orb;
pub mod sift;

pub use akaze::{Akaze, AkazeParams};
pub use brisk::{Brisk, BriskParams};
pub use orb::{Orb, OrbParams};
pub use sift::{Sift, SiftParams};

/// A detected interest point in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    /// X coordinate (column) in pixels.
    pub x: f32,
    /// Y coordinate (row) in pixels.
    pub y: f32,
    /// Diameter of the meaningful neighbourhood in pixels.
    pub size: f32,
    /// Dominant orientation in degrees, `[0, 360)`.
    pub angle_deg: f32,
    /// Detector response used for ranking.
    pub response: f32,
    /// Pyramid level the point was detected on.
    pub octave: u8,
}

/// Distance metric implied by a descriptor layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// Bit count of XOR between binary rows.
    Hamming,
    /// Euclidean distance between float rows.
    L2,
}

/// Row-major descriptor matrix, one row per keypoint.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptors {
    /// Packed binary descriptors (bit `i` lives in byte `i / 8`, LSB first).
    Binary { bytes_per_row: usize, data: Vec<u8> },
    /// Floating point descriptors.
    Float { dims: usize, data: Vec<f32> },
}

impl Descriptors {
    /// Returns the number of descriptor rows.
    pub fn len(&self) -> usize {
        match self {
            Descriptors::Binary {
                bytes_per_row,
                data,
            } => data.len().checked_div(*bytes_per_row).unwrap_or(0),
            Descriptors::Float { dims, data } => data.len().checked_div(*dims).unwrap_or(0),
        }
    }

    /// Returns true when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the metric used to compare rows.
    pub fn metric(&self) -> Metric {
        match self {
            Descriptors::Binary { .. } => Metric::Hamming,
            Descriptors::Float { .. } => Metric::L2,
        }
    }

    /// Returns the row width (bytes for binary, floats for float descriptors).
    pub fn row_width(&self) -> usize {
        match self {
            Descriptors::Binary { bytes_per_row, .. } => *bytes_per_row,
            Descriptors::Float { dims, .. } => *dims,
        }
    }

    /// Returns an empty matrix with the same layout.
    pub fn empty_like(&self) -> Self {
        match self {
            Descriptors::Binary { bytes_per_row, .. } => Descriptors::Binary {
                bytes_per_row: *bytes_per_row,
                data: Vec::new(),
            },
            Descriptors::Float { dims, .. } => Descriptors::Float {
                dims: *dims,
                data: Vec::new(),
            },
        }
    }

    /// Returns binary row `i`, if this is a binary matrix.
    pub fn binary_row(&self, i: usize) -> Option<&[u8]> {
        match self {
            Descriptors::Binary {
                bytes_per_row,
                data,
            } => data.get(i * bytes_per_row..(i + 1) * bytes_per_row),
            Descriptors::Float { .. } => None,
        }
    }

    /// Returns float row `i`, if this is a float matrix.
    pub fn float_row(&self, i: usize) -> Option<&[f32]> {
        match self {
            Descriptors::Float { dims, data } => data.get(i * dims..(i + 1) * dims),
            Descriptors::Binary { .. } => None,
        }
    }
}

/// Keypoints with their descriptor rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Features {
    keypoints: Vec<Keypoint>,
    descriptors: Descriptors,
}

impl Features {
    /// Pairs keypoints with descriptors; both must have the same length.
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> RefMatchResult<Self> {
        if descriptors.row_width() == 0 {
            return Err(RefMatchError::DescriptorMismatch {
                reason: "descriptor rows must be non-empty",
            });
        }
        let width = descriptors.row_width();
        let data_len = match &descriptors {
            Descriptors::Binary { data, .. } => data.len(),
            Descriptors::Float { data, .. } => data.len(),
        };
        if data_len % width != 0 {
            return Err(RefMatchError::DescriptorMismatch {
                reason: "descriptor data is not a whole number of rows",
            });
        }
        if descriptors.len() != keypoints.len() {
            return Err(RefMatchError::DescriptorMismatch {
                reason: "keypoint and descriptor counts differ",
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    /// Creates an empty feature set with the given descriptor layout.
    pub fn empty(layout: &Descriptors) -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: layout.empty_like(),
        }
    }

    /// Returns the keypoints.
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Returns the descriptor matrix.
    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    /// Returns the number of features.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Returns true when no features were found.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Multiplies keypoint coordinates and sizes by `factor`.
    pub fn rescale(&mut self, factor: f32) {
        for kp in &mut self.keypoints {
            kp.x *= factor;
            kp.y *= factor;
            kp.size *= factor;
        }
    }
}

/// Feature detector families offered by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Orb,
    Brisk,
    Akaze,
    Sift,
}

impl DetectorKind {
    /// All families in presentation order.
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::Orb,
        DetectorKind::Brisk,
        DetectorKind::Akaze,
        DetectorKind::Sift,
    ];

    /// Lowercase display name.
    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::Orb => "orb",
            DetectorKind::Brisk => "brisk",
            DetectorKind::Akaze => "akaze",
            DetectorKind::Sift => "sift",
        }
    }

    /// Parses a case-insensitive family name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Metric of the descriptors this family produces.
    pub fn metric(self) -> Metric {
        match self {
            DetectorKind::Sift => Metric::L2,
            _ => Metric::Hamming,
        }
    }
}

/// Image to keypoints plus descriptors.
pub trait FeatureExtractor: Send + Sync {
    /// Family implemented by this extractor.
    fn kind(&self) -> DetectorKind;

    /// Detects keypoints and computes their descriptors.
    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features>;
}

impl<E: FeatureExtractor + ?Sized> FeatureExtractor for Box<E> {
    fn kind(&self) -> DetectorKind {
        (**self).kind()
    }

    fn extract(&self, image: ImageView<'_, u8>) -> RefMatchResult<Features> {
        (**self).extract(image)
    }
}

/// Returns a native extractor with default parameters for `kind`.
pub fn extractor_for(kind: DetectorKind) -> Box<dyn FeatureExtractor> {
    match kind {
        DetectorKind::Orb => Box::new(Orb::default()),
        DetectorKind::Brisk => Box::new(Brisk::default()),
        DetectorKind::Akaze => Box::new(Akaze::default()),
        DetectorKind::Sift => Box::new(Sift::default()),
    }
}

/// Image preparation applied before every extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Photometric preprocessing.
    pub preprocess: Option<Preprocess>,
    /// Resize to this width before extraction; keypoints are mapped back.
    pub working_width: Option<usize>,
}

/// Runs `extractor` on `image` after applying `options`.
///
/// Keypoints are always reported in the coordinates of `image`.
pub fn extract_with<E: FeatureExtractor + ?Sized>(
    extractor: &E,
    image: ImageView<'_, u8>,
    options: &ExtractOptions,
) -> RefMatchResult<Features> {
    let prepared = match options.preprocess {
        Some(preprocess) => Some(preprocess.apply(image)?),
        None => None,
    };
    let view = prepared.as_ref().map_or(image, |img| img.view());

    match options.working_width {
        Some(width) if width > 0 && width != view.width() => {
            let factor = view.width() as f32 / width as f32;
            let height = ((view.height() as f32 / factor).round() as usize).max(1);
            let resized = resize_bilinear(view, width, height)?;
            let mut features = extractor.extract(resized.view())?;
            features.rescale(factor);
            Ok(features)
        }
        _ => extractor.extract(view),
    }
}

/// Sets bit `index` (LSB first) in a packed row.
#[inline]
pub(crate) fn set_bit(row: &mut [u8], index: usize) {
    row[index / 8] |= 1 << (index % 8);
}

/// Sorts by descending response; ties keep detection order.
pub(crate) fn sort_by_response(keypoints: &mut [Keypoint]) {
    keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
}

#[cfg(test)]
mod tests {
    use super::{Descriptors, DetectorKind, Features, Keypoint, Metric};

    fn kp(x: f32) -> Keypoint {
        Keypoint {
            x,
            y: 0.0,
            size: 1.0,
            angle_deg: 0.0,
            response: 0.0,
            octave: 0,
        }
    }

    #[test]
    fn features_reject_mismatched_lengths() {
        let desc = Descriptors::Binary {
            bytes_per_row: 4,
            data: vec![0; 8],
        };
        assert!(Features::new(vec![kp(0.0)], desc.clone()).is_err());
        let ok = Features::new(vec![kp(0.0), kp(1.0)], desc).unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.descriptors().metric(), Metric::Hamming);
    }

    #[test]
    fn rescale_moves_keypoints() {
        let desc = Descriptors::Float {
            dims: 2,
            data: vec![0.0; 2],
        };
        let mut f = Features::new(vec![kp(10.0)], desc).unwrap();
        f.rescale(2.0);
        assert_eq!(f.keypoints()[0].x, 20.0);
        assert_eq!(f.keypoints()[0].size, 2.0);
    }

    #[test]
    fn detector_names_round_trip() {
        for kind in DetectorKind::ALL {
            assert_eq!(DetectorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(DetectorKind::from_name("SIFT"), Some(DetectorKind::Sift));
        assert_eq!(DetectorKind::from_name("surf"), None);
    }
}
