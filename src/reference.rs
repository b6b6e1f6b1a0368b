//! Reference images and their lazily extracted features.
//!
//! Reference features are computed at most once per detector family and
//! cached in a `OnceLock` so repeated passes (and the optional fallback
//! family) reuse them. A reference whose extraction fails is cached as
//! `None` and simply contributes no candidate.

use std::sync::OnceLock;

use crate::features::{extract_with, ExtractOptions, FeatureExtractor, Features};
use crate::image::OwnedImage;
use crate::trace::{trace_span, trace_warn};
use crate::util::{RefMatchError, RefMatchResult};

/// A named reference image.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    name: String,
    image: OwnedImage,
}

impl Reference {
    /// Creates a reference from a grayscale image.
    pub fn new(name: impl Into<String>, image: OwnedImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Grayscale pixels.
    pub fn image(&self) -> &OwnedImage {
        &self.image
    }

    /// Width and height in pixels.
    pub fn size(&self) -> (usize, usize) {
        (self.image.width(), self.image.height())
    }
}

/// Ordered, non-empty collection of references.
///
/// Evaluation order follows insertion order.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceSet {
    references: Vec<Reference>,
}

impl ReferenceSet {
    /// Creates a set; at least one reference is required.
    pub fn new(references: Vec<Reference>) -> RefMatchResult<Self> {
        if references.is_empty() {
            return Err(RefMatchError::EmptyReferenceSet);
        }
        Ok(Self { references })
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Reference at `index`.
    pub fn get(&self, index: usize) -> RefMatchResult<&Reference> {
        self.references
            .get(index)
            .ok_or(RefMatchError::IndexOutOfBounds {
                index,
                len: self.references.len(),
                context: "reference",
            })
    }

    /// Iterates references in evaluation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Reference> {
        self.references.iter()
    }
}

fn extract_one<E: FeatureExtractor + ?Sized>(
    extractor: &E,
    reference: &Reference,
    options: &ExtractOptions,
) -> Option<Features> {
    match extract_with(extractor, reference.image().view(), options) {
        Ok(features) => Some(features),
        Err(err) => {
            trace_warn!(
                "reference_extract_failed",
                reference = reference.name(),
                error = err.to_string().as_str()
            );
            None
        }
    }
}

/// Per-family cache of reference features.
#[derive(Debug, Default)]
pub(crate) struct FeatureCache {
    slot: OnceLock<Vec<Option<Features>>>,
}

impl FeatureCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns cached features, extracting them on first use.
    pub(crate) fn get_or_extract<E: FeatureExtractor + ?Sized>(
        &self,
        references: &ReferenceSet,
        extractor: &E,
        options: &ExtractOptions,
        parallel: bool,
    ) -> &[Option<Features>] {
        self.slot.get_or_init(|| {
            let _span = trace_span!("reference_features", count = references.len()).entered();
            #[cfg(feature = "rayon")]
            if parallel {
                use rayon::prelude::*;
                return references
                    .references
                    .par_iter()
                    .map(|r| extract_one(extractor, r, options))
                    .collect();
            }
            #[cfg(not(feature = "rayon"))]
            let _ = parallel;
            references
                .iter()
                .map(|r| extract_one(extractor, r, options))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Reference, ReferenceSet};
    use crate::image::OwnedImage;
    use crate::util::RefMatchError;

    #[test]
    fn empty_set_is_rejected() {
        assert_eq!(
            ReferenceSet::new(Vec::new()),
            Err(RefMatchError::EmptyReferenceSet)
        );
    }

    #[test]
    fn lookup_reports_out_of_bounds() {
        let img = OwnedImage::filled(4, 3, 0).unwrap();
        let set = ReferenceSet::new(vec![Reference::new("a", img)]).unwrap();
        assert_eq!(set.get(0).unwrap().size(), (4, 3));
        assert!(matches!(
            set.get(1),
            Err(RefMatchError::IndexOutOfBounds { index: 1, .. })
        ));
    }
}
