//! Best-reference selection policy.
//!
//! Each reference evaluated in a pass yields a [`CandidateResult`]. A candidate
//! replaces the current best only when it clears both thresholds and has
//! strictly more matches than the best so far, so on ties the first-seen
//! candidate wins.
//!
//! [`SelectionState`] owns the retained candidate together with an arbitrary
//! payload (typically the transform to render). Offering a candidate either
//! moves its payload into the state, dropping the previous best, or rejects it
//! and drops the payload immediately.

use thiserror::Error;

/// Acceptance thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum correspondence count.
    pub min_matches: usize,
    /// Minimum area of the projected reference region, in square pixels.
    pub min_area: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_matches: 10,
            min_area: 80_000.0,
        }
    }
}

/// Outcome of evaluating one reference against a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateResult {
    /// Position of the reference in the reference set.
    pub reference_id: usize,
    /// Number of supporting correspondences.
    pub match_count: usize,
    /// Area of the reference outline projected into the frame.
    pub area: f64,
}

/// Why a candidate did not become the best match.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum Rejection {
    /// Too few correspondences survived matching.
    #[error("insufficient matches: {got} < {min}")]
    InsufficientMatches { got: usize, min: usize },
    /// The projected region is too small or no usable transform exists.
    #[error("degenerate geometry: area {area:.1} < {min:.1}")]
    DegenerateGeometry { area: f64, min: f64 },
    /// The candidate does not beat the current best.
    #[error("not improved: {got} <= best {best}")]
    NotImproved { got: usize, best: usize },
}

/// Checks a candidate against the thresholds and the current best count.
///
/// Checks run in the order matches, area, improvement and the first failure
/// is reported.
pub fn judge<T>(
    candidate: &CandidateResult,
    state: &SelectionState<T>,
    thresholds: &Thresholds,
) -> Result<(), Rejection> {
    if candidate.match_count < thresholds.min_matches {
        return Err(Rejection::InsufficientMatches {
            got: candidate.match_count,
            min: thresholds.min_matches,
        });
    }
    // NaN areas fail this comparison as well.
    if !(candidate.area >= thresholds.min_area) {
        return Err(Rejection::DegenerateGeometry {
            area: candidate.area,
            min: thresholds.min_area,
        });
    }
    if candidate.match_count <= state.best_match_count {
        return Err(Rejection::NotImproved {
            got: candidate.match_count,
            best: state.best_match_count,
        });
    }
    Ok(())
}

/// Returns true iff the candidate should replace the current best.
pub fn should_keep<T>(
    candidate: &CandidateResult,
    state: &SelectionState<T>,
    thresholds: &Thresholds,
) -> bool {
    judge(candidate, state, thresholds).is_ok()
}

/// Best candidate retained so far within one evaluation pass.
#[derive(Debug)]
pub struct SelectionState<T = ()> {
    best: Option<(CandidateResult, T)>,
    best_match_count: usize,
}

impl<T> Default for SelectionState<T> {
    fn default() -> Self {
        Self {
            best: None,
            best_match_count: 0,
        }
    }
}

impl<T> SelectionState<T> {
    /// Starts a pass with nothing retained.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match count of the retained candidate, or 0.
    pub fn best_match_count(&self) -> usize {
        self.best_match_count
    }

    /// Retained candidate, if any.
    pub fn best(&self) -> Option<&CandidateResult> {
        self.best.as_ref().map(|(c, _)| c)
    }

    /// Payload of the retained candidate, if any.
    pub fn best_payload(&self) -> Option<&T> {
        self.best.as_ref().map(|(_, p)| p)
    }

    /// Offers a candidate with its payload.
    ///
    /// On acceptance the previous best and its payload are dropped. On
    /// rejection `payload` is dropped before returning.
    pub fn offer(
        &mut self,
        candidate: CandidateResult,
        payload: T,
        thresholds: &Thresholds,
    ) -> Result<(), Rejection> {
        judge(&candidate, self, thresholds)?;
        self.best_match_count = candidate.match_count;
        self.best = Some((candidate, payload));
        Ok(())
    }

    /// Ends the pass and hands over the retained candidate.
    pub fn finish(self) -> Option<(CandidateResult, T)> {
        self.best
    }
}
