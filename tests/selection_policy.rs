use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refmatch::select::judge;
use refmatch::{should_keep, CandidateResult, Rejection, SelectionState, Thresholds};

fn cand(reference_id: usize, match_count: usize, area: f64) -> CandidateResult {
    CandidateResult {
        reference_id,
        match_count,
        area,
    }
}

fn state_with_best(match_count: usize) -> SelectionState {
    let mut state = SelectionState::new();
    if match_count > 0 {
        let seed = Thresholds {
            min_matches: 0,
            min_area: 0.0,
        };
        state.offer(cand(99, match_count, 1e9), (), &seed).unwrap();
    }
    assert_eq!(state.best_match_count(), match_count);
    state
}

#[test]
fn accepts_first_qualifying_candidate() {
    let state: SelectionState = SelectionState::new();
    assert!(should_keep(
        &cand(0, 15, 90_000.0),
        &state,
        &Thresholds::default()
    ));
}

#[test]
fn rejects_below_match_threshold() {
    let state: SelectionState = SelectionState::new();
    let c = cand(0, 8, 200_000.0);
    assert!(!should_keep(&c, &state, &Thresholds::default()));
    assert_eq!(
        judge(&c, &state, &Thresholds::default()),
        Err(Rejection::InsufficientMatches { got: 8, min: 10 })
    );
}

#[test]
fn rejects_below_area_threshold() {
    let state: SelectionState = SelectionState::new();
    let c = cand(0, 20, 50_000.0);
    assert!(!should_keep(&c, &state, &Thresholds::default()));
    assert!(matches!(
        judge(&c, &state, &Thresholds::default()),
        Err(Rejection::DegenerateGeometry { .. })
    ));
}

#[test]
fn tie_does_not_replace_best() {
    let state = state_with_best(15);
    let c = cand(1, 15, 90_000.0);
    assert!(!should_keep(&c, &state, &Thresholds::default()));
    assert_eq!(
        judge(&c, &state, &Thresholds::default()),
        Err(Rejection::NotImproved { got: 15, best: 15 })
    );
}

#[test]
fn strictly_better_candidate_replaces_best() {
    let state = state_with_best(15);
    assert!(should_keep(
        &cand(1, 16, 90_000.0),
        &state,
        &Thresholds::default()
    ));
}

#[test]
fn thresholds_are_inclusive() {
    let state: SelectionState = SelectionState::new();
    assert!(should_keep(
        &cand(0, 10, 80_000.0),
        &state,
        &Thresholds::default()
    ));
}

#[test]
fn best_match_count_tracks_retained_candidate() {
    let thr = Thresholds::default();
    let mut state: SelectionState<&'static str> = SelectionState::new();
    assert!(state.offer(cand(0, 12, 1e5), "a", &thr).is_ok());
    assert!(state.offer(cand(1, 30, 1e3), "b", &thr).is_err());
    assert!(state.offer(cand(2, 20, 1e5), "c", &thr).is_ok());
    assert!(state.offer(cand(3, 20, 1e6), "d", &thr).is_err());
    assert_eq!(state.best_match_count(), 20);
    assert_eq!(state.best().map(|c| c.reference_id), Some(2));
    assert_eq!(state.best_payload(), Some(&"c"));
    let (best, payload) = state.finish().unwrap();
    assert_eq!((best.reference_id, payload), (2, "c"));
}

#[test]
fn random_candidates_respect_rejection_rules() {
    let mut rng = StdRng::seed_from_u64(7);
    let thr = Thresholds::default();
    for _ in 0..2000 {
        let state = state_with_best(rng.random_range(0..40));
        let c = cand(0, rng.random_range(0..60), rng.random_range(0.0..200_000.0));
        let keep = should_keep(&c, &state, &thr);
        if c.match_count < thr.min_matches
            || c.area < thr.min_area
            || c.match_count <= state.best_match_count()
        {
            assert!(!keep, "{c:?} kept against best {}", state.best_match_count());
        } else {
            assert!(keep, "{c:?} rejected against best {}", state.best_match_count());
        }
    }
}

#[test]
fn pass_retains_first_maximum_among_qualifiers() {
    let mut rng = StdRng::seed_from_u64(11);
    let thr = Thresholds::default();
    for _ in 0..300 {
        let n = rng.random_range(1..12);
        let candidates: Vec<CandidateResult> = (0..n)
            .map(|i| cand(i, rng.random_range(0..25), rng.random_range(40_000.0..120_000.0)))
            .collect();

        let mut state = SelectionState::new();
        for c in &candidates {
            let before = state.best_match_count();
            if state.offer(*c, c.reference_id, &thr).is_ok() {
                assert!(state.best_match_count() > before);
            }
        }

        let qualifiers = candidates
            .iter()
            .filter(|c| c.match_count >= thr.min_matches && c.area >= thr.min_area);
        let expected = qualifiers.fold(None::<&CandidateResult>, |best, c| match best {
            Some(b) if b.match_count >= c.match_count => Some(b),
            _ => Some(c),
        });
        let retained = state.finish().map(|(c, id)| {
            assert_eq!(c.reference_id, id);
            c.reference_id
        });
        assert_eq!(retained, expected.map(|c| c.reference_id));
    }
}
