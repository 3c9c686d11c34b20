// osprey-align/src/score_set.rs
//
// Running best-score state. Two instances are live during an alignment: one
// over every candidate and one restricted to non-ALT contigs, which is what
// makes the ALT preference decision O(1) at finalisation.

use crate::candidates::UNUSED_SCORE_VALUE;
use crate::probability::compute_mapq;
use crate::result::{
    AlignmentStatus, Direction, GenomeLocation, SingleAlignmentResult,
};

/// A fully scored candidate, as produced by either scoring back-end.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate {
    pub location: GenomeLocation,
    pub orig_location: GenomeLocation,
    pub direction: Direction,
    pub score: u32,
    pub ag_score: i32,
    pub match_probability: f64,
    pub used_affine_gap_scoring: bool,
    pub bases_clipped_before: u32,
    pub bases_clipped_after: u32,
    pub seed_offset: u32,
}

#[derive(Debug, Clone)]
pub struct ScoreSet {
    pub best_score: u32,
    pub best_ag_score: i32,
    pub best_match_probability: f64,
    pub best_location: GenomeLocation,
    pub best_orig_location: GenomeLocation,
    pub best_direction: Direction,
    pub best_used_affine_gap: bool,
    pub best_bases_clipped_before: u32,
    pub best_bases_clipped_after: u32,
    pub best_seed_offset: u32,

    pub probability_of_all_candidates: f64,
    pub probability_of_best_candidate: f64,
}

impl ScoreSet {
    pub fn new() -> ScoreSet {
        ScoreSet {
            best_score: UNUSED_SCORE_VALUE,
            best_ag_score: i32::MIN,
            best_match_probability: 0.0,
            best_location: 0,
            best_orig_location: 0,
            best_direction: Direction::Forward,
            best_used_affine_gap: false,
            best_bases_clipped_before: 0,
            best_bases_clipped_after: 0,
            best_seed_offset: 0,
            probability_of_all_candidates: 0.0,
            probability_of_best_candidate: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = ScoreSet::new();
    }

    #[inline]
    pub fn has_best(&self) -> bool {
        self.best_score != UNUSED_SCORE_VALUE
    }

    /// Add a candidate's probability mass to the running total.
    #[inline]
    pub fn add_probability(&mut self, p: f64) {
        self.probability_of_all_candidates += p;
    }

    /// Remove mass that was counted for a candidate later rescored; clamped
    /// at zero so floating-point drift can never push the total negative.
    #[inline]
    pub fn remove_probability(&mut self, p: f64) {
        self.probability_of_all_candidates =
            (self.probability_of_all_candidates - p).max(0.0);
    }

    /// Install `cand` as best if it lexicographically dominates on
    /// (ag_score, match_probability). Ties go to the incumbent, so among
    /// equals the first one scored wins. Returns the displaced best when a
    /// rotation happened, so the caller can keep it as a secondary.
    pub fn try_update_best(
        &mut self,
        cand: &ScoredCandidate,
    ) -> Option<Option<ScoredCandidate>> {
        let dominates = cand.ag_score > self.best_ag_score
            || (cand.ag_score == self.best_ag_score
                && cand.match_probability > self.best_match_probability);
        if !dominates {
            return None;
        }

        let displaced = if self.has_best() {
            Some(self.best_as_candidate())
        } else {
            None
        };

        self.best_score = cand.score;
        self.best_ag_score = cand.ag_score;
        self.best_match_probability = cand.match_probability;
        self.best_location = cand.location;
        self.best_orig_location = cand.orig_location;
        self.best_direction = cand.direction;
        self.best_used_affine_gap = cand.used_affine_gap_scoring;
        self.best_bases_clipped_before = cand.bases_clipped_before;
        self.best_bases_clipped_after = cand.bases_clipped_after;
        self.best_seed_offset = cand.seed_offset;
        self.probability_of_best_candidate = cand.match_probability;

        Some(displaced)
    }

    /// The current best, repackaged as a candidate (for demotion to the
    /// secondary list).
    pub fn best_as_candidate(&self) -> ScoredCandidate {
        ScoredCandidate {
            location: self.best_location,
            orig_location: self.best_orig_location,
            direction: self.best_direction,
            score: self.best_score,
            ag_score: self.best_ag_score,
            match_probability: self.best_match_probability,
            used_affine_gap_scoring: self.best_used_affine_gap,
            bases_clipped_before: self.best_bases_clipped_before,
            bases_clipped_after: self.best_bases_clipped_after,
            seed_offset: self.best_seed_offset,
        }
    }

    /// Write the best into `result`. `probability_of_all` lets the caller
    /// supply the total over every candidate (not just this set's), which is
    /// what the ALT promotion path needs.
    pub fn fill_result(
        &self,
        result: &mut SingleAlignmentResult,
        max_k: u32,
        probability_of_all: f64,
        popular_seeds_skipped: u32,
        pool_wrapped: bool,
        clipping_for_read_adjustment: u32,
    ) {
        if !self.has_best() || self.best_score > max_k {
            *result = SingleAlignmentResult::unmapped();
            return;
        }
        result.status = AlignmentStatus::SingleHit;
        result.location = self.best_location;
        result.orig_location = self.best_orig_location;
        result.direction = self.best_direction;
        result.score = self.best_score;
        result.score_prior_to_clipping = self.best_score;
        result.match_probability = self.best_match_probability;
        result.ag_score = self.best_ag_score;
        result.used_affine_gap_scoring = self.best_used_affine_gap;
        result.bases_clipped_before = self.best_bases_clipped_before;
        result.bases_clipped_after = self.best_bases_clipped_after;
        result.seed_offset = self.best_seed_offset;
        result.clipping_for_read_adjustment = clipping_for_read_adjustment;
        result.supplementary = false;
        result.mapq = compute_mapq(
            self.probability_of_best_candidate,
            probability_of_all,
            popular_seeds_skipped,
            pool_wrapped,
        );
    }
}

impl Default for ScoreSet {
    fn default() -> Self {
        ScoreSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(score: u32, ag: i32, prob: f64, location: GenomeLocation) -> ScoredCandidate {
        ScoredCandidate {
            location,
            orig_location: location,
            direction: Direction::Forward,
            score,
            ag_score: ag,
            match_probability: prob,
            used_affine_gap_scoring: false,
            bases_clipped_before: 0,
            bases_clipped_after: 0,
            seed_offset: 0,
        }
    }

    #[test]
    fn test_first_candidate_installs() {
        let mut s = ScoreSet::new();
        assert!(!s.has_best());
        let rotated = s.try_update_best(&cand(2, 96, 0.5, 1000));
        assert!(matches!(rotated, Some(None)));
        assert!(s.has_best());
        assert_eq!(s.best_score, 2);
        assert_eq!(s.probability_of_best_candidate, 0.5);
    }

    #[test]
    fn test_rotation_returns_displaced_best() {
        let mut s = ScoreSet::new();
        s.try_update_best(&cand(2, 96, 0.5, 1000));
        let displaced = s
            .try_update_best(&cand(0, 100, 0.9, 2000))
            .expect("better candidate installs")
            .expect("old best is displaced");
        assert_eq!(displaced.location, 1000);
        assert_eq!(s.best_location, 2000);
        assert_eq!(s.probability_of_best_candidate, 0.9);
    }

    #[test]
    fn test_ties_keep_incumbent() {
        let mut s = ScoreSet::new();
        s.try_update_best(&cand(1, 98, 0.7, 1000));
        // Equal (ag_score, probability): the first one scored stays best.
        assert!(s.try_update_best(&cand(1, 98, 0.7, 2000)).is_none());
        assert_eq!(s.best_location, 1000);
        // Equal ag_score but better probability does rotate.
        assert!(s.try_update_best(&cand(1, 98, 0.8, 3000)).is_some());
        assert_eq!(s.best_location, 3000);
    }

    #[test]
    fn test_probability_clamping() {
        let mut s = ScoreSet::new();
        s.add_probability(0.25);
        s.remove_probability(0.5);
        assert_eq!(s.probability_of_all_candidates, 0.0);
    }

    #[test]
    fn test_fill_result_not_found_above_max_k() {
        let mut s = ScoreSet::new();
        s.try_update_best(&cand(9, 50, 0.5, 1000));
        s.add_probability(0.5);
        let mut r = SingleAlignmentResult::unmapped();
        s.fill_result(&mut r, 8, 0.5, 0, false, 0);
        assert_eq!(r.status, AlignmentStatus::NotFound);
        s.fill_result(&mut r, 9, 0.5, 0, false, 0);
        assert_eq!(r.status, AlignmentStatus::SingleHit);
        assert_eq!(r.location, 1000);
    }
}
