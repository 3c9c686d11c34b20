// osprey-align/src/aligner.rs
//
// The alignment engine. One instance owns all of its scratch (candidate
// store, scorers, per-read buffers) and is driven by exactly one thread;
// parallelism comes from running one aligner per worker.
//
// Per read: walk a strided seed schedule, look each seed up in the index,
// fold the hits into the candidate store, and between seeds drain the
// weight index from the heaviest elements down, scoring candidates with the
// unit-cost back-end until no unseen location could beat the best. The
// score sets then drive MAPQ, ALT preference and secondary selection.

use crate::adjuster::adjust_alignment;
use crate::affine_gap::AffineGapScorer;
use crate::candidates::{CandidateStore, UNUSED_SCORE_VALUE};
use crate::edit_distance::EditDistanceScorer;
use crate::genome::Genome;
use crate::options::{AlignerOptions, ConfigurationError};
use crate::probability::correct_probability;
use crate::read::{reverse_complement_into, Read};
use crate::result::{
    Direction, GenomeLocation, SingleAlignmentResult, NUM_DIRECTIONS,
};
use crate::score_set::{ScoreSet, ScoredCandidate};
use crate::seed_index::SeedIndex;
use crate::stats::AlignerStats;

/// Per-contig counter for the secondary-per-contig cap, epoch-keyed so it
/// self-resets each read.
#[derive(Clone, Copy)]
struct HitsPerContigCount {
    epoch: u64,
    hits: i32,
}

/// Output buffers and their limits for one align_read call.
struct ScoringBuffers<'b> {
    secondary_results: &'b mut Vec<SingleAlignmentResult>,
    secondary_result_buffer_size: usize,
    max_edit_distance_for_secondary_results: u32,
    overflowed_secondary: bool,
    candidates_for_affine_gap: &'b mut Vec<SingleAlignmentResult>,
    candidates_for_affine_gap_buffer_size: usize,
    overflowed_affine_gap: bool,
}

impl<'b> ScoringBuffers<'b> {
    fn push_secondary(&mut self, result: SingleAlignmentResult) {
        if self.secondary_results.len() < self.secondary_result_buffer_size {
            self.secondary_results.push(result);
        } else {
            self.overflowed_secondary = true;
        }
    }

    fn push_affine_gap_candidate(&mut self, result: SingleAlignmentResult) {
        if self.candidates_for_affine_gap.len() < self.candidates_for_affine_gap_buffer_size {
            self.candidates_for_affine_gap.push(result);
        } else {
            self.overflowed_affine_gap = true;
        }
    }
}

pub struct BaseAligner<'a> {
    genome: &'a Genome,
    seed_index: &'a SeedIndex,
    options: AlignerOptions,
    seed_len: usize,

    store: CandidateStore,
    lv: EditDistanceScorer,
    ag: AffineGapScorer,
    stats: AlignerStats,

    // Per-read scratch, allocated once at construction.
    rc_bases: Vec<u8>,
    rc_qualities: Vec<u8>,
    seed_used: Vec<u64>,
    seed_coverage: Vec<u16>,
    hits_per_contig: Vec<HitsPerContigCount>,

    lowest_possible_score_of_any_unseen_location: [u32; NUM_DIRECTIONS],
    curr_round_lowest_possible_score: [u32; NUM_DIRECTIONS],
    most_seeds_containing_any_particular_base: [u32; NUM_DIRECTIONS],
    n_seeds_applied: [u32; NUM_DIRECTIONS],
    scores_all: ScoreSet,
    scores_non_alt: ScoreSet,
    popular_seeds_skipped: u32,
}

impl<'a> BaseAligner<'a> {
    pub fn new(
        genome: &'a Genome,
        seed_index: &'a SeedIndex,
        options: AlignerOptions,
    ) -> Result<BaseAligner<'a>, ConfigurationError> {
        options.validate()?;
        if options.seed_len != seed_index.seed_len() {
            return Err(ConfigurationError::SeedLengthMismatch {
                options: options.seed_len,
                index: seed_index.seed_len(),
            });
        }

        let max_seeds = options.max_seeds_bound();
        let store = CandidateStore::new(
            options.max_hits_to_consider,
            max_seeds,
            options.extra_search_depth,
            options.enable_prefetch,
        );
        let max_limit = options.max_k + options.extra_search_depth + 1;
        let lv = EditDistanceScorer::new(max_limit);
        let ag = AffineGapScorer::new(
            options.match_reward,
            options.sub_penalty,
            options.gap_open_penalty,
            options.gap_extend_penalty,
            options.max_read_size,
            max_limit,
        );

        let words = options.max_read_size / 64 + 1;
        let seed_len = options.seed_len;
        let max_read_size = options.max_read_size;
        Ok(BaseAligner {
            genome,
            seed_index,
            options,
            seed_len,
            store,
            lv,
            ag,
            stats: AlignerStats::new(),
            rc_bases: Vec::with_capacity(max_read_size),
            rc_qualities: Vec::with_capacity(max_read_size),
            seed_used: vec![0; words],
            seed_coverage: Vec::new(),
            hits_per_contig: vec![
                HitsPerContigCount { epoch: 0, hits: 0 };
                genome.contigs().len()
            ],
            lowest_possible_score_of_any_unseen_location: [0; NUM_DIRECTIONS],
            curr_round_lowest_possible_score: [0; NUM_DIRECTIONS],
            most_seeds_containing_any_particular_base: [1; NUM_DIRECTIONS],
            n_seeds_applied: [0; NUM_DIRECTIONS],
            scores_all: ScoreSet::new(),
            scores_non_alt: ScoreSet::new(),
            popular_seeds_skipped: 0,
        })
    }

    pub fn stats(&self) -> &AlignerStats {
        &self.stats
    }

    pub fn options(&self) -> &AlignerOptions {
        &self.options
    }

    /// Whether the last read consulted every seed it wanted to.
    pub fn checked_all_seeds(&self) -> bool {
        self.popular_seeds_skipped == 0
    }

    #[inline]
    fn is_seed_used(&self, offset: usize) -> bool {
        self.seed_used[offset / 64] & (1 << (offset % 64)) != 0
    }

    #[inline]
    fn set_seed_used(&mut self, offset: usize) {
        self.seed_used[offset / 64] |= 1 << (offset % 64);
    }

    /// Align one read. Fills `primary_result` always, `first_alt_result`
    /// when the ALT logic fires, and appends to the two candidate buffers.
    /// Returns true iff everything found fit in its buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn align_read(
        &mut self,
        read: &Read,
        primary_result: &mut SingleAlignmentResult,
        first_alt_result: &mut SingleAlignmentResult,
        max_edit_distance_for_secondary_results: u32,
        secondary_result_buffer_size: usize,
        max_secondary_results: usize,
        secondary_results: &mut Vec<SingleAlignmentResult>,
        candidates_for_affine_gap_buffer_size: usize,
        candidates_for_affine_gap: &mut Vec<SingleAlignmentResult>,
        use_hamming: bool,
    ) -> bool {
        *primary_result = SingleAlignmentResult::unmapped();
        *first_alt_result = SingleAlignmentResult::unmapped();
        secondary_results.clear();
        candidates_for_affine_gap.clear();

        let read_len = read.len();
        if read_len > self.options.max_read_size || read_len < self.seed_len {
            self.stats.reads_ignored += 1;
            return true;
        }
        // A read that can never score within maxK is not worth seeding.
        if read.count_of_n() as u32 > self.options.max_k {
            self.stats.reads_ignored += 1;
            return true;
        }

        self.reset_per_read_state(read);

        let mut buffers = ScoringBuffers {
            secondary_results: &mut *secondary_results,
            secondary_result_buffer_size,
            max_edit_distance_for_secondary_results,
            overflowed_secondary: false,
            candidates_for_affine_gap: &mut *candidates_for_affine_gap,
            candidates_for_affine_gap_buffer_size,
            overflowed_affine_gap: false,
        };

        let n_possible_seeds = read_len - self.seed_len + 1;
        let max_seeds = self.options.effective_max_seeds(read_len);
        let mut schedule = SeedSchedule::new(self.seed_len, n_possible_seeds);
        let mut done = false;

        while !done {
            if self.n_seeds_applied[0] >= max_seeds {
                break;
            }
            if !self.options.disabled_optimizations.no_early_seed_exit
                && self.scores_all.has_best()
            {
                let limit = self.score_limit();
                if self.lowest_possible_score_of_any_unseen_location[0] > limit
                    && self.lowest_possible_score_of_any_unseen_location[1] > limit
                {
                    break;
                }
            }

            let offset = loop {
                match schedule.next() {
                    Some(o) if self.is_seed_used(o) => continue,
                    other => break other,
                }
            };
            let offset = match offset {
                Some(o) => o,
                None => break,
            };

            self.apply_seed(read, offset, read_len, use_hamming, &mut buffers, &mut done);
        }

        if !done {
            self.score(true, read, use_hamming, &mut buffers);
        }

        let overflowed = buffers.overflowed_secondary || buffers.overflowed_affine_gap;
        self.finalize(
            read,
            primary_result,
            first_alt_result,
            max_secondary_results,
            max_edit_distance_for_secondary_results,
            secondary_results,
        );
        !overflowed
    }

    fn reset_per_read_state(&mut self, read: &Read) {
        let read_len = read.len();
        self.store.reset();
        self.scores_all.reset();
        self.scores_non_alt.reset();
        self.popular_seeds_skipped = 0;
        self.lowest_possible_score_of_any_unseen_location = [0; NUM_DIRECTIONS];
        self.curr_round_lowest_possible_score = [0; NUM_DIRECTIONS];
        self.most_seeds_containing_any_particular_base = [1; NUM_DIRECTIONS];
        self.n_seeds_applied = [0; NUM_DIRECTIONS];

        for w in self.seed_used.iter_mut() {
            *w = 0;
        }
        self.seed_coverage.clear();
        self.seed_coverage.resize(read_len + 1, 0);

        reverse_complement_into(read.bases(), &mut self.rc_bases);
        self.rc_qualities.clear();
        self.rc_qualities
            .extend(read.qualities().iter().rev().copied());
    }

    /// Look one seed up and fold its hits into the candidate store, then
    /// give the scorer a chance to run.
    fn apply_seed(
        &mut self,
        read: &Read,
        offset: usize,
        read_len: usize,
        use_hamming: bool,
        buffers: &mut ScoringBuffers<'_>,
        done: &mut bool,
    ) {
        self.set_seed_used(offset);
        let seed = &read.bases()[offset..offset + self.seed_len];
        if seed.iter().any(|&b| b == b'N') {
            return;
        }

        self.curr_round_lowest_possible_score =
            self.lowest_possible_score_of_any_unseen_location;

        // The index reference is Copy, so the hit slices do not hold a
        // borrow of self while the store is being written.
        let index = self.seed_index;
        let hits = index.lookup(seed);
        let n_forward = hits.forward.len();
        let n_rc = hits.rc.len();
        let max_hits = self.options.max_hits_to_consider as usize;

        let popular = n_forward + n_rc > max_hits;
        if popular {
            self.popular_seeds_skipped += 1;
            self.stats.hits_ignored_popular_seeds += (n_forward + n_rc) as u64;
            if !self.options.explore_popular_seeds {
                return;
            }
        }

        let take_forward = if popular { n_forward.min(max_hits) } else { n_forward };
        let take_rc = if popular { n_rc.min(max_hits) } else { n_rc };

        let forward_bound = self.curr_round_lowest_possible_score[Direction::Forward.index()];
        let rc_bound = self.curr_round_lowest_possible_score[Direction::Rc.index()];
        let rc_seed_offset = (read_len - self.seed_len - offset) as u64;
        for &hit in &hits.forward[..take_forward] {
            if let Some(location) = hit.checked_sub(offset as u64) {
                self.store.prefetch(location, Direction::Forward);
                self.store.allocate_new_candidate(
                    location,
                    Direction::Forward,
                    forward_bound,
                    offset as u32,
                );
            }
        }
        for &hit in &hits.rc[..take_rc] {
            if let Some(location) = hit.checked_sub(rc_seed_offset) {
                self.store.prefetch(location, Direction::Rc);
                self.store.allocate_new_candidate(
                    location,
                    Direction::Rc,
                    rc_bound,
                    rc_seed_offset as u32,
                );
            }
        }

        // Coverage accounting feeds the unseen-location lower bound: every
        // unseen location must have mismatched all applied seeds, and a
        // single error can only break the seeds that cover its base.
        let cover_end = (offset + self.seed_len).min(read_len);
        for i in offset..=cover_end.min(read_len - 1) {
            self.seed_coverage[i] += 1;
            let c = self.seed_coverage[i] as u32;
            for d in 0..NUM_DIRECTIONS {
                if c > self.most_seeds_containing_any_particular_base[d] {
                    self.most_seeds_containing_any_particular_base[d] = c;
                }
            }
        }
        for d in 0..NUM_DIRECTIONS {
            self.n_seeds_applied[d] += 1;
            let bound =
                self.n_seeds_applied[d] / self.most_seeds_containing_any_particular_base[d];
            if bound > self.lowest_possible_score_of_any_unseen_location[d] {
                self.lowest_possible_score_of_any_unseen_location[d] = bound;
            }
        }

        *done = self.score(false, read, use_hamming, buffers);
    }

    /// Current ceiling on scores worth computing. While an ALT alignment
    /// leads, the ceiling stretches by the preference gap so that a
    /// promotable non-ALT candidate is still found.
    fn score_limit(&self) -> u32 {
        let best_all = self.scores_all.best_score;
        let effective = if self.options.alt_awareness
            && self.scores_non_alt.best_score > best_all
        {
            best_all.saturating_add(self.options.max_score_gap_to_prefer_non_alt_alignment)
        } else {
            best_all
        };
        effective
            .min(self.options.max_k)
            .saturating_add(self.options.extra_search_depth)
    }

    /// Drain the weight index from the heaviest list down, scoring unscored
    /// candidates. With `force` set, lists below minWeightToCheck are
    /// drained too so no candidate is left behind. Returns true when the
    /// search should stop outright (stopOnFirstHit satisfied).
    fn score(
        &mut self,
        force: bool,
        read: &Read,
        use_hamming: bool,
        buffers: &mut ScoringBuffers<'_>,
    ) -> bool {
        let min_weight = if force {
            1
        } else {
            self.options.min_weight_to_check.max(1)
        };

        loop {
            self.store.settle_highest_weight_list();
            let weight = self.store.highest_used_weight_list();
            if weight < min_weight {
                return false;
            }
            let elem_idx = match self.store.head_of_weight_list(weight) {
                Some(e) => e,
                None => {
                    if weight == 0 {
                        return false;
                    }
                    continue;
                }
            };

            let score_limit = self.score_limit();
            if !self.options.disabled_optimizations.no_truncation
                && self.store.element(elem_idx).lowest_possible_score > score_limit
            {
                // Nothing in this element can matter anymore.
                self.store.unlink_from_weight_list(elem_idx);
                continue;
            }

            if self.score_element(elem_idx, read, use_hamming, score_limit, buffers) {
                return true;
            }
        }
    }

    /// Score every unscored candidate of one element, update the element's
    /// best, fold the element into the score sets, and unlink it.
    fn score_element(
        &mut self,
        elem_idx: u32,
        read: &Read,
        use_hamming: bool,
        score_limit: u32,
        buffers: &mut ScoringBuffers<'_>,
    ) -> bool {
        let (base_location, direction, previously_counted, old_contribution, old_best_location) = {
            let e = self.store.element(elem_idx);
            (
                e.base_genome_location,
                e.direction,
                e.all_extant_candidates_scored && e.best_score != UNUSED_SCORE_VALUE,
                e.match_probability_for_best_score,
                e.best_score_genome_location,
            )
        };

        let (bases, qualities): (&[u8], &[u8]) = match direction {
            Direction::Forward => (read.bases(), read.qualities()),
            Direction::Rc => (&self.rc_bases, &self.rc_qualities),
        };

        let mut unscored = self.store.element(elem_idx).unscored_mask();
        while unscored != 0 {
            let slot = unscored.trailing_zeros() as u64;
            unscored &= unscored - 1;

            let candidate = self.store.element(elem_idx).candidates[slot as usize];
            let location = base_location + slot;
            debug_assert_eq!(candidate.orig_genome_location, location);

            let scored = score_candidate_unit_cost(
                self.genome,
                &mut self.lv,
                bases,
                qualities,
                direction,
                location,
                candidate.seed_offset,
                self.seed_len,
                score_limit,
                self.options.match_reward,
                self.options.sub_penalty,
                use_hamming,
            );
            self.stats.locations_scored_edit_distance += 1;

            let e = self.store.element_mut(elem_idx);
            e.candidates_scored |= 1 << slot;
            if let Some(sc) = scored {
                e.candidates[slot as usize].score = sc.score;
                e.candidates[slot as usize].match_probability = sc.match_probability;
                let improves = sc.ag_score > e.best_ag_score
                    || (sc.ag_score == e.best_ag_score
                        && sc.match_probability > e.match_probability_for_best_score);
                if improves {
                    e.best_score = sc.score;
                    e.best_ag_score = sc.ag_score;
                    e.match_probability_for_best_score = sc.match_probability;
                    e.best_score_genome_location = sc.location;
                    e.best_score_orig_genome_location = sc.orig_location;
                    e.used_affine_gap_scoring = false;
                    e.bases_clipped_before = sc.bases_clipped_before;
                    e.bases_clipped_after = sc.bases_clipped_after;
                    e.seed_offset = sc.seed_offset;
                }
            }
        }

        {
            let e = self.store.element_mut(elem_idx);
            e.all_extant_candidates_scored = true;
        }
        self.store.unlink_from_weight_list(elem_idx);

        let e = self.store.element(elem_idx);
        if e.best_score == UNUSED_SCORE_VALUE {
            return false;
        }
        let element_best = ScoredCandidate {
            location: e.best_score_genome_location,
            orig_location: e.best_score_orig_genome_location,
            direction,
            score: e.best_score,
            ag_score: e.best_ag_score,
            match_probability: e.match_probability_for_best_score,
            used_affine_gap_scoring: e.used_affine_gap_scoring,
            bases_clipped_before: e.bases_clipped_before,
            bases_clipped_after: e.bases_clipped_after,
            seed_offset: e.seed_offset,
        };

        // Candidates within one element are one locus: only the element's
        // best carries probability mass, and a rescore replaces the mass the
        // element contributed before.
        let is_alt = self.genome.is_alt_location(element_best.location);
        if previously_counted {
            self.scores_all.remove_probability(old_contribution);
            if !self.genome.is_alt_location(old_best_location) {
                self.scores_non_alt.remove_probability(old_contribution);
            }
        }
        self.scores_all.add_probability(element_best.match_probability);
        if !is_alt {
            self.scores_non_alt
                .add_probability(element_best.match_probability);
        }

        let rotated = self.scores_all.try_update_best(&element_best);
        if !is_alt {
            self.scores_non_alt.try_update_best(&element_best);
        }
        match rotated {
            Some(Some(displaced)) => {
                buffers.push_secondary(candidate_to_result(&displaced));
            }
            Some(None) => {}
            None => {
                if element_best.score
                    <= self
                        .scores_all
                        .best_score
                        .saturating_add(buffers.max_edit_distance_for_secondary_results)
                {
                    buffers.push_secondary(candidate_to_result(&element_best));
                }
            }
        }

        if self.options.use_affine_gap {
            buffers.push_affine_gap_candidate(candidate_to_result(&element_best));
        }

        self.options.stop_on_first_hit && self.scores_all.best_score <= self.options.max_k
    }

    /// Commit the primary (with ALT preference), run the adjuster, and trim
    /// the secondary list to its final form.
    fn finalize(
        &mut self,
        read: &Read,
        primary_result: &mut SingleAlignmentResult,
        first_alt_result: &mut SingleAlignmentResult,
        max_secondary_results: usize,
        max_edit_distance_for_secondary_results: u32,
        secondary_results: &mut Vec<SingleAlignmentResult>,
    ) {
        self.stats.hash_table_lookups += self.store.n_lookups;
        self.store.n_lookups = 0;
        self.stats.indels_merged += self.store.n_indels_merged;
        self.store.n_indels_merged = 0;

        let pool_wrapped = self.store.pool_wrapped();
        let probability_of_all = self.scores_all.probability_of_all_candidates;
        let front_clipping = read.front_clipping();
        let max_k = self.options.max_k;

        let promote_non_alt = self.options.alt_awareness
            && self.scores_all.has_best()
            && self.genome.is_alt_location(self.scores_all.best_location)
            && self.scores_non_alt.has_best()
            && self.scores_non_alt.best_score <= max_k
            && self.scores_non_alt.best_score
                <= self
                    .scores_all
                    .best_score
                    .saturating_add(self.options.max_score_gap_to_prefer_non_alt_alignment);

        if promote_non_alt {
            self.scores_non_alt.fill_result(
                primary_result,
                max_k,
                probability_of_all,
                self.popular_seeds_skipped,
                pool_wrapped,
                front_clipping,
            );
            if self.options.emit_alt_alignments {
                self.scores_all.fill_result(
                    first_alt_result,
                    max_k,
                    probability_of_all,
                    self.popular_seeds_skipped,
                    pool_wrapped,
                    front_clipping,
                );
            }
        } else {
            self.scores_all.fill_result(
                primary_result,
                max_k,
                probability_of_all,
                self.popular_seeds_skipped,
                pool_wrapped,
                front_clipping,
            );
        }

        adjust_alignment(self.genome, read, primary_result);
        if first_alt_result.is_mapped() {
            adjust_alignment(self.genome, read, first_alt_result);
        }

        self.finalize_secondary_results(
            primary_result,
            first_alt_result,
            max_secondary_results,
            max_edit_distance_for_secondary_results,
            secondary_results,
        );
    }

    /// Sort, deduplicate, score-filter, per-contig-cap and truncate the
    /// collected secondaries.
    fn finalize_secondary_results(
        &mut self,
        primary_result: &SingleAlignmentResult,
        first_alt_result: &SingleAlignmentResult,
        max_secondary_results: usize,
        max_edit_distance_for_secondary_results: u32,
        secondary_results: &mut Vec<SingleAlignmentResult>,
    ) {
        if !primary_result.is_mapped() {
            secondary_results.clear();
            return;
        }

        let use_orig = self.options.ignore_alignment_adjustments_for_om;
        let key = |r: &SingleAlignmentResult| -> (GenomeLocation, Direction) {
            if use_orig {
                (r.orig_location, r.direction)
            } else {
                (r.location, r.direction)
            }
        };

        // Best first: higher affine score, then higher probability.
        secondary_results.sort_by(|a, b| {
            b.ag_score
                .cmp(&a.ag_score)
                .then(
                    b.match_probability
                        .partial_cmp(&a.match_probability)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.location.cmp(&b.location))
        });

        let primary_key = key(primary_result);
        let alt_key = if first_alt_result.is_mapped() {
            Some(key(first_alt_result))
        } else {
            None
        };
        let score_cutoff = primary_result
            .score
            .saturating_add(max_edit_distance_for_secondary_results);

        let mut seen: Vec<(GenomeLocation, Direction)> = Vec::with_capacity(secondary_results.len());
        let epoch = self.store.epoch();
        let per_contig_cap = self.options.max_secondary_alignments_per_contig;

        // The primary occupies one slot of its contig's budget.
        if per_contig_cap > 0 {
            if let Some(ci) = self.genome.get_contig_index_at_location(primary_result.location) {
                self.hits_per_contig[ci] = HitsPerContigCount { epoch, hits: 1 };
            }
        }

        secondary_results.retain(|r| {
            if r.score > score_cutoff {
                return false;
            }
            let k = key(r);
            if k == primary_key || Some(k) == alt_key || seen.contains(&k) {
                return false;
            }
            seen.push(k);
            if per_contig_cap > 0 {
                if let Some(ci) = self.genome.get_contig_index_at_location(r.location) {
                    let entry = &mut self.hits_per_contig[ci];
                    if entry.epoch != epoch {
                        *entry = HitsPerContigCount { epoch, hits: 0 };
                    }
                    if entry.hits >= per_contig_cap {
                        return false;
                    }
                    entry.hits += 1;
                }
            }
            true
        });

        secondary_results.truncate(max_secondary_results);
    }

    /// Re-score deferred candidates with the affine-gap back-end and rebuild
    /// the primary / ALT results from the rescored set. The buffer entries
    /// are updated in place with their affine-gap scores.
    pub fn align_affine_gap(
        &mut self,
        read: &Read,
        primary_result: &mut SingleAlignmentResult,
        first_alt_result: &mut SingleAlignmentResult,
        candidates_for_affine_gap: &mut [SingleAlignmentResult],
    ) -> bool {
        if candidates_for_affine_gap.is_empty() {
            return true;
        }

        self.reset_scratch_reads(read);
        let mut set_all = ScoreSet::new();
        let mut set_non_alt = ScoreSet::new();
        let band = self.options.max_k + self.options.extra_search_depth;

        // An element that gained candidates after being scored appears more
        // than once in the deferred buffer; only its freshest (last) entry
        // carries mass, so earlier duplicates are skipped.
        let mut seen: Vec<(GenomeLocation, Direction)> =
            Vec::with_capacity(candidates_for_affine_gap.len());
        let mut skip = vec![false; candidates_for_affine_gap.len()];
        for (i, entry) in candidates_for_affine_gap.iter().enumerate().rev() {
            let k = (entry.orig_location, entry.direction);
            if seen.contains(&k) {
                skip[i] = true;
            } else {
                seen.push(k);
            }
        }

        for (i, entry) in candidates_for_affine_gap.iter_mut().enumerate() {
            if skip[i] {
                continue;
            }
            let (bases, qualities): (&[u8], &[u8]) = match entry.direction {
                Direction::Forward => (read.bases(), read.qualities()),
                Direction::Rc => (&self.rc_bases, &self.rc_qualities),
            };
            let rescored = score_candidate_affine_gap(
                self.genome,
                &mut self.ag,
                bases,
                qualities,
                entry.direction,
                entry.orig_location,
                entry.seed_offset,
                self.seed_len,
                band,
                &self.options,
            );
            self.stats.locations_scored_affine_gap += 1;

            let sc = match rescored {
                Some(sc) => sc,
                None => continue,
            };
            *entry = candidate_to_result(&sc);
            entry.used_affine_gap_scoring = true;

            let is_alt = self.genome.is_alt_location(sc.location);
            set_all.add_probability(sc.match_probability);
            set_all.try_update_best(&sc);
            if !is_alt {
                set_non_alt.add_probability(sc.match_probability);
                set_non_alt.try_update_best(&sc);
            }
        }

        if !set_all.has_best() {
            return true;
        }

        let probability_of_all = set_all.probability_of_all_candidates;
        let pool_wrapped = self.store.pool_wrapped();
        let max_k = self.options.max_k;
        let front_clipping = read.front_clipping();

        let promote_non_alt = self.options.alt_awareness
            && self.genome.is_alt_location(set_all.best_location)
            && set_non_alt.has_best()
            && set_non_alt.best_score <= max_k
            && set_non_alt.best_score
                <= set_all
                    .best_score
                    .saturating_add(self.options.max_score_gap_to_prefer_non_alt_alignment);

        if promote_non_alt {
            set_non_alt.fill_result(
                primary_result,
                max_k,
                probability_of_all,
                self.popular_seeds_skipped,
                pool_wrapped,
                front_clipping,
            );
            if self.options.emit_alt_alignments {
                set_all.fill_result(
                    first_alt_result,
                    max_k,
                    probability_of_all,
                    self.popular_seeds_skipped,
                    pool_wrapped,
                    front_clipping,
                );
            }
        } else {
            set_all.fill_result(
                primary_result,
                max_k,
                probability_of_all,
                self.popular_seeds_skipped,
                pool_wrapped,
                front_clipping,
            );
        }
        adjust_alignment(self.genome, read, primary_result);
        if first_alt_result.is_mapped() {
            adjust_alignment(self.genome, read, first_alt_result);
        }
        true
    }

    fn reset_scratch_reads(&mut self, read: &Read) {
        reverse_complement_into(read.bases(), &mut self.rc_bases);
        self.rc_qualities.clear();
        self.rc_qualities
            .extend(read.qualities().iter().rev().copied());
    }
}

/// Build a reportable result from a scored candidate. Secondary results do
/// not carry a mapping quality of their own.
fn candidate_to_result(cand: &ScoredCandidate) -> SingleAlignmentResult {
    let mut r = SingleAlignmentResult::unmapped();
    r.status = crate::result::AlignmentStatus::SingleHit;
    r.location = cand.location;
    r.orig_location = cand.orig_location;
    r.direction = cand.direction;
    r.score = cand.score;
    r.score_prior_to_clipping = cand.score;
    r.match_probability = cand.match_probability;
    r.ag_score = cand.ag_score;
    r.used_affine_gap_scoring = cand.used_affine_gap_scoring;
    r.bases_clipped_before = cand.bases_clipped_before;
    r.bases_clipped_after = cand.bases_clipped_after;
    r.seed_offset = cand.seed_offset;
    r
}

/// Score one candidate with the unit-cost back-end: the seed matched by
/// construction, so extend forward from its 3' end and backward from its 5'
/// end, splitting the score limit between the two sides.
#[allow(clippy::too_many_arguments)]
fn score_candidate_unit_cost(
    genome: &Genome,
    lv: &mut EditDistanceScorer,
    bases: &[u8],
    qualities: &[u8],
    direction: Direction,
    location: GenomeLocation,
    seed_offset: u32,
    seed_len: usize,
    score_limit: u32,
    match_reward: u32,
    sub_penalty: u32,
    use_hamming: bool,
) -> Option<ScoredCandidate> {
    let read_len = bases.len();
    let seed_offset = seed_offset as usize;
    if seed_offset + seed_len > read_len {
        return None;
    }
    let hit_pos = location + seed_offset as u64;

    let mut probability = 1.0f64;
    for &q in &qualities[seed_offset..seed_offset + seed_len] {
        probability *= correct_probability(q);
    }

    let mut distance = 0u32;
    let mut location_adjusted = location as i64;
    let mut ref_end = hit_pos + seed_len as u64;

    // 3' side.
    let tail_offset = seed_offset + seed_len;
    if tail_offset < read_len {
        let tail_len = read_len - tail_offset;
        let text = genome.get_substring(
            hit_pos + seed_len as u64,
            tail_len + score_limit as usize + 1,
        )?;
        let pattern = &bases[tail_offset..];
        let quals = &qualities[tail_offset..];
        let r = if use_hamming {
            EditDistanceScorer::compute_hamming(
                &text[..tail_len.min(text.len())],
                pattern,
                quals,
                score_limit,
                false,
            )?
        } else {
            lv.compute(text, pattern, quals, score_limit, false)?
        };
        distance += r.distance;
        probability *= r.match_probability;
        ref_end = hit_pos + seed_len as u64 + (tail_len as i64 + r.net_indel as i64) as u64;
    }
    if distance > score_limit {
        return None;
    }

    // 5' side, scored on reversed coordinates.
    if seed_offset > 0 {
        let remaining = score_limit - distance;
        let margin = remaining as usize + 1;
        let want = seed_offset + margin;
        let text_start = hit_pos.saturating_sub(want as u64);
        let text = genome.get_substring(text_start, (hit_pos - text_start) as usize)?;
        let pattern = &bases[..seed_offset];
        let quals = &qualities[..seed_offset];
        let r = if use_hamming {
            let head_start = hit_pos.checked_sub(seed_offset as u64)?;
            let head_text = genome.get_substring(head_start, seed_offset)?;
            EditDistanceScorer::compute_hamming(head_text, pattern, quals, remaining, true)?
        } else {
            lv.compute(text, pattern, quals, remaining, true)?
        };
        distance += r.distance;
        probability *= r.match_probability;
        location_adjusted -= r.net_indel as i64;
    }
    if distance > score_limit || location_adjusted < 0 {
        return None;
    }
    let location_adjusted = location_adjusted as u64;

    // A placement straddling a contig boundary (or sitting in padding) is
    // dropped rather than adjusted.
    let start_contig = genome.get_contig_index_at_location(location_adjusted)?;
    let end_contig = genome.get_contig_index_at_location(ref_end.saturating_sub(1))?;
    if start_contig != end_contig {
        return None;
    }

    let ag_score = (match_reward * (read_len as u32 - distance.min(read_len as u32))) as i32
        - (sub_penalty * distance) as i32;

    Some(ScoredCandidate {
        location: location_adjusted,
        orig_location: location,
        direction,
        score: distance,
        ag_score,
        match_probability: probability,
        used_affine_gap_scoring: false,
        bases_clipped_before: 0,
        bases_clipped_after: 0,
        seed_offset: seed_offset as u32,
    })
}

/// Score one candidate with the affine-gap back-end: extensions on both
/// sides of the seed, soft clips free at the far ends, end bonuses when an
/// extension runs all the way out.
#[allow(clippy::too_many_arguments)]
fn score_candidate_affine_gap(
    genome: &Genome,
    ag: &mut AffineGapScorer,
    bases: &[u8],
    qualities: &[u8],
    direction: Direction,
    location: GenomeLocation,
    seed_offset: u32,
    seed_len: usize,
    band: u32,
    options: &AlignerOptions,
) -> Option<ScoredCandidate> {
    let read_len = bases.len();
    let seed_offset = seed_offset as usize;
    if seed_offset + seed_len > read_len {
        return None;
    }
    let hit_pos = location + seed_offset as u64;

    let mut probability = 1.0f64;
    for &q in &qualities[seed_offset..seed_offset + seed_len] {
        probability *= correct_probability(q);
    }
    let mut ag_score = (seed_len as u32 * options.match_reward) as i32;
    let mut distance = 0u32;

    // 3' side. A seed ending flush with the read trivially reaches the 3'
    // end, so the bonus applies either way.
    let tail_offset = seed_offset + seed_len;
    let mut bases_clipped_after = 0u32;
    let mut ref_end = hit_pos + seed_len as u64;
    if tail_offset < read_len {
        let tail_len = read_len - tail_offset;
        let text = genome.get_substring(hit_pos + seed_len as u64, tail_len + band as usize + 1)?;
        let r = ag.extend(
            text,
            &bases[tail_offset..],
            &qualities[tail_offset..],
            band,
            options.three_prime_end_bonus,
            false,
        );
        ag_score += r.score;
        distance += r.edit_distance;
        probability *= r.match_probability;
        bases_clipped_after = tail_len as u32 - r.pattern_consumed;
        ref_end += r.text_consumed as u64;
    } else {
        ag_score += options.three_prime_end_bonus as i32;
    }

    // 5' side, same convention for a seed starting at the read's first base.
    let mut bases_clipped_before = 0u32;
    let mut start = hit_pos.checked_sub(seed_offset as u64)? as i64;
    if seed_offset == 0 {
        ag_score += options.five_prime_end_bonus as i32;
    }
    if seed_offset > 0 {
        let want = seed_offset + band as usize + 1;
        let text_start = hit_pos.saturating_sub(want as u64);
        let text = genome.get_substring(text_start, (hit_pos - text_start) as usize)?;
        let r = ag.extend(
            text,
            &bases[..seed_offset],
            &qualities[..seed_offset],
            band,
            options.five_prime_end_bonus,
            true,
        );
        ag_score += r.score;
        distance += r.edit_distance;
        probability *= r.match_probability;
        bases_clipped_before = seed_offset as u32 - r.pattern_consumed;
        start = hit_pos as i64 - r.text_consumed as i64;
    }
    if start < 0 {
        return None;
    }
    let location_adjusted = start as u64;

    let start_contig = genome.get_contig_index_at_location(location_adjusted)?;
    let end_contig = genome.get_contig_index_at_location(ref_end.saturating_sub(1))?;
    if start_contig != end_contig {
        return None;
    }

    Some(ScoredCandidate {
        location: location_adjusted,
        orig_location: location,
        direction,
        score: distance,
        ag_score,
        match_probability: probability,
        used_affine_gap_scoring: true,
        bases_clipped_before,
        bases_clipped_after,
        seed_offset: seed_offset as u32,
    })
}

/// The strided seed schedule: the first pass tiles the read with disjoint
/// seeds; each later wrap restarts from a binary-subdivision offset within
/// the first seed length, bisecting the remaining gaps.
struct SeedSchedule {
    seed_len: usize,
    n_possible: usize,
    wrap: usize,
    pos: usize,
    exhausted: bool,
}

impl SeedSchedule {
    fn new(seed_len: usize, n_possible: usize) -> SeedSchedule {
        SeedSchedule {
            seed_len,
            n_possible,
            wrap: 0,
            pos: 0,
            exhausted: false,
        }
    }

    /// Start offset for a wrap: 0, then L/2, L/4, 3L/4, L/8, 3L/8, ...
    fn wrap_offset(seed_len: usize, wrap: usize) -> Option<usize> {
        if wrap == 0 {
            return Some(0);
        }
        let level = usize::BITS - wrap.leading_zeros(); // floor(log2(wrap)) + 1
        let denom = 1usize << level;
        if denom > 2 * seed_len {
            return None;
        }
        let numer = 2 * wrap - denom + 1;
        Some(seed_len * numer / denom)
    }

    fn next(&mut self) -> Option<usize> {
        if self.exhausted {
            return None;
        }
        loop {
            if self.pos < self.n_possible {
                let o = self.pos;
                self.pos += self.seed_len;
                return Some(o);
            }
            self.wrap += 1;
            match SeedSchedule::wrap_offset(self.seed_len, self.wrap) {
                Some(start) => self.pos = start,
                None => {
                    self.exhausted = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_offsets_bisect() {
        assert_eq!(SeedSchedule::wrap_offset(20, 0), Some(0));
        assert_eq!(SeedSchedule::wrap_offset(20, 1), Some(10));
        assert_eq!(SeedSchedule::wrap_offset(20, 2), Some(5));
        assert_eq!(SeedSchedule::wrap_offset(20, 3), Some(15));
        assert_eq!(SeedSchedule::wrap_offset(20, 4), Some(2));
        assert_eq!(SeedSchedule::wrap_offset(20, 5), Some(7));
        assert_eq!(SeedSchedule::wrap_offset(20, 6), Some(12));
        assert_eq!(SeedSchedule::wrap_offset(20, 7), Some(17));
    }

    #[test]
    fn test_schedule_first_pass_tiles() {
        let mut s = SeedSchedule::new(20, 81);
        let first: Vec<usize> = (0..5).filter_map(|_| s.next()).collect();
        assert_eq!(first, vec![0, 20, 40, 60, 80]);
        // Next wrap starts bisecting.
        assert_eq!(s.next(), Some(10));
        assert_eq!(s.next(), Some(30));
    }

    #[test]
    fn test_schedule_eventually_covers_every_offset() {
        let n_possible = 31;
        let mut s = SeedSchedule::new(20, n_possible);
        let mut seen = vec![false; n_possible];
        while let Some(o) = s.next() {
            seen[o] = true;
        }
        let covered = seen.iter().filter(|&&b| b).count();
        assert_eq!(covered, n_possible, "schedule misses offsets: {:?}", seen);
    }

    #[test]
    fn test_schedule_terminates() {
        let mut s = SeedSchedule::new(16, 200);
        let mut count = 0;
        while s.next().is_some() {
            count += 1;
            assert!(count < 10_000, "schedule does not terminate");
        }
    }

    fn pseudo_random_bases(len: usize, mut state: u64) -> Vec<u8> {
        const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                BASES[(state >> 33) as usize % 4]
            })
            .collect()
    }

    fn small_fixture() -> (crate::genome::Genome, Vec<u8>) {
        let bases = pseudo_random_bases(3000, 42);
        let genome = crate::genome::Genome::from_contigs(
            vec![("chr1", bases.clone(), false)],
            crate::genome::DEFAULT_CHROMOSOME_PADDING,
        );
        (genome, bases)
    }

    fn align_once(
        aligner: &mut BaseAligner<'_>,
        read: &Read,
    ) -> (SingleAlignmentResult, Vec<SingleAlignmentResult>) {
        let mut primary = SingleAlignmentResult::unmapped();
        let mut first_alt = SingleAlignmentResult::unmapped();
        let mut secondary = Vec::new();
        let mut deferred = Vec::new();
        aligner.align_read(
            read,
            &mut primary,
            &mut first_alt,
            2,
            16,
            16,
            &mut secondary,
            16,
            &mut deferred,
            false,
        );
        (primary, secondary)
    }

    #[test]
    fn test_element_invariants_after_alignment() {
        let (genome, bases) = small_fixture();
        let index = crate::seed_index::SeedIndex::build(&genome, 20).unwrap();
        let mut aligner =
            BaseAligner::new(&genome, &index, AlignerOptions::default()).unwrap();
        let origin = genome.contigs()[0].beginning_location as usize;

        let mut read_bases = bases[700..800].to_vec();
        read_bases[33] = if read_bases[33] == b'T' { b'G' } else { b'T' };
        let read = Read::new("r1", &read_bases, &vec![30u8; 100]);
        let (primary, _) = align_once(&mut aligner, &read);
        assert!(primary.is_mapped());
        assert_eq!(primary.location as usize, origin + 700);

        for e in aligner.store.live_elements() {
            assert_eq!(e.weight, e.candidates_used.count_ones());
            assert_eq!(
                e.candidates_scored & !e.candidates_used,
                0,
                "scored a slot that was never used"
            );
            let mut used = e.candidates_used;
            while used != 0 {
                let slot = used.trailing_zeros() as u64;
                used &= used - 1;
                assert_eq!(
                    e.candidates[slot as usize].orig_genome_location,
                    e.base_genome_location + slot
                );
            }
        }

        let all = &aligner.scores_all;
        assert!(all.probability_of_best_candidate >= 0.0);
        assert!(
            all.probability_of_best_candidate <= all.probability_of_all_candidates + 1e-9,
            "best probability exceeds the total"
        );
    }

    #[test]
    fn test_epoch_isolation_between_reads() {
        let (genome, bases) = small_fixture();
        let index = crate::seed_index::SeedIndex::build(&genome, 20).unwrap();
        let mut aligner =
            BaseAligner::new(&genome, &index, AlignerOptions::default()).unwrap();
        let origin = genome.contigs()[0].beginning_location as usize;

        let read_a = Read::new("a", &bases[100..200], &vec![30u8; 100]);
        let read_b = Read::new("b", &bases[2000..2100], &vec![30u8; 100]);
        let (pa, _) = align_once(&mut aligner, &read_a);
        let (pb, _) = align_once(&mut aligner, &read_b);
        assert_eq!(pa.location as usize, origin + 100);
        assert_eq!(pb.location as usize, origin + 2000);
        // Re-running the first read after the second must not see stale state.
        let (pa2, _) = align_once(&mut aligner, &read_a);
        assert_eq!(pa, pa2);
    }

    #[test]
    fn test_short_read_rejected() {
        let (genome, _) = small_fixture();
        let index = crate::seed_index::SeedIndex::build(&genome, 20).unwrap();
        let mut aligner =
            BaseAligner::new(&genome, &index, AlignerOptions::default()).unwrap();
        let read = Read::new("tiny", b"ACGTACGT", &[30u8; 8]);
        let (primary, _) = align_once(&mut aligner, &read);
        assert!(!primary.is_mapped());
        assert_eq!(aligner.stats().reads_ignored, 1);
    }

    #[test]
    fn test_seed_length_mismatch_rejected() {
        let (genome, _) = small_fixture();
        let index = crate::seed_index::SeedIndex::build(&genome, 22).unwrap();
        let options = AlignerOptions::default(); // seed_len 20
        assert!(matches!(
            BaseAligner::new(&genome, &index, options),
            Err(ConfigurationError::SeedLengthMismatch { .. })
        ));
    }
}
