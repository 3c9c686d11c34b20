// osprey-align/src/candidates.rs
//
// Candidate bookkeeping for one aligner instance: a bounded pool of
// elements, one open-addressed hash table per strand mapping a reference
// window to its element, and the weight index that orders elements for
// scoring. Elements live in two intrusive lists at once (hash bucket chain
// and weight list); both are expressed as u32 indices into the pool slab so
// the whole structure is owned, copyable state with no pointer graphs.
//
// The hash tables are never cleared. Each anchor carries the epoch it was
// written in; bumping the store's epoch at the start of a read invalidates
// every anchor in O(1). Reset cost is proportional to the high-water marks
// of the pool and the weight lists, not to the table size.

use crate::result::{Direction, GenomeLocation, NUM_DIRECTIONS};

/// Width of the reference window one element covers. Candidates within the
/// same window are treated as one locus whose slots differ by small indels.
/// Must be even and at most 64 so the slot masks fit a u64.
pub const ELEMENT_WINDOW: u64 = 48;

/// Candidate score meaning "not scored yet".
pub const UNUSED_SCORE_VALUE: u32 = 0xffff;

const NIL: u32 = u32::MAX;

// Bounds protecting against pathological configurations; pool exhaustion is
// survivable (candidates drop and MAPQ is discounted), so a hard cap is safe.
const MAX_POOL_SIZE: usize = 1 << 18;
const MAX_TABLE_SIZE: usize = 1 << 20;

/// Split a location into its element window base and slot.
#[inline]
pub fn decompose_location(location: GenomeLocation) -> (GenomeLocation, u64) {
    let low = location % ELEMENT_WINDOW;
    (location - low, low)
}

// A deliberately weak multiplicative hash. The tables are sized generously
// and hashing is on the per-hit path, so the cost of the hash matters more
// than its quality.
#[inline]
fn hash(key: u64) -> u64 {
    key.wrapping_mul(131)
}

/// One proposed placement of the read.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub score: u32,
    pub seed_offset: u32,
    pub match_probability: f64,
    pub orig_genome_location: GenomeLocation,
}

impl Candidate {
    const EMPTY: Candidate = Candidate {
        score: UNUSED_SCORE_VALUE,
        seed_offset: 0,
        match_probability: 0.0,
        orig_genome_location: 0,
    };
}

/// A window of up to ELEMENT_WINDOW candidates sharing one strand and one
/// aligned stretch of reference.
#[derive(Debug, Clone)]
pub struct HashTableElement {
    weight_next: u32,
    weight_prev: u32,
    in_weight_list: bool,
    next: u32,

    pub candidates_used: u64,
    pub candidates_scored: u64,
    pub base_genome_location: GenomeLocation,
    pub direction: Direction,
    pub weight: u32,
    pub lowest_possible_score: u32,

    pub best_score: u32,
    pub best_ag_score: i32,
    pub match_probability_for_best_score: f64,
    pub best_score_genome_location: GenomeLocation,
    pub best_score_orig_genome_location: GenomeLocation,
    pub used_affine_gap_scoring: bool,
    pub bases_clipped_before: u32,
    pub bases_clipped_after: u32,
    pub seed_offset: u32,
    pub all_extant_candidates_scored: bool,

    pub candidates: [Candidate; ELEMENT_WINDOW as usize],
}

impl HashTableElement {
    fn empty() -> HashTableElement {
        HashTableElement {
            weight_next: NIL,
            weight_prev: NIL,
            in_weight_list: false,
            next: NIL,
            candidates_used: 0,
            candidates_scored: 0,
            base_genome_location: 0,
            direction: Direction::Forward,
            weight: 0,
            lowest_possible_score: 0,
            best_score: UNUSED_SCORE_VALUE,
            best_ag_score: i32::MIN,
            match_probability_for_best_score: 0.0,
            best_score_genome_location: 0,
            best_score_orig_genome_location: 0,
            used_affine_gap_scoring: false,
            bases_clipped_before: 0,
            bases_clipped_after: 0,
            seed_offset: 0,
            all_extant_candidates_scored: false,
            candidates: [Candidate::EMPTY; ELEMENT_WINDOW as usize],
        }
    }

    fn init(&mut self, base: GenomeLocation, direction: Direction, lowest_possible_score: u32) {
        self.weight_next = NIL;
        self.weight_prev = NIL;
        self.in_weight_list = false;
        self.next = NIL;
        self.candidates_used = 0;
        self.candidates_scored = 0;
        self.base_genome_location = base;
        self.direction = direction;
        self.weight = 0;
        self.lowest_possible_score = lowest_possible_score;
        self.best_score = UNUSED_SCORE_VALUE;
        self.best_ag_score = i32::MIN;
        self.match_probability_for_best_score = 0.0;
        self.best_score_genome_location = 0;
        self.best_score_orig_genome_location = 0;
        self.used_affine_gap_scoring = false;
        self.bases_clipped_before = 0;
        self.bases_clipped_after = 0;
        self.seed_offset = 0;
        self.all_extant_candidates_scored = false;
    }

    /// Slots still waiting for a score.
    #[inline]
    pub fn unscored_mask(&self) -> u64 {
        self.candidates_used & !self.candidates_scored
    }
}

#[derive(Debug, Clone, Copy)]
struct HashTableAnchor {
    element: u32,
    epoch: u64,
}

/// What happened to an ingested hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The exact (location, strand) candidate already existed.
    AlreadyPresent(u32),
    /// A new candidate joined an existing element (an indel-shifted mate).
    MergedIntoElement(u32),
    /// A fresh element was allocated.
    NewElement(u32),
    /// The pool was exhausted; the candidate is lost.
    Dropped,
}

pub struct CandidateStore {
    pool: Vec<HashTableElement>,
    n_used: u32,
    anchors: [Vec<HashTableAnchor>; NUM_DIRECTIONS],
    table_mask: u64,
    weight_list_heads: Vec<u32>,
    highest_used_weight_list: u32,
    epoch: u64,
    wrap_count: u32,
    pub n_lookups: u64,
    pub n_indels_merged: u64,
    enable_prefetch: bool,
}

impl CandidateStore {
    /// Size everything from the configuration bounds: the pool from the
    /// worst-case candidate count, the tables at 1.5x that rounded up to a
    /// power of two, the weight index from the seed budget.
    pub fn new(
        max_hits_to_consider: u32,
        max_seeds: u32,
        extra_search_depth: u32,
        enable_prefetch: bool,
    ) -> CandidateStore {
        let worst_case = (max_hits_to_consider as usize)
            .saturating_mul(max_seeds as usize)
            .saturating_mul(2);
        let pool_size = worst_case.clamp(64, MAX_POOL_SIZE);
        let table_size = (worst_case * 3 / 2)
            .next_power_of_two()
            .clamp(64, MAX_TABLE_SIZE);
        // Sized by the seed budget, but never below the per-element candidate
        // capacity so a fully packed element keeps weight == popcount.
        let num_weight_lists =
            ((max_seeds + extra_search_depth + 2) as usize).max(ELEMENT_WINDOW as usize + 1);

        let anchor = HashTableAnchor {
            element: NIL,
            epoch: 0,
        };
        CandidateStore {
            pool: vec![HashTableElement::empty(); pool_size],
            n_used: 0,
            anchors: [vec![anchor; table_size], vec![anchor; table_size]],
            table_mask: (table_size - 1) as u64,
            weight_list_heads: vec![NIL; num_weight_lists],
            highest_used_weight_list: 0,
            epoch: 1,
            wrap_count: 0,
            n_lookups: 0,
            n_indels_merged: 0,
            enable_prefetch,
        }
    }

    /// Invalidate everything from the previous read. O(high-water marks).
    pub fn reset(&mut self) {
        self.epoch += 1;
        let high = self.highest_used_weight_list as usize;
        let bound = high.min(self.weight_list_heads.len() - 1);
        for head in self.weight_list_heads[..=bound].iter_mut()
        {
            *head = NIL;
        }
        self.highest_used_weight_list = 0;
        self.n_used = 0;
        self.wrap_count = 0;
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn wrap_count(&self) -> u32 {
        self.wrap_count
    }

    #[inline]
    pub fn pool_wrapped(&self) -> bool {
        self.wrap_count > 0
    }

    #[inline]
    pub fn num_weight_lists(&self) -> u32 {
        self.weight_list_heads.len() as u32
    }

    #[inline]
    pub fn highest_used_weight_list(&self) -> u32 {
        self.highest_used_weight_list
    }

    #[inline]
    pub fn element(&self, idx: u32) -> &HashTableElement {
        &self.pool[idx as usize]
    }

    #[inline]
    pub fn element_mut(&mut self, idx: u32) -> &mut HashTableElement {
        &mut self.pool[idx as usize]
    }

    #[inline]
    fn bucket(&self, base: GenomeLocation) -> usize {
        (hash(base) & self.table_mask) as usize
    }

    /// Hint that the bucket for `location` is about to be probed.
    #[inline]
    pub fn prefetch(&self, location: GenomeLocation, direction: Direction) {
        if !self.enable_prefetch {
            return;
        }
        let (base, _) = decompose_location(location);
        let bucket = self.bucket(base);
        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            let anchor = &self.anchors[direction.index()][bucket];
            _mm_prefetch::<_MM_HINT_T0>(anchor as *const HashTableAnchor as *const i8);
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = (bucket, direction);
        }
    }

    /// The element covering `location`'s window on `direction`, if one was
    /// created this epoch.
    pub fn find_element(&mut self, location: GenomeLocation, direction: Direction) -> Option<u32> {
        self.n_lookups += 1;
        let (base, _) = decompose_location(location);
        let bucket = self.bucket(base);
        let anchor = self.anchors[direction.index()][bucket];
        if anchor.epoch != self.epoch {
            return None;
        }
        let mut idx = anchor.element;
        while idx != NIL {
            let e = &self.pool[idx as usize];
            if e.base_genome_location == base && e.direction == direction {
                return Some(idx);
            }
            idx = e.next;
        }
        None
    }

    /// The candidate at exactly (location, direction), if present.
    pub fn find_candidate(
        &mut self,
        location: GenomeLocation,
        direction: Direction,
    ) -> Option<(u32, u64)> {
        let (_, slot) = decompose_location(location);
        let elem = self.find_element(location, direction)?;
        if self.pool[elem as usize].candidates_used & (1 << slot) != 0 {
            Some((elem, slot))
        } else {
            None
        }
    }

    /// Record a hit: reuse the exact candidate, join an existing element, or
    /// allocate a new one. The element's weight rises only when a new slot
    /// is occupied, keeping weight == popcount(candidates_used).
    pub fn allocate_new_candidate(
        &mut self,
        location: GenomeLocation,
        direction: Direction,
        lowest_possible_score: u32,
        seed_offset: u32,
    ) -> IngestOutcome {
        let (base, slot) = decompose_location(location);
        let bit = 1u64 << slot;

        if let Some(elem_idx) = self.find_element(location, direction) {
            let e = &mut self.pool[elem_idx as usize];
            if e.candidates_used & bit != 0 {
                e.lowest_possible_score = e.lowest_possible_score.min(lowest_possible_score);
                return IngestOutcome::AlreadyPresent(elem_idx);
            }
            e.candidates_used |= bit;
            e.lowest_possible_score = e.lowest_possible_score.min(lowest_possible_score);
            e.candidates[slot as usize] = Candidate {
                score: UNUSED_SCORE_VALUE,
                seed_offset,
                match_probability: 0.0,
                orig_genome_location: location,
            };
            // A window-mate at a shifted offset is an indel merged into an
            // existing locus.
            self.n_indels_merged += 1;
            self.increment_weight(elem_idx);
            return IngestOutcome::MergedIntoElement(elem_idx);
        }

        if self.n_used as usize >= self.pool.len() {
            self.wrap_count += 1;
            return IngestOutcome::Dropped;
        }
        let elem_idx = self.n_used;
        self.n_used += 1;

        let bucket = self.bucket(base);
        let anchor = &mut self.anchors[direction.index()][bucket];
        let chain_head = if anchor.epoch == self.epoch {
            anchor.element
        } else {
            NIL
        };

        let e = &mut self.pool[elem_idx as usize];
        e.init(base, direction, lowest_possible_score);
        e.next = chain_head;
        e.candidates_used = bit;
        e.candidates[slot as usize] = Candidate {
            score: UNUSED_SCORE_VALUE,
            seed_offset,
            match_probability: 0.0,
            orig_genome_location: location,
        };

        *anchor = HashTableAnchor {
            element: elem_idx,
            epoch: self.epoch,
        };
        self.increment_weight(elem_idx);
        IngestOutcome::NewElement(elem_idx)
    }

    /// Move an element up one weight list (LIFO at the head of the new one).
    pub fn increment_weight(&mut self, elem_idx: u32) {
        self.unlink_from_weight_list(elem_idx);
        let cap = self.weight_list_heads.len() as u32 - 1;
        let e = &mut self.pool[elem_idx as usize];
        e.weight = (e.weight + 1).min(cap);
        let w = e.weight;
        self.link_at_head(elem_idx, w);
        if w > self.highest_used_weight_list {
            self.highest_used_weight_list = w;
        }
    }

    /// Put an element back on the list matching its weight (used when a
    /// partially scored element gains new candidates).
    pub fn relink(&mut self, elem_idx: u32) {
        if self.pool[elem_idx as usize].in_weight_list {
            return;
        }
        let w = self.pool[elem_idx as usize].weight;
        self.link_at_head(elem_idx, w);
        if w > self.highest_used_weight_list {
            self.highest_used_weight_list = w;
        }
    }

    fn link_at_head(&mut self, elem_idx: u32, w: u32) {
        let old_head = self.weight_list_heads[w as usize];
        {
            let e = &mut self.pool[elem_idx as usize];
            e.weight_next = old_head;
            e.weight_prev = NIL;
            e.in_weight_list = true;
        }
        if old_head != NIL {
            self.pool[old_head as usize].weight_prev = elem_idx;
        }
        self.weight_list_heads[w as usize] = elem_idx;
    }

    pub fn unlink_from_weight_list(&mut self, elem_idx: u32) {
        let (prev, next, w, linked) = {
            let e = &self.pool[elem_idx as usize];
            (e.weight_prev, e.weight_next, e.weight, e.in_weight_list)
        };
        if !linked {
            return;
        }
        if prev != NIL {
            self.pool[prev as usize].weight_next = next;
        } else {
            self.weight_list_heads[w as usize] = next;
        }
        if next != NIL {
            self.pool[next as usize].weight_prev = prev;
        }
        let e = &mut self.pool[elem_idx as usize];
        e.weight_next = NIL;
        e.weight_prev = NIL;
        e.in_weight_list = false;
    }

    /// Head of the given weight list, if any.
    #[inline]
    pub fn head_of_weight_list(&self, w: u32) -> Option<u32> {
        match self.weight_list_heads.get(w as usize) {
            Some(&h) if h != NIL => Some(h),
            _ => None,
        }
    }

    /// Next element after `elem_idx` on its weight list.
    #[inline]
    pub fn next_in_weight_list(&self, elem_idx: u32) -> Option<u32> {
        let n = self.pool[elem_idx as usize].weight_next;
        if n == NIL {
            None
        } else {
            Some(n)
        }
    }

    /// Drop `highest_used_weight_list` down past emptied lists.
    pub fn settle_highest_weight_list(&mut self) {
        while self.highest_used_weight_list > 0
            && self.weight_list_heads[self.highest_used_weight_list as usize] == NIL
        {
            self.highest_used_weight_list -= 1;
        }
    }

    /// Iterate elements created this epoch (for invariant checks in tests).
    pub fn live_elements(&self) -> impl Iterator<Item = &HashTableElement> {
        self.pool[..self.n_used as usize].iter()
    }
}
