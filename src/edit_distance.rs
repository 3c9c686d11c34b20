// osprey-align/src/edit_distance.rs
//
// Bounded unit-cost alignment (Landau-Vishkin). Scores a read fragment
// against a reference fragment and either returns the edit distance (when it
// is at most the limit) or reports the limit exceeded. The same machinery
// runs forward for 3' extension and reversed for 5' extension, and can emit
// a CIGAR trace for the output layer.
//
// L[e][d] is the furthest pattern index reachable with e edits on diagonal
// d = textConsumed - patternConsumed. Each level extends the previous one by
// one substitution, one inserted pattern base, or one skipped text base,
// then runs down the diagonal as far as the sequences agree.

use crate::probability::{
    correct_probability, indel_probability, mismatch_probability,
};

const ACTION_NONE: u8 = 0;
const ACTION_SUB: u8 = 1;
const ACTION_INS: u8 = 2; // extra pattern (read) base
const ACTION_DEL: u8 = 3; // extra text (reference) base

const INVALID: i32 = i32::MIN / 2;

/// Outcome of a bounded alignment that stayed within the limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditDistanceResult {
    pub distance: u32,
    /// Text bases consumed minus pattern bases consumed; the candidate's
    /// genome location shifts by this much on the 5' side.
    pub net_indel: i32,
    /// Product of per-base call probabilities over the chosen alignment.
    pub match_probability: f64,
}

#[derive(Debug, Clone, Copy)]
struct Edit {
    action: u8,
    /// Pattern index the edit applies at (for DEL, the gap sits before it).
    position: i32,
}

/// Reusable scorer: all scratch is sized once from the largest limit the
/// aligner can ask for, so the per-candidate path does not allocate.
pub struct EditDistanceScorer {
    max_limit: usize,
    width: usize,
    l: Vec<i32>,
    action: Vec<u8>,
    edits: Vec<Edit>,
    mismatch_positions: Vec<i32>,
    skip_positions: Vec<i32>,
}

#[inline]
fn at(s: &[u8], i: usize, reversed: bool) -> u8 {
    if reversed {
        s[s.len() - 1 - i]
    } else {
        s[i]
    }
}

impl EditDistanceScorer {
    pub fn new(max_limit: u32) -> EditDistanceScorer {
        let max_limit = max_limit as usize;
        let width = 2 * max_limit + 1;
        EditDistanceScorer {
            max_limit,
            width,
            l: vec![INVALID; (max_limit + 1) * width],
            action: vec![ACTION_NONE; (max_limit + 1) * width],
            edits: Vec::with_capacity(max_limit + 1),
            mismatch_positions: Vec::with_capacity(max_limit + 1),
            skip_positions: Vec::with_capacity(max_limit + 1),
        }
    }

    #[inline]
    fn idx(&self, e: usize, d: i32) -> usize {
        e * self.width + (d + self.max_limit as i32) as usize
    }

    /// Align `pattern` against `text`, allowing up to `limit` edits.
    /// `qualities` runs parallel to `pattern`; when `reversed` is set all
    /// three slices are addressed back to front, which is how 5' extensions
    /// are scored without copying.
    pub fn compute(
        &mut self,
        text: &[u8],
        pattern: &[u8],
        qualities: &[u8],
        limit: u32,
        reversed: bool,
    ) -> Option<EditDistanceResult> {
        let (e_final, d_final) = self.fill(text, pattern, limit, reversed)?;
        let probability = self.probability_from_backtrace(pattern, qualities, reversed);
        Some(EditDistanceResult {
            distance: e_final as u32,
            net_indel: d_final,
            match_probability: probability,
        })
    }

    /// Forward alignment that also produces CIGAR operations (M/I/D, with
    /// mismatches folded into M). Used by the SAM writer, not the hot path.
    pub fn compute_with_cigar(
        &mut self,
        text: &[u8],
        pattern: &[u8],
        qualities: &[u8],
        limit: u32,
        cigar: &mut Vec<(u8, u32)>,
    ) -> Option<EditDistanceResult> {
        let (e_final, d_final) = self.fill(text, pattern, limit, false)?;
        let probability = self.probability_from_backtrace(pattern, qualities, false);
        self.cigar_from_edits(pattern.len(), cigar);
        Some(EditDistanceResult {
            distance: e_final as u32,
            net_indel: d_final,
            match_probability: probability,
        })
    }

    /// The degraded fast path: mismatch count over equal-length windows,
    /// for callers that know no indels are expected.
    pub fn compute_hamming(
        text: &[u8],
        pattern: &[u8],
        qualities: &[u8],
        limit: u32,
        reversed: bool,
    ) -> Option<EditDistanceResult> {
        let n = pattern.len();
        let compared = n.min(text.len());
        let mut distance: u32 = 0;
        let mut probability = 1.0f64;
        for i in 0..compared {
            let q = at(qualities, i, reversed);
            if at(pattern, i, reversed) == at(text, i, reversed) {
                probability *= correct_probability(q);
            } else {
                distance += 1;
                if distance > limit {
                    return None;
                }
                probability *= mismatch_probability(q);
            }
        }
        // Pattern overhanging the text can never match.
        for i in compared..n {
            distance += 1;
            if distance > limit {
                return None;
            }
            probability *= mismatch_probability(at(qualities, i, reversed));
        }
        Some(EditDistanceResult {
            distance,
            net_indel: 0,
            match_probability: probability,
        })
    }

    /// Run the level-by-level fill; returns (edits, final diagonal) on
    /// success. With `reversed` set the alignment is anchored at the right
    /// end of both slices and grows leftward, which is how 5' extensions
    /// run without copying the sequences.
    fn fill(
        &mut self,
        text: &[u8],
        pattern: &[u8],
        limit: u32,
        reversed: bool,
    ) -> Option<(usize, i32)> {
        let n = pattern.len() as i32;
        let text_len = text.len() as i32;
        if n == 0 {
            self.edits.clear();
            return Some((0, 0));
        }
        let limit = (limit as usize).min(self.max_limit);

        // Level 0: longest common prefix from the anchor.
        let lcp = self.extend_from(text, pattern, 0, 0, reversed);
        let i0 = self.idx(0, 0);
        self.l[i0] = lcp;
        self.action[i0] = ACTION_NONE;
        if lcp >= n {
            self.edits.clear();
            return Some((0, 0));
        }

        for e in 1..=limit {
            let er = e as i32;
            for d in -er..=er {
                let prev = |dd: i32| -> i32 {
                    if dd.unsigned_abs() as usize > e - 1 {
                        // Outside the previous level's diagonal range.
                        INVALID
                    } else {
                        self.l[(e - 1) * self.width + (dd + self.max_limit as i32) as usize]
                    }
                };

                let sub = prev(d).saturating_add(1);
                let ins = prev(d + 1).saturating_add(1);
                let del = prev(d - 1);

                let (mut best, mut act) = (sub, ACTION_SUB);
                if ins > best {
                    best = ins;
                    act = ACTION_INS;
                }
                if del > best {
                    best = del;
                    act = ACTION_DEL;
                }

                let slot = self.idx(e, d);
                if best < 0 || best + d > text_len || best > n {
                    self.l[slot] = INVALID;
                    self.action[slot] = ACTION_NONE;
                    continue;
                }

                let extended = if best < n {
                    self.extend_from(text, pattern, best, d, reversed)
                } else {
                    best
                };
                self.l[slot] = extended;
                self.action[slot] = act;

                if extended >= n {
                    self.backtrace(e, d);
                    return Some((e, d));
                }
            }
        }
        None
    }

    #[inline]
    fn extend_from(&self, text: &[u8], pattern: &[u8], mut i: i32, d: i32, reversed: bool) -> i32 {
        let n = pattern.len() as i32;
        let text_len = text.len() as i32;
        while i < n
            && i + d < text_len
            && at(pattern, i as usize, reversed) == at(text, (i + d) as usize, reversed)
        {
            i += 1;
        }
        i
    }

    /// Recover the edit list for (e_final, d_final) into self.edits,
    /// ordered by ascending pattern position.
    fn backtrace(&mut self, e_final: usize, d_final: i32) {
        self.edits.clear();
        let mut e = e_final;
        let mut d = d_final;
        while e > 0 {
            let act = self.action[self.idx(e, d)];
            let d_prev = match act {
                ACTION_SUB => d,
                ACTION_INS => d + 1,
                ACTION_DEL => d - 1,
                _ => break,
            };
            let i_prev = self.l[(e - 1) * self.width + (d_prev + self.max_limit as i32) as usize];
            self.edits.push(Edit {
                action: act,
                position: i_prev.max(0),
            });
            e -= 1;
            d = d_prev;
        }
        self.edits.reverse();
    }

    /// Probability of the traced alignment: correct-call probability for
    /// matched bases, error/3 for mismatches, and open/extend factors for
    /// each maximal indel run (whose bases do not also pay a call factor).
    fn probability_from_backtrace(
        &mut self,
        pattern: &[u8],
        qualities: &[u8],
        reversed: bool,
    ) -> f64 {
        let n = pattern.len();
        let mut probability = 1.0f64;

        // Classify pattern positions touched by edits and price each
        // maximal indel run.
        self.mismatch_positions.clear();
        self.skip_positions.clear();
        let mut run_action = ACTION_NONE;
        let mut run_len: u32 = 0;
        let mut run_pos: i32 = -2;
        for edit in &self.edits {
            match edit.action {
                ACTION_SUB => {
                    if run_len > 0 {
                        probability *= indel_probability(run_len);
                        run_len = 0;
                        run_action = ACTION_NONE;
                    }
                    self.mismatch_positions.push(edit.position);
                }
                ACTION_INS | ACTION_DEL => {
                    let adjacent = edit.action == run_action
                        && (edit.position == run_pos || edit.position == run_pos + 1);
                    if run_len > 0 && !adjacent {
                        probability *= indel_probability(run_len);
                        run_len = 0;
                    }
                    run_action = edit.action;
                    run_pos = edit.position;
                    run_len += 1;
                    if edit.action == ACTION_INS {
                        self.skip_positions.push(edit.position);
                    }
                }
                _ => {}
            }
        }
        if run_len > 0 {
            probability *= indel_probability(run_len);
        }

        for i in 0..n {
            let q = at(qualities, i, reversed);
            if self.mismatch_positions.contains(&(i as i32)) {
                probability *= mismatch_probability(q);
            } else if self.skip_positions.contains(&(i as i32)) {
                // Inserted read bases are priced by the indel run.
            } else {
                probability *= correct_probability(q);
            }
        }
        probability
    }

    /// Turn the traced edits into merged CIGAR operations.
    fn cigar_from_edits(&self, pattern_len: usize, cigar: &mut Vec<(u8, u32)>) {
        cigar.clear();
        let mut push = |cigar: &mut Vec<(u8, u32)>, op: u8, len: u32| {
            if len == 0 {
                return;
            }
            if let Some(last) = cigar.last_mut() {
                if last.0 == op {
                    last.1 += len;
                    return;
                }
            }
            cigar.push((op, len));
        };

        let mut pos: i32 = 0;
        for edit in &self.edits {
            match edit.action {
                ACTION_SUB => {
                    // Mismatches stay inside M; just make sure the M run
                    // reaches past this base.
                    let span = edit.position - pos + 1;
                    push(cigar, b'M', span.max(0) as u32);
                    pos = edit.position + 1;
                }
                ACTION_INS => {
                    let span = edit.position - pos;
                    push(cigar, b'M', span.max(0) as u32);
                    push(cigar, b'I', 1);
                    pos = edit.position + 1;
                }
                ACTION_DEL => {
                    let span = edit.position - pos;
                    push(cigar, b'M', span.max(0) as u32);
                    push(cigar, b'D', 1);
                    pos = edit.position;
                }
                _ => {}
            }
        }
        let tail = pattern_len as i32 - pos;
        push(cigar, b'M', tail.max(0) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quals(n: usize) -> Vec<u8> {
        vec![30u8; n]
    }

    #[test]
    fn test_exact_match() {
        let mut lv = EditDistanceScorer::new(10);
        let r = lv
            .compute(b"ACGTACGTACGT", b"ACGTACGTACGT", &quals(12), 5, false)
            .unwrap();
        assert_eq!(r.distance, 0);
        assert_eq!(r.net_indel, 0);
        let expected = correct_probability(30).powi(12);
        assert!((r.match_probability - expected).abs() < 1e-12);
    }

    #[test]
    fn test_single_mismatch() {
        let mut lv = EditDistanceScorer::new(10);
        let r = lv
            .compute(b"ACGTACGTACGT", b"ACGTAAGTACGT", &quals(12), 5, false)
            .unwrap();
        assert_eq!(r.distance, 1);
        assert_eq!(r.net_indel, 0);
        let expected = correct_probability(30).powi(11) * mismatch_probability(30);
        assert!((r.match_probability - expected).abs() < 1e-12);
    }

    #[test]
    fn test_insertion_in_pattern() {
        // Pattern has one extra base relative to the text.
        let mut lv = EditDistanceScorer::new(10);
        let r = lv
            .compute(b"ACGTACGT", b"ACGTTACGT", &quals(9), 5, false)
            .unwrap();
        assert_eq!(r.distance, 1);
        assert_eq!(r.net_indel, -1);
    }

    #[test]
    fn test_deletion_from_pattern() {
        // Text has one extra base relative to the pattern.
        let mut lv = EditDistanceScorer::new(10);
        let r = lv
            .compute(b"ACGTTACGT", b"ACGTACGT", &quals(8), 5, false)
            .unwrap();
        assert_eq!(r.distance, 1);
        assert_eq!(r.net_indel, 1);
    }

    #[test]
    fn test_limit_exceeded() {
        let mut lv = EditDistanceScorer::new(10);
        assert!(lv
            .compute(b"AAAAAAAAAA", b"CCCCCCCCCC", &quals(10), 3, false)
            .is_none());
    }

    #[test]
    fn test_limit_boundary() {
        let mut lv = EditDistanceScorer::new(10);
        // Exactly two mismatches passes with limit 2, fails with limit 1.
        assert!(lv
            .compute(b"ACGTACGT", b"AGGTAGGT", &quals(8), 2, false)
            .is_some());
        assert!(lv
            .compute(b"ACGTACGT", b"AGGTAGGT", &quals(8), 1, false)
            .is_none());
    }

    #[test]
    fn test_reversed_matches_forward_of_reversed_inputs() {
        let mut lv = EditDistanceScorer::new(10);
        let text = b"ACCGTTACGGA";
        let pattern = b"ACCGTTACG";
        let q: Vec<u8> = (20..29).collect();

        let fwd = lv.compute(text, pattern, &q, 4, false).unwrap();

        let text_rev: Vec<u8> = text.iter().rev().copied().collect();
        let pattern_rev: Vec<u8> = pattern.iter().rev().copied().collect();
        let q_rev: Vec<u8> = q.iter().rev().copied().collect();
        let rev = lv.compute(&text_rev, &pattern_rev, &q_rev, 4, true).unwrap();

        assert_eq!(fwd.distance, rev.distance);
        assert!((fwd.match_probability - rev.match_probability).abs() < 1e-12);
    }

    #[test]
    fn test_empty_pattern() {
        let mut lv = EditDistanceScorer::new(10);
        let r = lv.compute(b"ACGT", b"", &[], 3, false).unwrap();
        assert_eq!(r.distance, 0);
        assert_eq!(r.match_probability, 1.0);
    }

    #[test]
    fn test_cigar_perfect() {
        let mut lv = EditDistanceScorer::new(10);
        let mut cigar = Vec::new();
        lv.compute_with_cigar(b"ACGTACGT", b"ACGTACGT", &quals(8), 3, &mut cigar)
            .unwrap();
        assert_eq!(cigar, vec![(b'M', 8)]);
    }

    #[test]
    fn test_cigar_with_insertion() {
        let mut lv = EditDistanceScorer::new(10);
        let mut cigar = Vec::new();
        let r = lv
            .compute_with_cigar(b"ACGTACGT", b"ACGTTACGT", &quals(9), 3, &mut cigar)
            .unwrap();
        assert_eq!(r.distance, 1);
        let read_span: u32 = cigar
            .iter()
            .filter(|(op, _)| *op == b'M' || *op == b'I')
            .map(|(_, l)| l)
            .sum();
        assert_eq!(read_span, 9);
        assert!(cigar.iter().any(|(op, _)| *op == b'I'));
    }

    #[test]
    fn test_cigar_with_deletion() {
        let mut lv = EditDistanceScorer::new(10);
        let mut cigar = Vec::new();
        let r = lv
            .compute_with_cigar(b"ACGTTACGT", b"ACGTACGT", &quals(8), 3, &mut cigar)
            .unwrap();
        assert_eq!(r.distance, 1);
        let ref_span: u32 = cigar
            .iter()
            .filter(|(op, _)| *op == b'M' || *op == b'D')
            .map(|(_, l)| l)
            .sum();
        assert_eq!(ref_span, 9);
    }

    #[test]
    fn test_hamming_counts_mismatches() {
        let r = EditDistanceScorer::compute_hamming(
            b"ACGTACGT",
            b"ACGAACGA",
            &quals(8),
            4,
            false,
        )
        .unwrap();
        assert_eq!(r.distance, 2);
        assert!(EditDistanceScorer::compute_hamming(
            b"ACGTACGT",
            b"ACGAACGA",
            &quals(8),
            1,
            false
        )
        .is_none());
    }

    #[test]
    fn test_indel_probability_applied() {
        let mut lv = EditDistanceScorer::new(10);
        let with_del = lv
            .compute(b"ACGTTACGT", b"ACGTACGT", &quals(8), 5, false)
            .unwrap();
        let perfect = lv
            .compute(b"ACGTACGT", b"ACGTACGT", &quals(8), 5, false)
            .unwrap();
        let ratio = with_del.match_probability / perfect.match_probability;
        assert!((ratio - crate::probability::indel_probability(1)).abs() < 1e-9);
    }
}
