// osprey-align/src/affine_gap.rs
//
// Affine-gap extension scorer. Extends one side of a seed: the pattern is
// the read fragment beyond the seed boundary, the text is the matching
// stretch of reference, and the alignment is anchored at the seed end
// (cell 0,0). The far end is free: trailing read bases may be soft clipped
// at no cost, and reaching the read end earns the caller-supplied bonus.
//
// Gap cost follows gapOpen + gapExtend * (len - 1): the first gapped base
// pays the open penalty, each further base the extend penalty.

use crate::probability::{
    correct_probability, indel_probability, mismatch_probability,
};

// Traceback encoding: low two bits say where H came from, the next two
// whether E / F continued an open gap.
const H_FROM_DIAG: u8 = 0;
const H_FROM_E: u8 = 1; // gap consuming text (deletion from the read)
const H_FROM_F: u8 = 2; // gap consuming pattern (insertion in the read)
const E_EXTEND: u8 = 4;
const F_EXTEND: u8 = 8;

const NEG_INF: i32 = i32::MIN / 4;

/// One-sided extension outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtensionResult {
    /// Affine-gap score of the chosen extension, end bonus included.
    pub score: i32,
    /// Unit-cost equivalent: mismatches plus gapped bases.
    pub edit_distance: u32,
    pub match_probability: f64,
    /// Read bases consumed; the remainder of the fragment is soft clipped.
    pub pattern_consumed: u32,
    /// Reference bases consumed.
    pub text_consumed: u32,
    /// Whether the extension reached the far end of the read fragment.
    pub reached_fragment_end: bool,
}

impl ExtensionResult {
    pub fn empty() -> ExtensionResult {
        ExtensionResult {
            score: 0,
            edit_distance: 0,
            match_probability: 1.0,
            pattern_consumed: 0,
            text_consumed: 0,
            reached_fragment_end: true,
        }
    }
}

/// Reusable affine-gap scorer; scratch is sized once from the maximum read
/// size so the per-candidate path does not allocate.
pub struct AffineGapScorer {
    match_reward: i32,
    sub_penalty: i32,
    gap_open: i32,
    gap_extend: i32,
    max_pattern: usize,
    max_text: usize,
    h_row: Vec<i32>,
    e_col: Vec<i32>,
    tb: Vec<u8>,
}

impl AffineGapScorer {
    pub fn new(
        match_reward: u32,
        sub_penalty: u32,
        gap_open: u32,
        gap_extend: u32,
        max_read_size: usize,
        max_band: u32,
    ) -> AffineGapScorer {
        let max_pattern = max_read_size;
        let max_text = max_read_size + max_band as usize + 1;
        AffineGapScorer {
            match_reward: match_reward as i32,
            sub_penalty: sub_penalty as i32,
            gap_open: gap_open as i32,
            gap_extend: gap_extend as i32,
            max_pattern,
            max_text,
            h_row: vec![0; max_pattern + 1],
            e_col: vec![0; max_pattern + 1],
            tb: vec![0; (max_text + 1) * (max_pattern + 1)],
        }
    }

    /// Extend `pattern` along `text`, staying within `band` of the main
    /// diagonal. `qualities` runs parallel to `pattern`; `reversed` flips
    /// the addressing of all three slices for 5' extensions. `end_bonus` is
    /// granted when the whole fragment aligns (nothing clipped).
    pub fn extend(
        &mut self,
        text: &[u8],
        pattern: &[u8],
        qualities: &[u8],
        band: u32,
        end_bonus: u32,
        reversed: bool,
    ) -> ExtensionResult {
        let n = pattern.len().min(self.max_pattern);
        let m = text.len().min(self.max_text);
        if n == 0 {
            return ExtensionResult::empty();
        }
        let band = band.max(1) as i32;
        let row_len = n + 1;

        let get = |s: &[u8], i: usize| -> u8 {
            if reversed {
                s[s.len() - 1 - i]
            } else {
                s[i]
            }
        };

        // Row 0: gaps consuming pattern only.
        self.h_row[0] = 0;
        self.e_col[0] = NEG_INF;
        self.tb[0] = H_FROM_DIAG;
        for j in 1..=n {
            self.h_row[j] = if j as i32 > band {
                NEG_INF
            } else {
                -(self.gap_open + self.gap_extend * (j as i32 - 1))
            };
            self.e_col[j] = NEG_INF;
            self.tb[j] = H_FROM_F | F_EXTEND;
        }

        let mut best_score = 0i32;
        let mut best_i = 0usize;
        let mut best_j = 0usize;

        for i in 1..=m {
            let tb_row = i * row_len;
            let text_base = get(text, i - 1);
            // H of the cell diagonally up-left of the first banded column.
            let mut h_diag = self.h_row[0];
            self.h_row[0] = if (i as i32) <= band {
                -(self.gap_open + self.gap_extend * (i as i32 - 1))
            } else {
                NEG_INF
            };
            self.tb[tb_row] = H_FROM_E | E_EXTEND;
            let mut f = NEG_INF;

            let lo = 1.max(i as i32 - band) as usize;
            let hi = n.min(i + band as usize);
            if lo > 1 {
                h_diag = self.h_row[lo - 1];
                self.h_row[lo - 1] = NEG_INF;
            }
            if lo > hi {
                break;
            }

            for j in lo..=hi {
                // E: gap down a column, consuming text.
                let e_open = self.h_row[j] - self.gap_open;
                let e_ext = self.e_col[j] - self.gap_extend;
                let (e, e_flag) = if e_ext > e_open {
                    (e_ext, E_EXTEND)
                } else {
                    (e_open, 0)
                };
                self.e_col[j] = e;

                // F: gap along the row, consuming pattern.
                let f_open = self.h_row[j - 1] - self.gap_open;
                let f_ext = f - self.gap_extend;
                let (f_new, f_flag) = if f_ext > f_open {
                    (f_ext, F_EXTEND)
                } else {
                    (f_open, 0)
                };
                f = f_new;

                let s = if get(pattern, j - 1) == text_base {
                    self.match_reward
                } else {
                    -self.sub_penalty
                };
                let diag = h_diag + s;

                let (mut h, mut dir) = (diag, H_FROM_DIAG);
                if e > h {
                    h = e;
                    dir = H_FROM_E;
                }
                if f > h {
                    h = f;
                    dir = H_FROM_F;
                }

                h_diag = self.h_row[j];
                self.h_row[j] = h;
                self.tb[tb_row + j] = dir | e_flag | f_flag;

                let candidate = h + if j == n { end_bonus as i32 } else { 0 };
                // Prefer longer pattern coverage, then fewer text bases.
                let better = candidate > best_score
                    || (candidate == best_score
                        && (j > best_j || (j == best_j && i < best_i)));
                if better {
                    best_score = candidate;
                    best_i = i;
                    best_j = j;
                }
            }
            if hi < n {
                self.h_row[hi + 1..=n].fill(NEG_INF);
            }
        }

        self.traceback(text, pattern, qualities, reversed, row_len, best_i, best_j, best_score, n)
    }

    /// Walk the traceback from the chosen end cell to the anchor, pricing
    /// matches, mismatches and maximal gap runs.
    #[allow(clippy::too_many_arguments)]
    fn traceback(
        &self,
        text: &[u8],
        pattern: &[u8],
        qualities: &[u8],
        reversed: bool,
        row_len: usize,
        end_i: usize,
        end_j: usize,
        score: i32,
        n: usize,
    ) -> ExtensionResult {
        let get = |s: &[u8], i: usize| -> u8 {
            if reversed {
                s[s.len() - 1 - i]
            } else {
                s[i]
            }
        };

        let mut probability = 1.0f64;
        let mut edit_distance = 0u32;
        let mut i = end_i;
        let mut j = end_j;
        // 0 = in H, 1 = in E (text gap), 2 = in F (pattern gap).
        let mut state = 0u8;
        let mut gap_len = 0u32;

        while i > 0 || j > 0 {
            let code = self.tb[i * row_len + j];
            match state {
                0 => match code & 3 {
                    H_FROM_DIAG => {
                        let q = get(qualities, j - 1);
                        if get(pattern, j - 1) == get(text, i - 1) {
                            probability *= correct_probability(q);
                        } else {
                            edit_distance += 1;
                            probability *= mismatch_probability(q);
                        }
                        i -= 1;
                        j -= 1;
                    }
                    H_FROM_E => state = 1,
                    _ => state = 2,
                },
                1 => {
                    gap_len += 1;
                    edit_distance += 1;
                    let extending = code & E_EXTEND != 0;
                    i -= 1;
                    if !extending || i == 0 {
                        probability *= indel_probability(gap_len);
                        gap_len = 0;
                        state = 0;
                    }
                }
                _ => {
                    gap_len += 1;
                    edit_distance += 1;
                    let extending = code & F_EXTEND != 0;
                    j -= 1;
                    if !extending || j == 0 {
                        probability *= indel_probability(gap_len);
                        gap_len = 0;
                        state = 0;
                    }
                }
            }
        }
        if gap_len > 0 {
            probability *= indel_probability(gap_len);
        }

        ExtensionResult {
            score,
            edit_distance,
            match_probability: probability,
            pattern_consumed: end_j as u32,
            text_consumed: end_i as u32,
            reached_fragment_end: end_j == n,
        }
    }
}
