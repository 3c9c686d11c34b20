// osprey-align/src/probability.rs
//
// Phred-derived probabilities and the mapping-quality estimator. The MAPQ is
// an approximation: the probability that the best candidate is the true
// placement, taken over the candidates the search actually scored.

use lazy_static::lazy_static;

/// Probability of a SNP at any given position, used for mismatch priors in
/// the absence of a better model.
pub const SNP_PROB: f64 = 0.001;
/// Probability of opening an indel.
pub const GAP_OPEN_PROB: f64 = 0.001;
/// Probability of extending an open indel by one base.
pub const GAP_EXTEND_PROB: f64 = 0.5;

pub const MAX_MAPQ: u8 = 70;

/// Phred per popular seed skipped; the true best location may have been
/// behind one of them.
const POPULAR_SEED_MAPQ_PENALTY: u32 = 3;
const POPULAR_SEED_MAPQ_PENALTY_CAP: u32 = 15;
/// Flat penalty when the candidate pool wrapped and dropped candidates.
const POOL_WRAP_MAPQ_PENALTY: u32 = 10;

lazy_static! {
    /// phred -> probability the base call is wrong. A base can do no worse
    /// than a uniform random call, so the error probability is capped at 3/4.
    static ref PHRED_TO_ERROR: [f64; 256] = {
        let mut t = [0.0f64; 256];
        for (q, slot) in t.iter_mut().enumerate() {
            *slot = (10f64.powf(-(q as f64) / 10.0)).min(0.75);
        }
        t
    };
    /// phred -> probability the base call is right.
    static ref PHRED_TO_CORRECT: [f64; 256] = {
        let mut t = [0.0f64; 256];
        for (q, slot) in t.iter_mut().enumerate() {
            *slot = 1.0 - PHRED_TO_ERROR[q];
        }
        t
    };
}

#[inline]
pub fn error_probability(phred: u8) -> f64 {
    PHRED_TO_ERROR[phred as usize]
}

#[inline]
pub fn correct_probability(phred: u8) -> f64 {
    PHRED_TO_CORRECT[phred as usize]
}

/// Probability contribution of a mismatch at a base with the given quality:
/// the call was wrong and the true base is the specific other one observed.
#[inline]
pub fn mismatch_probability(phred: u8) -> f64 {
    error_probability(phred) / 3.0
}

/// Probability of an indel of the given length.
#[inline]
pub fn indel_probability(len: u32) -> f64 {
    if len == 0 {
        1.0
    } else {
        GAP_OPEN_PROB * GAP_EXTEND_PROB.powi(len as i32 - 1)
    }
}

/// Phred-scaled confidence that the best candidate is the right one.
///
/// `popular_seeds_skipped` and `pool_wrapped` discount for the parts of the
/// search space we knowingly did not look at.
pub fn compute_mapq(
    probability_of_best_candidate: f64,
    probability_of_all_candidates: f64,
    popular_seeds_skipped: u32,
    pool_wrapped: bool,
) -> u8 {
    if probability_of_best_candidate <= 0.0 {
        return 0;
    }
    // Floating-point subtraction can leave the total a hair under the best.
    let total = probability_of_all_candidates.max(probability_of_best_candidate);
    let fraction = probability_of_best_candidate / total;

    let base = if fraction >= 1.0 - 1e-10 {
        MAX_MAPQ as i32
    } else {
        let phred = -10.0 * (1.0 - fraction).log10();
        (phred.round() as i32).min(MAX_MAPQ as i32)
    };

    let mut penalty =
        (POPULAR_SEED_MAPQ_PENALTY * popular_seeds_skipped).min(POPULAR_SEED_MAPQ_PENALTY_CAP);
    if pool_wrapped {
        penalty += POOL_WRAP_MAPQ_PENALTY;
    }

    (base - penalty as i32).clamp(0, MAX_MAPQ as i32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phred_tables() {
        assert!((error_probability(10) - 0.1).abs() < 1e-12);
        assert!((error_probability(20) - 0.01).abs() < 1e-12);
        assert!((correct_probability(20) - 0.99).abs() < 1e-12);
        // q0 and q1 are capped at the random-call bound.
        assert!((error_probability(0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_indel_probability() {
        assert!((indel_probability(1) - GAP_OPEN_PROB).abs() < 1e-15);
        assert!((indel_probability(3) - GAP_OPEN_PROB * 0.25).abs() < 1e-15);
        assert_eq!(indel_probability(0), 1.0);
    }

    #[test]
    fn test_mapq_unique_hit_is_capped() {
        assert_eq!(compute_mapq(0.99, 0.99, 0, false), MAX_MAPQ);
        // Total slightly below best from float drift still counts as unique.
        assert_eq!(compute_mapq(0.99, 0.989999999999, 0, false), MAX_MAPQ);
    }

    #[test]
    fn test_mapq_split_mass() {
        // Two equally likely placements: -10*log10(0.5) ~= 3.
        assert_eq!(compute_mapq(0.5, 1.0, 0, false), 3);
    }

    #[test]
    fn test_mapq_penalties() {
        assert_eq!(compute_mapq(0.99, 0.99, 1, false), MAX_MAPQ - 3);
        assert_eq!(compute_mapq(0.99, 0.99, 100, false), MAX_MAPQ - 15);
        assert_eq!(compute_mapq(0.99, 0.99, 0, true), MAX_MAPQ - 10);
        // Penalties floor at zero.
        assert_eq!(compute_mapq(0.5, 1.0, 100, true), 0);
    }

    #[test]
    fn test_mapq_no_candidates() {
        assert_eq!(compute_mapq(0.0, 0.0, 0, false), 0);
    }
}
