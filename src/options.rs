// osprey-align/src/options.rs
//
// Aligner configuration. One instance is shared (by value) between the CLI,
// the batch driver and every worker aligner.

use std::error::Error;
use std::fmt;

/// Switches that turn off individual short-circuits, so tests can compare
/// the optimized paths against exhaustive evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOptimizations {
    /// Do not prune elements whose lower score bound already exceeds the
    /// score limit; score everything that was ever a candidate.
    pub no_truncation: bool,
    /// Never stop seed selection early, even when no unseen location could
    /// beat the current best.
    pub no_early_seed_exit: bool,
}

/// All tunables of the alignment engine.
///
/// `max_seeds_to_use` and `max_seed_coverage` are mutually exclusive ways of
/// bounding seed selection; when both are nonzero, `max_seeds_to_use` wins.
#[derive(Debug, Clone)]
pub struct AlignerOptions {
    /// Seeds with more total hits than this are "popular" and skipped.
    pub max_hits_to_consider: u32,
    /// Edit-distance cap; alignments scoring above it report NotFound.
    pub max_k: u32,
    /// Upper bound on read length; all per-read scratch is sized from it.
    pub max_read_size: usize,
    /// Hard cap on seeds looked up per read (0 = derive from coverage).
    pub max_seeds_to_use: u32,
    /// Seed budget expressed as a multiple of readLen/seedLen (0 = unused).
    pub max_seed_coverage: f64,
    /// Weight lists below this are only drained on the final pass.
    pub min_weight_to_check: u32,
    /// How far beyond the best score we keep scoring, for MAPQ mass and
    /// secondary results.
    pub extra_search_depth: u32,
    /// Seed (k-mer) length; must match the seed index.
    pub seed_len: usize,
    /// Score candidates with the affine-gap back-end after the unit-cost pass.
    pub use_affine_gap: bool,
    /// Prefer non-ALT alignments that score close to an ALT best.
    pub alt_awareness: bool,
    /// Report the displaced ALT best alongside a promoted non-ALT primary.
    pub emit_alt_alignments: bool,
    /// Score gap within which a non-ALT alignment is preferred over ALT.
    pub max_score_gap_to_prefer_non_alt_alignment: u32,
    /// Compare secondary results by their unadjusted locations.
    pub ignore_alignment_adjustments_for_om: bool,
    /// Cap on secondary alignments reported per contig (-1 = unlimited).
    pub max_secondary_alignments_per_contig: i32,

    // Affine-gap scoring weights.
    pub match_reward: u32,
    pub sub_penalty: u32,
    pub gap_open_penalty: u32,
    pub gap_extend_penalty: u32,
    /// Bonus for extending an alignment all the way to the 5' end of the read.
    pub five_prime_end_bonus: u32,
    /// Bonus for extending an alignment all the way to the 3' end of the read.
    pub three_prime_end_bonus: u32,

    pub disabled_optimizations: DisabledOptimizations,
    /// Ingest the first maxHitsToConsider hits of popular seeds instead of
    /// skipping them.
    pub explore_popular_seeds: bool,
    /// Accept the first location scoring within maxK and stop searching.
    pub stop_on_first_hit: bool,
    /// Prefetch candidate hash buckets ahead of use.
    pub enable_prefetch: bool,
}

impl Default for AlignerOptions {
    fn default() -> AlignerOptions {
        AlignerOptions {
            max_hits_to_consider: 300,
            max_k: 14,
            max_read_size: 400,
            max_seeds_to_use: 25,
            max_seed_coverage: 0.0,
            min_weight_to_check: 1,
            extra_search_depth: 2,
            seed_len: 20,
            use_affine_gap: false,
            alt_awareness: true,
            emit_alt_alignments: false,
            max_score_gap_to_prefer_non_alt_alignment: 3,
            ignore_alignment_adjustments_for_om: false,
            max_secondary_alignments_per_contig: -1,
            match_reward: 1,
            sub_penalty: 4,
            gap_open_penalty: 6,
            gap_extend_penalty: 1,
            five_prime_end_bonus: 10,
            three_prime_end_bonus: 5,
            disabled_optimizations: DisabledOptimizations::default(),
            explore_popular_seeds: false,
            stop_on_first_hit: false,
            enable_prefetch: true,
        }
    }
}

/// Errors detectable at aligner construction time. Invalid *reads* are not
/// errors; they come back as NotFound with a counter bumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Both max_seeds_to_use and max_seed_coverage are zero.
    NoSeedBudget,
    /// seed_len outside the packable 16..=31 range.
    SeedLengthOutOfRange(usize),
    /// seed_len does not fit in max_read_size.
    SeedLongerThanMaxRead { seed_len: usize, max_read_size: usize },
    /// max_k must be positive and below the unused-score sentinel.
    InvalidMaxK(u32),
    /// The seed index was built with a different seed length.
    SeedLengthMismatch { options: usize, index: usize },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::NoSeedBudget => {
                write!(f, "one of max_seeds_to_use or max_seed_coverage must be nonzero")
            }
            ConfigurationError::SeedLengthOutOfRange(len) => {
                write!(f, "seed length {} is outside the supported range 16..=31", len)
            }
            ConfigurationError::SeedLongerThanMaxRead { seed_len, max_read_size } => {
                write!(
                    f,
                    "seed length {} exceeds the maximum read size {}",
                    seed_len, max_read_size
                )
            }
            ConfigurationError::InvalidMaxK(k) => write!(f, "invalid max_k {}", k),
            ConfigurationError::SeedLengthMismatch { options, index } => {
                write!(
                    f,
                    "options specify seed length {} but the index was built with {}",
                    options, index
                )
            }
        }
    }
}

impl Error for ConfigurationError {}

impl AlignerOptions {
    /// Check the cross-field constraints that cannot be expressed per field.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_seeds_to_use == 0 && self.max_seed_coverage <= 0.0 {
            return Err(ConfigurationError::NoSeedBudget);
        }
        if self.seed_len < 16 || self.seed_len > 31 {
            return Err(ConfigurationError::SeedLengthOutOfRange(self.seed_len));
        }
        if self.seed_len > self.max_read_size {
            return Err(ConfigurationError::SeedLongerThanMaxRead {
                seed_len: self.seed_len,
                max_read_size: self.max_read_size,
            });
        }
        if self.max_k == 0 || self.max_k >= crate::candidates::UNUSED_SCORE_VALUE {
            return Err(ConfigurationError::InvalidMaxK(self.max_k));
        }
        Ok(())
    }

    /// Seed budget for a read of the given length.
    pub fn effective_max_seeds(&self, read_len: usize) -> u32 {
        if self.max_seeds_to_use > 0 {
            self.max_seeds_to_use
        } else {
            let per_pass = (read_len / self.seed_len).max(1) as f64;
            (per_pass * self.max_seed_coverage).ceil().max(1.0) as u32
        }
    }

    /// Upper bound on seeds any read could use, for sizing scratch at
    /// construction time.
    pub fn max_seeds_bound(&self) -> u32 {
        self.effective_max_seeds(self.max_read_size)
    }
}
