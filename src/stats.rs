// osprey-align/src/stats.rs
//
// Per-aligner statistics counters. Each worker owns one set; the driver
// merges them after the batch.

#[derive(Debug, Default, Clone)]
pub struct AlignerStats {
    /// Candidate hash table probes.
    pub hash_table_lookups: u64,
    /// Locations scored by the unit-cost (edit distance) back-end.
    pub locations_scored_edit_distance: u64,
    /// Locations scored by the affine-gap back-end.
    pub locations_scored_affine_gap: u64,
    /// Hits skipped because their seed exceeded maxHitsToConsider.
    pub hits_ignored_popular_seeds: u64,
    /// Reads rejected for N content or excessive length.
    pub reads_ignored: u64,
    /// Hits that coalesced into an existing element at a shifted offset.
    pub indels_merged: u64,
}

impl AlignerStats {
    pub fn new() -> AlignerStats {
        AlignerStats::default()
    }

    pub fn merge(&mut self, other: &AlignerStats) {
        self.hash_table_lookups += other.hash_table_lookups;
        self.locations_scored_edit_distance += other.locations_scored_edit_distance;
        self.locations_scored_affine_gap += other.locations_scored_affine_gap;
        self.hits_ignored_popular_seeds += other.hits_ignored_popular_seeds;
        self.reads_ignored += other.reads_ignored;
        self.indels_merged += other.indels_merged;
    }

    pub fn log_summary(&self) {
        log::info!("Hash table lookups: {}", self.hash_table_lookups);
        log::info!(
            "Locations scored: {} edit-distance, {} affine-gap",
            self.locations_scored_edit_distance,
            self.locations_scored_affine_gap
        );
        log::info!(
            "Hits ignored for popularity: {}, reads ignored: {}, indels merged: {}",
            self.hits_ignored_popular_seeds,
            self.reads_ignored,
            self.indels_merged
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_counters() {
        let mut a = AlignerStats::new();
        a.hash_table_lookups = 10;
        a.indels_merged = 1;
        let mut b = AlignerStats::new();
        b.hash_table_lookups = 5;
        b.reads_ignored = 2;
        a.merge(&b);
        assert_eq!(a.hash_table_lookups, 15);
        assert_eq!(a.reads_ignored, 2);
        assert_eq!(a.indels_merged, 1);
    }
}
