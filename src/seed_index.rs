// osprey-align/src/seed_index.rs
//
// Precomputed k-mer index over the reference. Maps each 2-bit-packed seed to
// the sorted list of genome locations where it occurs; a lookup returns both
// the seed's own hit list and the hit list of its reverse complement, which
// is where the read's reverse complement would align.

use crate::genome::Genome;
use crate::options::ConfigurationError;
use crate::read::base_to_code;
use crate::result::GenomeLocation;
use rustc_hash::FxHashMap;

static NO_HITS: [GenomeLocation; 0] = [];

/// Hit lists for one seed lookup.
#[derive(Debug, Clone, Copy)]
pub struct SeedHits<'a> {
    /// Locations of the seed itself.
    pub forward: &'a [GenomeLocation],
    /// Locations of the seed's reverse complement.
    pub rc: &'a [GenomeLocation],
}

impl<'a> SeedHits<'a> {
    #[inline]
    pub fn total(&self) -> usize {
        self.forward.len() + self.rc.len()
    }
}

/// Pack a seed into 2 bits per base. None when the window contains anything
/// other than A/C/G/T.
pub fn pack_seed(bases: &[u8]) -> Option<u64> {
    debug_assert!(bases.len() <= 31);
    let mut packed: u64 = 0;
    for &b in bases {
        let code = base_to_code(b);
        if code > 3 {
            return None;
        }
        packed = (packed << 2) | code as u64;
    }
    Some(packed)
}

/// Reverse complement of a packed seed.
pub fn reverse_complement_packed(packed: u64, seed_len: usize) -> u64 {
    let mut rc: u64 = 0;
    let mut p = packed;
    for _ in 0..seed_len {
        rc = (rc << 2) | (3 - (p & 3));
        p >>= 2;
    }
    rc
}

/// The k-mer hash table. Built once from the genome and shared read-only by
/// every aligner.
pub struct SeedIndex {
    seed_len: usize,
    table: FxHashMap<u64, Vec<GenomeLocation>>,
}

impl SeedIndex {
    /// Index every position of the genome whose seed window is N-free.
    pub fn build(genome: &Genome, seed_len: usize) -> Result<SeedIndex, ConfigurationError> {
        if !(16..=31).contains(&seed_len) {
            return Err(ConfigurationError::SeedLengthOutOfRange(seed_len));
        }

        let mut table: FxHashMap<u64, Vec<GenomeLocation>> = FxHashMap::default();
        let genome_len = genome.len() as usize;
        if genome_len < seed_len {
            return Ok(SeedIndex { seed_len, table });
        }

        let bases = genome
            .get_substring(0, genome_len)
            .expect("genome substring covering the whole genome");
        let mask = (1u64 << (2 * seed_len)) - 1;
        let mut packed: u64 = 0;
        // Number of trailing N-free bases accumulated in `packed`.
        let mut valid: usize = 0;
        for (pos, &b) in bases.iter().enumerate() {
            let code = base_to_code(b);
            if code > 3 {
                valid = 0;
                packed = 0;
                continue;
            }
            packed = ((packed << 2) | code as u64) & mask;
            valid += 1;
            if valid >= seed_len {
                let location = (pos + 1 - seed_len) as GenomeLocation;
                table.entry(packed).or_default().push(location);
            }
        }

        log::info!(
            "Seed index built: {} distinct {}-mers over {} bases",
            table.len(),
            seed_len,
            genome_len
        );
        Ok(SeedIndex { seed_len, table })
    }

    #[inline]
    pub fn seed_len(&self) -> usize {
        self.seed_len
    }

    /// Hit lists for the seed at `bases` (exactly seed_len long). A window
    /// containing N gets empty lists; callers reject those before lookup.
    pub fn lookup(&self, bases: &[u8]) -> SeedHits<'_> {
        debug_assert_eq!(bases.len(), self.seed_len);
        let packed = match pack_seed(bases) {
            Some(p) => p,
            None => {
                return SeedHits {
                    forward: &NO_HITS,
                    rc: &NO_HITS,
                }
            }
        };
        let rc = reverse_complement_packed(packed, self.seed_len);
        SeedHits {
            forward: self.hits_for(packed),
            rc: self.hits_for(rc),
        }
    }

    #[inline]
    fn hits_for(&self, packed: u64) -> &[GenomeLocation] {
        self.table.get(&packed).map(|v| v.as_slice()).unwrap_or(&NO_HITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::reverse_complement;

    #[test]
    fn test_pack_seed_rejects_n() {
        assert!(pack_seed(b"ACGTACGTACGTACGTACGT").is_some());
        assert!(pack_seed(b"ACGTACGTNCGTACGTACGT").is_none());
    }

    #[test]
    fn test_reverse_complement_packed_matches_ascii() {
        let seed = b"ACGTTTGCACGTAAGCTAGC";
        let packed = pack_seed(seed).unwrap();
        let rc_ascii = reverse_complement(seed);
        let rc_packed = pack_seed(&rc_ascii).unwrap();
        assert_eq!(reverse_complement_packed(packed, seed.len()), rc_packed);
        // An involution.
        assert_eq!(
            reverse_complement_packed(rc_packed, seed.len()),
            packed
        );
    }

    #[test]
    fn test_build_and_lookup() {
        // One contig, no padding complications inside it.
        let seq = b"ACGTACGGTTACGTACGGTTAAACCCGGGTTTACGT".to_vec();
        let genome = Genome::from_contigs(vec![("c", seq.clone(), false)], 32);
        let index = SeedIndex::build(&genome, 20).unwrap();

        let seed = &seq[0..20];
        let hits = index.lookup(seed);
        // The first 20-mer occurs at contig offsets 0; location includes padding.
        assert_eq!(hits.forward, &[32]);

        // Looking up its reverse complement flips the lists.
        let rc = reverse_complement(seed);
        let rc_hits = index.lookup(&rc);
        assert_eq!(rc_hits.rc, &[32]);
        assert_eq!(rc_hits.forward.len(), 0);
    }

    #[test]
    fn test_n_windows_not_indexed() {
        let mut seq = b"ACGTACGGTTACGTACGGTT".to_vec();
        seq[10] = b'N';
        let genome = Genome::from_contigs(vec![("c", seq, false)], 32);
        let index = SeedIndex::build(&genome, 20).unwrap();
        let hits = index.lookup(b"ACGTACGGTTACGTACGGTT");
        assert_eq!(hits.total(), 0);
    }

    #[test]
    fn test_seed_len_validation() {
        let genome = Genome::from_contigs(vec![("c", b"ACGT".to_vec(), false)], 4);
        assert!(SeedIndex::build(&genome, 8).is_err());
        assert!(SeedIndex::build(&genome, 20).is_ok());
    }
}
