// osprey-align/src/adjuster.rs
//
// Post-processing of a raw alignment before it is reported: clamp results
// whose span falls outside their contig, and convert leading or trailing
// reference overhang into soft clip rather than letting the alignment hang
// into padding.

use crate::genome::Genome;
use crate::read::Read;
use crate::result::SingleAlignmentResult;

/// Fix up `result` in place. A result whose aligned span cannot be placed
/// inside a single contig is demoted to NotFound; one that merely pokes into
/// padding at either end gets the overhang clipped.
pub fn adjust_alignment(genome: &Genome, read: &Read, result: &mut SingleAlignmentResult) {
    if !result.is_mapped() {
        return;
    }

    let contig = match genome.get_contig_at_location(result.location) {
        Some(c) => c,
        None => {
            *result = SingleAlignmentResult::unmapped();
            return;
        }
    };

    let aligned_bases = (read.len() as u32)
        .saturating_sub(result.bases_clipped_before)
        .saturating_sub(result.bases_clipped_after) as u64;
    let contig_end = contig.beginning_location + contig.length;

    if result.location + aligned_bases > contig_end {
        // Clip the tail overhang instead of reporting bases against padding.
        let overhang = (result.location + aligned_bases - contig_end) as u32;
        if overhang as u64 >= aligned_bases {
            *result = SingleAlignmentResult::unmapped();
            return;
        }
        result.score_prior_to_clipping = result.score;
        result.bases_clipped_after += overhang;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use crate::result::{AlignmentStatus, Direction};

    fn genome() -> Genome {
        Genome::from_contigs(vec![("chr1", vec![b'A'; 100], false)], 32)
    }

    fn mapped_at(location: u64) -> SingleAlignmentResult {
        let mut r = SingleAlignmentResult::unmapped();
        r.status = AlignmentStatus::SingleHit;
        r.location = location;
        r.direction = Direction::Forward;
        r
    }

    #[test]
    fn test_in_contig_untouched() {
        let g = genome();
        let read = Read::new("r", &[b'A'; 50], &[]);
        let mut r = mapped_at(40);
        adjust_alignment(&g, &read, &mut r);
        assert!(r.is_mapped());
        assert_eq!(r.bases_clipped_after, 0);
    }

    #[test]
    fn test_padding_location_dropped() {
        let g = genome();
        let read = Read::new("r", &[b'A'; 50], &[]);
        let mut r = mapped_at(5); // inside the leading padding
        adjust_alignment(&g, &read, &mut r);
        assert!(!r.is_mapped());
    }

    #[test]
    fn test_tail_overhang_clipped() {
        let g = genome();
        let read = Read::new("r", &[b'A'; 50], &[]);
        // Contig spans 32..132; an alignment at 100 of 50 bases overhangs 18.
        let mut r = mapped_at(100);
        adjust_alignment(&g, &read, &mut r);
        assert!(r.is_mapped());
        assert_eq!(r.bases_clipped_after, 18);
    }

    #[test]
    fn test_full_overhang_dropped() {
        let g = genome();
        let read = Read::new("r", &[b'A'; 50], &[]);
        let mut r = mapped_at(131);
        r.bases_clipped_before = 49;
        adjust_alignment(&g, &read, &mut r);
        // One aligned base at the last contig position survives.
        assert!(r.is_mapped());
        let mut r2 = mapped_at(131);
        r2.bases_clipped_before = 0;
        adjust_alignment(&g, &read, &mut r2);
        assert!(r2.is_mapped());
        assert_eq!(r2.bases_clipped_after, 49);
    }
}
