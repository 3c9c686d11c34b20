// osprey-align/src/sam.rs
//
// Minimal SAM output: header from the contig table, one record per result.
// The CIGAR is recovered by re-running the unit-cost scorer with traceback
// at the final location; this is off the hot path, so clarity wins.

use crate::edit_distance::EditDistanceScorer;
use crate::genome::Genome;
use crate::read::{reverse_complement, Read};
use crate::result::{Direction, SingleAlignmentResult};
use std::fmt::Write as FmtWrite;
use std::io::{self, Write};

pub mod sam_flags {
    pub const UNMAPPED: u16 = 0x4;
    pub const REVERSE: u16 = 0x10;
    pub const SECONDARY: u16 = 0x100;
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Write @HD / @SQ / @PG lines.
pub fn write_header<W: Write>(
    writer: &mut W,
    genome: &Genome,
    command_line: &str,
) -> io::Result<()> {
    writeln!(writer, "@HD\tVN:1.6\tSO:unknown")?;
    for contig in genome.contigs() {
        writeln!(writer, "@SQ\tSN:{}\tLN:{}", contig.name, contig.length)?;
    }
    writeln!(
        writer,
        "@PG\tID:osprey-align\tPN:osprey-align\tVN:{}\tCL:{}",
        env!("CARGO_PKG_VERSION"),
        command_line
    )?;
    Ok(())
}

/// Format one alignment record. `cigar_scorer` supplies the traceback; it is
/// any edit-distance scorer with a large enough limit (maxK plus the search
/// depth is always enough for a reported alignment).
pub fn format_record(
    read: &Read,
    result: &SingleAlignmentResult,
    genome: &Genome,
    cigar_scorer: &mut EditDistanceScorer,
    cigar_limit: u32,
    secondary: bool,
) -> String {
    let mut line = String::with_capacity(read.len() * 2 + 96);

    if !result.is_mapped() {
        let qual: String = read.qualities().iter().map(|&q| (q + 33) as char).collect();
        let _ = write!(
            line,
            "{}\t{}\t*\t0\t0\t*\t*\t0\t0\t{}\t{}",
            read.id(),
            sam_flags::UNMAPPED,
            String::from_utf8_lossy(read.bases()),
            qual
        );
        return line;
    }

    let mut flag: u16 = 0;
    if result.direction == Direction::Rc {
        flag |= sam_flags::REVERSE;
    }
    if secondary {
        flag |= sam_flags::SECONDARY;
    }
    if result.supplementary {
        flag |= sam_flags::SUPPLEMENTARY;
    }

    let (rname, pos) = match genome.get_contig_at_location(result.location) {
        Some(c) => (c.name.as_str(), result.location - c.beginning_location + 1),
        None => ("*", 0),
    };

    // Orient the read the way it aligned.
    let (seq, quals): (Vec<u8>, Vec<u8>) = match result.direction {
        Direction::Forward => (read.bases().to_vec(), read.qualities().to_vec()),
        Direction::Rc => (
            reverse_complement(read.bases()),
            read.qualities().iter().rev().copied().collect(),
        ),
    };

    let clip_before = result.bases_clipped_before as usize;
    let clip_after = result.bases_clipped_after as usize;
    let aligned_len = seq.len().saturating_sub(clip_before + clip_after);
    let cigar = build_cigar(
        genome,
        result,
        &seq,
        &quals,
        clip_before,
        aligned_len,
        cigar_scorer,
        cigar_limit,
    );

    let qual_string: String = quals.iter().map(|&q| (q + 33) as char).collect();
    let _ = write!(
        line,
        "{}\t{}\t{}\t{}\t{}\t{}\t*\t0\t0\t{}\t{}\tNM:i:{}\tAS:i:{}",
        read.id(),
        flag,
        rname,
        pos,
        result.mapq,
        cigar,
        String::from_utf8_lossy(&seq),
        qual_string,
        result.score,
        result.ag_score,
    );
    line
}

#[allow(clippy::too_many_arguments)]
fn build_cigar(
    genome: &Genome,
    result: &SingleAlignmentResult,
    seq: &[u8],
    quals: &[u8],
    clip_before: usize,
    aligned_len: usize,
    cigar_scorer: &mut EditDistanceScorer,
    cigar_limit: u32,
) -> String {
    let mut cigar = String::new();
    if clip_before > 0 {
        let _ = write!(cigar, "{}S", clip_before);
    }

    let aligned = &seq[clip_before..clip_before + aligned_len];
    let aligned_quals = &quals[clip_before..clip_before + aligned_len];
    let mut ops: Vec<(u8, u32)> = Vec::new();
    let traced = genome
        .get_substring(result.location, aligned_len + cigar_limit as usize + 1)
        .and_then(|text| {
            cigar_scorer
                .compute_with_cigar(text, aligned, aligned_quals, cigar_limit, &mut ops)
                .map(|_| ())
        })
        .is_some();
    if traced {
        for (op, len) in &ops {
            let _ = write!(cigar, "{}{}", len, *op as char);
        }
    } else {
        // Fall back to a plain match run; the NM tag still carries the score.
        let _ = write!(cigar, "{}M", aligned_len);
    }

    let clip_after = seq.len() - clip_before - aligned_len;
    if clip_after > 0 {
        let _ = write!(cigar, "{}S", clip_after);
    }
    cigar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AlignmentStatus;

    fn genome() -> Genome {
        Genome::from_contigs(
            vec![("chr1", b"ACGTACGTACGTACGTACGTACGTACGT".to_vec(), false)],
            16,
        )
    }

    #[test]
    fn test_header_lists_contigs() {
        let g = genome();
        let mut out = Vec::new();
        write_header(&mut out, &g, "osprey-align align ref.fa reads.fq").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("@HD\t"));
        assert!(text.contains("@SQ\tSN:chr1\tLN:28"));
        assert!(text.contains("@PG\tID:osprey-align"));
    }

    #[test]
    fn test_unmapped_record() {
        let g = genome();
        let read = Read::new("r1", b"ACGTACGT", &[30; 8]);
        let result = SingleAlignmentResult::unmapped();
        let mut lv = EditDistanceScorer::new(16);
        let line = format_record(&read, &result, &g, &mut lv, 16, false);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[1], "4");
        assert_eq!(fields[2], "*");
        assert_eq!(fields[5], "*");
    }

    #[test]
    fn test_mapped_record_coordinates() {
        let g = genome();
        let read = Read::new("r1", b"ACGTACGT", &[30; 8]);
        let mut result = SingleAlignmentResult::unmapped();
        result.status = AlignmentStatus::SingleHit;
        result.location = 16; // first base of chr1
        result.direction = Direction::Forward;
        result.mapq = 70;
        let mut lv = EditDistanceScorer::new(16);
        let line = format_record(&read, &result, &g, &mut lv, 16, false);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[2], "chr1");
        assert_eq!(fields[3], "1"); // 1-based
        assert_eq!(fields[4], "70");
        assert_eq!(fields[5], "8M");
        assert_eq!(fields[9], "ACGTACGT");
    }

    #[test]
    fn test_rc_record_is_reverse_complemented() {
        let g = genome();
        let read = Read::new("r1", b"TACGTACG", &[30; 8]);
        let mut result = SingleAlignmentResult::unmapped();
        result.status = AlignmentStatus::SingleHit;
        result.location = 17;
        result.direction = Direction::Rc;
        let mut lv = EditDistanceScorer::new(16);
        let line = format_record(&read, &result, &g, &mut lv, 16, true);
        let fields: Vec<&str> = line.split('\t').collect();
        let flag: u16 = fields[1].parse().unwrap();
        assert!(flag & sam_flags::REVERSE != 0);
        assert!(flag & sam_flags::SECONDARY != 0);
        assert_eq!(fields[9], "CGTACGTA"); // reverse complement of the read
    }

    #[test]
    fn test_soft_clips_in_cigar() {
        let g = genome();
        let read = Read::new("r1", b"TTACGTACGT", &[30; 10]);
        let mut result = SingleAlignmentResult::unmapped();
        result.status = AlignmentStatus::SingleHit;
        result.location = 16;
        result.direction = Direction::Forward;
        result.bases_clipped_before = 2;
        let mut lv = EditDistanceScorer::new(16);
        let line = format_record(&read, &result, &g, &mut lv, 16, false);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[5], "2S8M");
    }
}
