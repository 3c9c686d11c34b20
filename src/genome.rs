// osprey-align/src/genome.rs
//
// Read-only view of the reference: the concatenated, padded genome plus
// contig metadata. Contigs are separated (and the genome bracketed) by runs
// of N so that scorer windows running off a contig read N and mismatch
// instead of faulting or matching a neighbour.

use crate::result::GenomeLocation;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

pub const DEFAULT_CHROMOSOME_PADDING: u64 = 512;

/// A named contiguous region of the reference.
#[derive(Debug, Clone)]
pub struct Contig {
    pub name: String,
    /// Offset of the contig's first base in the concatenated genome.
    pub beginning_location: GenomeLocation,
    pub length: u64,
    /// Alternate-haplotype contigs are flagged so the aligner can prefer
    /// primary-assembly placements.
    pub is_alt: bool,
}

impl Contig {
    #[inline]
    pub fn contains(&self, location: GenomeLocation) -> bool {
        location >= self.beginning_location && location < self.beginning_location + self.length
    }
}

/// The concatenated padded reference and its contig table.
pub struct Genome {
    bases: Vec<u8>,
    contigs: Vec<Contig>,
    chromosome_padding: u64,
}

impl Genome {
    /// Assemble a genome from (name, sequence, is_alt) triples.
    pub fn from_contigs<I, S>(contig_seqs: I, chromosome_padding: u64) -> Genome
    where
        I: IntoIterator<Item = (S, Vec<u8>, bool)>,
        S: Into<String>,
    {
        let mut bases = Vec::new();
        let mut contigs = Vec::new();
        bases.resize(chromosome_padding as usize, b'N');
        for (name, seq, is_alt) in contig_seqs {
            let beginning_location = bases.len() as u64;
            let length = seq.len() as u64;
            bases.extend(seq.iter().map(|b| b.to_ascii_uppercase()));
            bases.resize(bases.len() + chromosome_padding as usize, b'N');
            contigs.push(Contig {
                name: name.into(),
                beginning_location,
                length,
                is_alt,
            });
        }
        Genome {
            bases,
            contigs,
            chromosome_padding,
        }
    }

    /// Load a multi-contig FASTA. A contig is ALT-flagged when its name ends
    /// in `_alt` (case-insensitive) or appears in `alt_names`.
    pub fn from_fasta(
        path: &Path,
        chromosome_padding: u64,
        alt_names: &HashSet<String>,
    ) -> io::Result<Genome> {
        let reader = bio::io::fasta::Reader::new(BufReader::new(File::open(path)?));
        let mut contig_seqs = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let name = record.id().to_string();
            let is_alt =
                name.to_ascii_lowercase().ends_with("_alt") || alt_names.contains(&name);
            contig_seqs.push((name, record.seq().to_vec(), is_alt));
        }
        log::info!(
            "Loaded {} contigs from {}",
            contig_seqs.len(),
            path.display()
        );
        Ok(Genome::from_contigs(contig_seqs, chromosome_padding))
    }

    /// Total length of the padded genome.
    #[inline]
    pub fn len(&self) -> u64 {
        self.bases.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    #[inline]
    pub fn chromosome_padding(&self) -> u64 {
        self.chromosome_padding
    }

    #[inline]
    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    /// Reference bases starting at `location`, clamped to the genome end.
    /// Returns None only when `location` is past the end entirely.
    pub fn get_substring(&self, location: GenomeLocation, len: usize) -> Option<&[u8]> {
        let start = location as usize;
        if start >= self.bases.len() {
            return None;
        }
        let end = (start + len).min(self.bases.len());
        Some(&self.bases[start..end])
    }

    /// The contig containing `location`, or None when it falls in padding.
    pub fn get_contig_at_location(&self, location: GenomeLocation) -> Option<&Contig> {
        // Binary search on beginning_location, then a containment check to
        // reject padding positions.
        let idx = self
            .contigs
            .partition_point(|c| c.beginning_location <= location);
        if idx == 0 {
            return None;
        }
        let contig = &self.contigs[idx - 1];
        if contig.contains(location) {
            Some(contig)
        } else {
            None
        }
    }

    /// Index of the contig containing `location`, for per-contig counters.
    pub fn get_contig_index_at_location(&self, location: GenomeLocation) -> Option<usize> {
        let idx = self
            .contigs
            .partition_point(|c| c.beginning_location <= location);
        if idx == 0 {
            return None;
        }
        if self.contigs[idx - 1].contains(location) {
            Some(idx - 1)
        } else {
            None
        }
    }

    /// Whether `location` falls on an ALT contig.
    #[inline]
    pub fn is_alt_location(&self, location: GenomeLocation) -> bool {
        self.get_contig_at_location(location)
            .map(|c| c.is_alt)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_contig_genome() -> Genome {
        Genome::from_contigs(
            vec![
                ("chr1", b"ACGTACGTAC".to_vec(), false),
                ("chr1_alt", b"TTTTGGGG".to_vec(), true),
            ],
            16,
        )
    }

    #[test]
    fn test_layout_and_padding() {
        let g = two_contig_genome();
        assert_eq!(g.contigs().len(), 2);
        let c0 = &g.contigs()[0];
        let c1 = &g.contigs()[1];
        assert_eq!(c0.beginning_location, 16);
        assert_eq!(c0.length, 10);
        assert_eq!(c1.beginning_location, 16 + 10 + 16);
        assert!(c1.is_alt);
        // Bracketing and separating padding are all N.
        assert_eq!(g.get_substring(0, 16).unwrap(), &[b'N'; 16]);
        assert_eq!(g.get_substring(26, 4).unwrap(), b"NNNN");
    }

    #[test]
    fn test_get_substring() {
        let g = two_contig_genome();
        assert_eq!(g.get_substring(16, 4).unwrap(), b"ACGT");
        // Clamped at the genome end, not an error.
        let tail = g.get_substring(g.len() - 2, 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(g.get_substring(g.len(), 1).is_none());
    }

    #[test]
    fn test_contig_lookup() {
        let g = two_contig_genome();
        assert!(g.get_contig_at_location(0).is_none());
        assert_eq!(g.get_contig_at_location(16).unwrap().name, "chr1");
        assert_eq!(g.get_contig_at_location(25).unwrap().name, "chr1");
        assert!(g.get_contig_at_location(26).is_none()); // padding
        assert_eq!(g.get_contig_at_location(42).unwrap().name, "chr1_alt");
        assert!(g.is_alt_location(42));
        assert!(!g.is_alt_location(16));
        assert!(!g.is_alt_location(5)); // padding is not ALT
    }

    #[test]
    fn test_case_normalisation() {
        let g = Genome::from_contigs(vec![("c", b"acgt".to_vec(), false)], 4);
        assert_eq!(g.get_substring(4, 4).unwrap(), b"ACGT");
    }
}
