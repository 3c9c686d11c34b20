// osprey-align/src/read.rs
//
// Read representation and DNA base helpers. Bases are kept as ASCII
// A/C/G/T/N (uppercased on ingest); qualities are numeric phred values,
// converted from phred+33 at the I/O boundary.

/// Complement of an ASCII base; N and anything unrecognized map to N.
#[inline]
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

/// 2-bit code for an ASCII base; N and anything else map to 4.
#[inline]
pub fn base_to_code(base: u8) -> u8 {
    match base {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 4,
    }
}

/// Reverse complement into a caller-supplied buffer, avoiding allocation on
/// the per-read path.
pub fn reverse_complement_into(bases: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.extend(bases.iter().rev().map(|&b| complement(b)));
}

/// Allocating reverse complement, for tests and one-off callers.
pub fn reverse_complement(bases: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bases.len());
    reverse_complement_into(bases, &mut out);
    out
}

/// A single read: id, bases, numeric qualities, and any clipping the reader
/// asked us to carry through to the result.
#[derive(Debug, Clone)]
pub struct Read {
    id: String,
    bases: Vec<u8>,
    qualities: Vec<u8>,
    front_clipping: u32,
    back_clipping: u32,
}

impl Read {
    /// Build a read from ASCII bases and numeric phred qualities. Bases are
    /// uppercased; a missing or short quality string is padded with a
    /// conservative default.
    pub fn new(id: impl Into<String>, bases: &[u8], qualities: &[u8]) -> Read {
        const DEFAULT_QUALITY: u8 = 20;
        let bases: Vec<u8> = bases.iter().map(|b| b.to_ascii_uppercase()).collect();
        let mut qualities = qualities.to_vec();
        qualities.resize(bases.len(), DEFAULT_QUALITY);
        Read {
            id: id.into(),
            bases,
            qualities,
            front_clipping: 0,
            back_clipping: 0,
        }
    }

    /// Build a read from a phred+33 quality string, as read from FASTQ.
    pub fn from_fastq(id: impl Into<String>, bases: &[u8], quality_string: &[u8]) -> Read {
        let qualities: Vec<u8> = quality_string.iter().map(|&q| q.saturating_sub(33)).collect();
        Read::new(id, bases, &qualities)
    }

    pub fn set_clipping(&mut self, front: u32, back: u32) {
        self.front_clipping = front;
        self.back_clipping = back;
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    #[inline]
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    #[inline]
    pub fn qualities(&self) -> &[u8] {
        &self.qualities
    }

    #[inline]
    pub fn front_clipping(&self) -> u32 {
        self.front_clipping
    }

    #[inline]
    pub fn back_clipping(&self) -> u32 {
        self.back_clipping
    }

    pub fn count_of_n(&self) -> usize {
        self.bases.iter().filter(|&&b| b == b'N').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complement() {
        assert_eq!(complement(b'A'), b'T');
        assert_eq!(complement(b'C'), b'G');
        assert_eq!(complement(b'G'), b'C');
        assert_eq!(complement(b'T'), b'A');
        assert_eq!(complement(b'N'), b'N');
        assert_eq!(complement(b'x'), b'N');
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(reverse_complement(b"AACN"), b"NGTT".to_vec());
        assert_eq!(reverse_complement(b""), Vec::<u8>::new());
    }

    #[test]
    fn test_base_to_code() {
        assert_eq!(base_to_code(b'A'), 0);
        assert_eq!(base_to_code(b'c'), 1);
        assert_eq!(base_to_code(b'G'), 2);
        assert_eq!(base_to_code(b't'), 3);
        assert_eq!(base_to_code(b'N'), 4);
        assert_eq!(base_to_code(b'@'), 4);
    }

    #[test]
    fn test_read_uppercases_and_pads_quality() {
        let read = Read::new("r1", b"acgtn", &[30, 30]);
        assert_eq!(read.bases(), b"ACGTN");
        assert_eq!(read.qualities(), &[30, 30, 20, 20, 20]);
        assert_eq!(read.count_of_n(), 1);
    }

    #[test]
    fn test_from_fastq_quality_conversion() {
        // 'I' is phred+33 for q40, '!' for q0.
        let read = Read::from_fastq("r1", b"AC", b"I!");
        assert_eq!(read.qualities(), &[40, 0]);
    }
}
