// FASTQ reader module using bio::io::fastq
//
// Thin wrapper around bio::io::fastq with:
// - Automatic gzip detection by file extension
// - Batch reading to match the driver's processing pattern
// - Phred+33 quality conversion on ingest, so the engine only ever sees
//   numeric qualities
//
// Note: Parallel gzip decompression is not feasible for standard gzip files
// as they use a single sequential stream. Would require bgzip format.

use crate::read::Read as AlignerRead;
use bio::io::fastq;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};

/// FASTQ reader with automatic gzip detection
pub struct FastqReader {
    records: fastq::Records<std::io::BufReader<Box<dyn Read>>>,
}

impl FastqReader {
    /// Open a FASTQ file (auto-detects gzip by .gz extension)
    pub fn new(path: &str) -> io::Result<FastqReader> {
        let file = File::open(path)?;

        let reader: Box<dyn Read> = if path.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        // Reader::new() internally wraps in BufReader
        let fastq_reader = fastq::Reader::new(reader);

        Ok(FastqReader {
            records: fastq_reader.records(),
        })
    }

    /// Read up to `batch_size` reads; an empty vector means EOF.
    pub fn read_batch(&mut self, batch_size: usize) -> io::Result<Vec<AlignerRead>> {
        let mut batch = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            match self.records.next() {
                Some(Ok(record)) => {
                    batch.push(AlignerRead::from_fastq(
                        record.id(),
                        record.seq(),
                        record.qual(),
                    ));
                }
                Some(Err(e)) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
                None => break, // EOF
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_batch_plain_file() {
        let mut f = tempfile::Builder::new().suffix(".fq").tempfile().unwrap();
        writeln!(f, "@r1\nACGTACGT\n+\nIIIIIIII").unwrap();
        writeln!(f, "@r2\nTTTTAAAA\n+\n!!!!!!!!").unwrap();
        f.flush().unwrap();

        let mut reader = FastqReader::new(f.path().to_str().unwrap()).unwrap();
        let batch = reader.read_batch(10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id(), "r1");
        assert_eq!(batch[0].bases(), b"ACGTACGT");
        assert_eq!(batch[0].qualities(), &[40u8; 8]);
        assert_eq!(batch[1].qualities(), &[0u8; 8]);

        let eof = reader.read_batch(10).unwrap();
        assert!(eof.is_empty());
    }

    #[test]
    fn test_batch_size_respected() {
        let mut f = tempfile::Builder::new().suffix(".fq").tempfile().unwrap();
        for i in 0..5 {
            writeln!(f, "@r{}\nACGT\n+\nIIII", i).unwrap();
        }
        f.flush().unwrap();

        let mut reader = FastqReader::new(f.path().to_str().unwrap()).unwrap();
        assert_eq!(reader.read_batch(3).unwrap().len(), 3);
        assert_eq!(reader.read_batch(3).unwrap().len(), 2);
    }
}
