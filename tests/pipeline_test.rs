// End-to-end pipeline test: FASTA reference in, FASTQ reads in, SAM out.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;

use osprey_align::genome::Genome;
use osprey_align::options::AlignerOptions;
use osprey_align::sam;
use osprey_align::seed_index::SeedIndex;
use osprey_align::single_end::{process_single_end, DriverOptions};

fn random_bases(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
    (0..len).map(|_| BASES[rng.gen_range(0..4)]).collect()
}

#[test]
fn test_fasta_to_sam_pipeline() {
    let bases = random_bases(5_000, 99);

    // Reference on disk.
    let mut fasta = tempfile::Builder::new().suffix(".fa").tempfile().unwrap();
    writeln!(fasta, ">chr1 test contig").unwrap();
    for chunk in bases.chunks(70) {
        fasta.write_all(chunk).unwrap();
        writeln!(fasta).unwrap();
    }
    fasta.flush().unwrap();

    // Two mappable reads and one garbage read.
    let mut fastq = tempfile::Builder::new().suffix(".fq").tempfile().unwrap();
    let q = "I".repeat(100);
    writeln!(
        fastq,
        "@read1\n{}\n+\n{}",
        String::from_utf8_lossy(&bases[1000..1100]),
        q
    )
    .unwrap();
    writeln!(
        fastq,
        "@read2\n{}\n+\n{}",
        String::from_utf8_lossy(&bases[3000..3100]),
        q
    )
    .unwrap();
    writeln!(fastq, "@junk\n{}\n+\n{}", "N".repeat(100), q).unwrap();
    fastq.flush().unwrap();

    let genome = Genome::from_fasta(fasta.path(), 512, &Default::default()).unwrap();
    assert_eq!(genome.contigs().len(), 1);
    assert_eq!(genome.contigs()[0].length, 5_000);

    let index = SeedIndex::build(&genome, 20).unwrap();
    let options = AlignerOptions::default();
    let driver = DriverOptions::default();

    let mut out = Vec::new();
    sam::write_header(&mut out, &genome, "test").unwrap();
    let stats = process_single_end(
        &genome,
        &index,
        &options,
        &driver,
        &[fastq.path().to_string_lossy().to_string()],
        &mut out,
    );

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.iter().any(|l| l.starts_with("@SQ\tSN:chr1\tLN:5000")));

    let records: Vec<&str> = lines.iter().copied().filter(|l| !l.starts_with('@')).collect();
    assert_eq!(records.len(), 3);

    let r1: Vec<&str> = records[0].split('\t').collect();
    assert_eq!(r1[0], "read1");
    assert_eq!(r1[2], "chr1");
    assert_eq!(r1[3], "1001"); // 1-based contig coordinate
    assert_eq!(r1[5], "100M");
    assert!(records[0].contains("NM:i:0"));

    let r2: Vec<&str> = records[1].split('\t').collect();
    assert_eq!(r2[3], "3001");

    let junk: Vec<&str> = records[2].split('\t').collect();
    assert_eq!(junk[0], "junk");
    assert_eq!(junk[1], "4"); // unmapped
    assert_eq!(junk[2], "*");

    assert_eq!(stats.reads_ignored, 1);
    assert!(stats.locations_scored_edit_distance > 0);
}
