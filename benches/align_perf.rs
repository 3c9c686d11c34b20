// benches/align_perf.rs
// Criterion benchmarks for the alignment engine: clean reads, mismatched
// reads, and the affine-gap rescoring path.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use osprey_align::aligner::BaseAligner;
use osprey_align::genome::Genome;
use osprey_align::options::AlignerOptions;
use osprey_align::read::Read;
use osprey_align::result::SingleAlignmentResult;
use osprey_align::seed_index::SeedIndex;

const GENOME_LEN: usize = 1_000_000;
const READ_LEN: usize = 150;

fn random_bases(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
    (0..len).map(|_| BASES[rng.gen_range(0..4)]).collect()
}

fn make_reads(bases: &[u8], n: usize, errors: usize, seed: u64) -> Vec<Read> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let start = rng.gen_range(0..bases.len() - READ_LEN);
            let mut read_bases = bases[start..start + READ_LEN].to_vec();
            for _ in 0..errors {
                let pos = rng.gen_range(0..READ_LEN);
                read_bases[pos] = match read_bases[pos] {
                    b'A' => b'C',
                    b'C' => b'G',
                    b'G' => b'T',
                    _ => b'A',
                };
            }
            Read::new(format!("r{}", i), &read_bases, &vec![35u8; READ_LEN])
        })
        .collect()
}

fn bench_align(c: &mut Criterion) {
    let bases = random_bases(GENOME_LEN, 0xB16B00B5);
    let genome = Genome::from_contigs(vec![("chr1", bases.clone(), false)], 512);
    let index = SeedIndex::build(&genome, 20).unwrap();

    let mut group = c.benchmark_group("align_read");
    group.throughput(Throughput::Elements(1));

    for (name, errors, affine) in [
        ("clean", 0usize, false),
        ("two_errors", 2, false),
        ("two_errors_affine", 2, true),
    ] {
        let reads = make_reads(&bases, 256, errors, 7);
        let mut options = AlignerOptions::default();
        options.use_affine_gap = affine;
        let mut aligner = BaseAligner::new(&genome, &index, options.clone()).unwrap();

        let mut primary = SingleAlignmentResult::unmapped();
        let mut first_alt = SingleAlignmentResult::unmapped();
        let mut secondary = Vec::new();
        let mut deferred = Vec::new();
        let mut i = 0usize;

        group.bench_function(name, |b| {
            b.iter(|| {
                let read = &reads[i % reads.len()];
                i += 1;
                aligner.align_read(
                    black_box(read),
                    &mut primary,
                    &mut first_alt,
                    2,
                    32,
                    8,
                    &mut secondary,
                    32,
                    &mut deferred,
                    false,
                );
                if options.use_affine_gap && !deferred.is_empty() {
                    aligner.align_affine_gap(read, &mut primary, &mut first_alt, &mut deferred);
                }
                black_box(primary.score)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_align);
criterion_main!(benches);
