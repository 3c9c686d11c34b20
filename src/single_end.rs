// Single-end read processing module
//
// This module handles single-end FASTQ file processing, including:
// - Batched read loading
// - Parallel alignment using Rayon, one aligner instance per chunk so the
//   engine itself stays single-owner
// - Sequential SAM output and statistics aggregation

use crate::aligner::BaseAligner;
use crate::edit_distance::EditDistanceScorer;
use crate::fastq_reader::FastqReader;
use crate::genome::Genome;
use crate::options::AlignerOptions;
use crate::read::Read;
use crate::result::SingleAlignmentResult;
use crate::sam;
use crate::seed_index::SeedIndex;
use crate::stats::AlignerStats;
use rayon::prelude::*;
use std::io::Write;
use std::time::Instant;

// Reads per batch handed to the parallel stage.
const BATCH_SIZE: usize = 100_000;
// Reads per worker chunk within a batch.
const CHUNK_SIZE: usize = 512;

/// Knobs of the driver itself (the engine's knobs live in AlignerOptions).
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub max_secondary_results: usize,
    pub max_edit_distance_for_secondary_results: u32,
    pub secondary_result_buffer_size: usize,
    pub report_secondary: bool,
    pub use_hamming: bool,
}

impl Default for DriverOptions {
    fn default() -> DriverOptions {
        DriverOptions {
            max_secondary_results: 10,
            max_edit_distance_for_secondary_results: 2,
            secondary_result_buffer_size: 64,
            report_secondary: false,
            use_hamming: false,
        }
    }
}

/// Align every read of every query file and write SAM records to `writer`.
/// Returns the aggregated statistics.
pub fn process_single_end(
    genome: &Genome,
    seed_index: &SeedIndex,
    options: &AlignerOptions,
    driver: &DriverOptions,
    query_files: &[String],
    writer: &mut dyn Write,
) -> AlignerStats {
    let start_time = Instant::now();
    let mut total_reads = 0usize;
    let mut total_bases = 0usize;
    let mut stats = AlignerStats::new();

    for query_file_name in query_files {
        let mut reader = match FastqReader::new(query_file_name) {
            Ok(r) => r,
            Err(e) => {
                log::error!("Error opening query file {}: {}", query_file_name, e);
                continue;
            }
        };

        loop {
            let batch = match reader.read_batch(BATCH_SIZE) {
                Ok(b) => b,
                Err(e) => {
                    log::error!("Error reading batch from {}: {}", query_file_name, e);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let batch_size = batch.len();
            let batch_bp: usize = batch.iter().map(|r| r.len()).sum();
            total_reads += batch_size;
            total_bases += batch_bp;
            log::info!("Read {} sequences ({} bp)", batch_size, batch_bp);

            let chunk_results: Vec<(Vec<String>, AlignerStats)> = batch
                .par_chunks(CHUNK_SIZE)
                .map(|chunk| align_chunk(genome, seed_index, options, driver, chunk))
                .collect();

            for (lines, chunk_stats) in chunk_results {
                stats.merge(&chunk_stats);
                for line in lines {
                    if let Err(e) = writeln!(writer, "{}", line) {
                        log::error!("Error writing SAM record: {}", e);
                    }
                }
            }

            if batch_size < BATCH_SIZE {
                break;
            }
        }
    }

    let elapsed = start_time.elapsed();
    log::info!(
        "Processed {} reads ({} bp) in {:.2} sec",
        total_reads,
        total_bases,
        elapsed.as_secs_f64()
    );
    stats.log_summary();
    stats
}

/// Align one chunk with a worker-local aligner and format the SAM lines.
fn align_chunk(
    genome: &Genome,
    seed_index: &SeedIndex,
    options: &AlignerOptions,
    driver: &DriverOptions,
    chunk: &[Read],
) -> (Vec<String>, AlignerStats) {
    // The configuration was validated before the run started.
    let mut aligner = BaseAligner::new(genome, seed_index, options.clone())
        .expect("aligner options validated at startup");
    let cigar_limit = options.max_k + options.extra_search_depth;
    let mut cigar_scorer = EditDistanceScorer::new(cigar_limit);

    let mut primary = SingleAlignmentResult::unmapped();
    let mut first_alt = SingleAlignmentResult::unmapped();
    let mut secondary: Vec<SingleAlignmentResult> = Vec::new();
    let mut deferred: Vec<SingleAlignmentResult> = Vec::new();
    let mut lines = Vec::with_capacity(chunk.len());

    for read in chunk {
        let fit = aligner.align_read(
            read,
            &mut primary,
            &mut first_alt,
            driver.max_edit_distance_for_secondary_results,
            driver.secondary_result_buffer_size,
            driver.max_secondary_results,
            &mut secondary,
            driver.secondary_result_buffer_size,
            &mut deferred,
            driver.use_hamming,
        );
        if !fit {
            log::debug!(
                "Read {} overflowed a result buffer; results are truncated",
                read.id()
            );
        }

        if options.use_affine_gap && !deferred.is_empty() {
            aligner.align_affine_gap(read, &mut primary, &mut first_alt, &mut deferred);
        }

        lines.push(sam::format_record(
            read,
            &primary,
            genome,
            &mut cigar_scorer,
            cigar_limit,
            false,
        ));
        if first_alt.is_mapped() {
            lines.push(sam::format_record(
                read,
                &first_alt,
                genome,
                &mut cigar_scorer,
                cigar_limit,
                true,
            ));
        }
        if driver.report_secondary {
            for sec in &secondary {
                lines.push(sam::format_record(
                    read,
                    sec,
                    genome,
                    &mut cigar_scorer,
                    cigar_limit,
                    true,
                ));
            }
        }
    }

    (lines, aligner.stats().clone())
}
