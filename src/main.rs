use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;

use osprey_align::genome::{Genome, DEFAULT_CHROMOSOME_PADDING};
use osprey_align::options::AlignerOptions;
use osprey_align::seed_index::SeedIndex;
use osprey_align::single_end::{self, DriverOptions};

#[derive(Parser)]
#[command(name = "osprey-align")]
#[command(about = "Osprey - hash-index seed-and-extend short-read DNA aligner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align single-end reads against a reference genome
    Align {
        /// Reference FASTA file
        #[arg(value_name = "REF.FA")]
        reference: PathBuf,

        /// Input FASTQ file(s), plain or gzipped
        #[arg(value_name = "READS.FQ", required = true)]
        reads: Vec<PathBuf>,

        // ===== Seeding options =====
        /// Seed (k-mer) length
        #[arg(short = 's', long, value_name = "INT", default_value = "20")]
        seed_len: usize,

        /// Skip seeds with more than INT hits
        #[arg(short = 'H', long, value_name = "INT", default_value = "300")]
        max_hits: u32,

        /// Maximum seeds to use per read (0 = derive from coverage)
        #[arg(short = 'n', long, value_name = "INT", default_value = "25")]
        max_seeds: u32,

        /// Seed budget as a multiple of readLen/seedLen (used when -n is 0)
        #[arg(long, value_name = "FLOAT", default_value = "0")]
        seed_coverage: f64,

        /// Ingest the first maxHits hits of overly popular seeds
        #[arg(long)]
        explore_popular_seeds: bool,

        // ===== Scoring options =====
        /// Maximum edit distance to report an alignment
        #[arg(short = 'd', long, value_name = "INT", default_value = "14")]
        max_dist: u32,

        /// Keep scoring INT past the best score (MAPQ mass, secondaries)
        #[arg(short = 'D', long, value_name = "INT", default_value = "2")]
        extra_search_depth: u32,

        /// Lowest element weight worth scoring before the final pass
        #[arg(long, value_name = "INT", default_value = "1")]
        min_weight: u32,

        /// Rescore candidates with the affine-gap back-end
        #[arg(short = 'g', long)]
        affine_gap: bool,

        /// Use Hamming distance scoring (no indels expected)
        #[arg(long)]
        hamming: bool,

        /// Match reward for affine-gap scoring
        #[arg(long, value_name = "INT", default_value = "1")]
        match_reward: u32,

        /// Substitution penalty for affine-gap scoring
        #[arg(long, value_name = "INT", default_value = "4")]
        sub_penalty: u32,

        /// Gap open penalty
        #[arg(short = 'O', long, value_name = "INT", default_value = "6")]
        gap_open: u32,

        /// Gap extension penalty
        #[arg(short = 'E', long, value_name = "INT", default_value = "1")]
        gap_extend: u32,

        /// Bonus for reaching the 5' end of the read
        #[arg(long, value_name = "INT", default_value = "10")]
        five_prime_bonus: u32,

        /// Bonus for reaching the 3' end of the read
        #[arg(long, value_name = "INT", default_value = "5")]
        three_prime_bonus: u32,

        /// Stop at the first location within the edit-distance cap
        #[arg(long)]
        stop_on_first_hit: bool,

        // ===== ALT handling =====
        /// Disable ALT-aware primary selection
        #[arg(long)]
        no_alt_awareness: bool,

        /// Report the displaced ALT best alongside a promoted primary
        #[arg(long)]
        emit_alt_alignments: bool,

        /// Score gap within which a non-ALT alignment is preferred
        #[arg(long, value_name = "INT", default_value = "3")]
        alt_score_gap: u32,

        // ===== Output options =====
        /// Output SAM file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<String>,

        /// Report secondary alignments
        #[arg(short = 'a', long)]
        report_secondary: bool,

        /// Maximum secondary alignments to report per read
        #[arg(long, value_name = "INT", default_value = "10")]
        max_secondary: usize,

        /// Report secondaries within INT of the best score
        #[arg(long, value_name = "INT", default_value = "2")]
        secondary_edit_distance: u32,

        /// Cap secondary alignments per contig (-1 = unlimited)
        #[arg(long, value_name = "INT", default_value = "-1")]
        max_secondary_per_contig: i32,

        // ===== Processing options =====
        /// Upper bound on read length
        #[arg(long, value_name = "INT", default_value = "400")]
        max_read_size: usize,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Align {
            reference,
            reads,
            seed_len,
            max_hits,
            max_seeds,
            seed_coverage,
            explore_popular_seeds,
            max_dist,
            extra_search_depth,
            min_weight,
            affine_gap,
            hamming,
            match_reward,
            sub_penalty,
            gap_open,
            gap_extend,
            five_prime_bonus,
            three_prime_bonus,
            stop_on_first_hit,
            no_alt_awareness,
            emit_alt_alignments,
            alt_score_gap,
            output,
            report_secondary,
            max_secondary,
            secondary_edit_distance,
            max_secondary_per_contig,
            max_read_size,
            threads,
            verbosity,
        } => {
            let log_level = match verbosity {
                v if v <= 1 => log::LevelFilter::Error,
                2 => log::LevelFilter::Warn,
                3 => log::LevelFilter::Info,
                4 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            };
            env_logger::Builder::from_default_env()
                .filter_level(log_level)
                .format_timestamp(None)
                .format_target(false)
                .init();

            let mut options = AlignerOptions::default();
            options.seed_len = seed_len;
            options.max_hits_to_consider = max_hits;
            options.max_seeds_to_use = max_seeds;
            options.max_seed_coverage = seed_coverage;
            options.explore_popular_seeds = explore_popular_seeds;
            options.max_k = max_dist;
            options.extra_search_depth = extra_search_depth;
            options.min_weight_to_check = min_weight;
            options.use_affine_gap = affine_gap;
            options.match_reward = match_reward;
            options.sub_penalty = sub_penalty;
            options.gap_open_penalty = gap_open;
            options.gap_extend_penalty = gap_extend;
            options.five_prime_end_bonus = five_prime_bonus;
            options.three_prime_end_bonus = three_prime_bonus;
            options.stop_on_first_hit = stop_on_first_hit;
            options.alt_awareness = !no_alt_awareness;
            options.emit_alt_alignments = emit_alt_alignments;
            options.max_score_gap_to_prefer_non_alt_alignment = alt_score_gap;
            options.max_secondary_alignments_per_contig = max_secondary_per_contig;
            options.max_read_size = max_read_size;

            if let Err(e) = options.validate() {
                log::error!("Invalid configuration: {}", e);
                std::process::exit(1);
            }

            let num_threads = threads.unwrap_or_else(num_cpus::get).max(1);
            if let Err(e) = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
            {
                log::warn!(
                    "Failed to configure thread pool: {} (may already be initialized)",
                    e
                );
            }
            log::info!(
                "Using {} {}",
                num_threads,
                if num_threads == 1 { "thread" } else { "threads" }
            );

            log::info!("Loading reference: {}", reference.display());
            let genome = match Genome::from_fasta(
                &reference,
                DEFAULT_CHROMOSOME_PADDING,
                &HashSet::new(),
            ) {
                Ok(g) => g,
                Err(e) => {
                    log::error!("Failed to load {}: {}", reference.display(), e);
                    std::process::exit(1);
                }
            };

            log::info!("Building seed index (k = {})", seed_len);
            let seed_index = match SeedIndex::build(&genome, seed_len) {
                Ok(i) => i,
                Err(e) => {
                    log::error!("Failed to build seed index: {}", e);
                    std::process::exit(1);
                }
            };

            let driver = DriverOptions {
                max_secondary_results: max_secondary,
                max_edit_distance_for_secondary_results: secondary_edit_distance,
                secondary_result_buffer_size: (max_secondary * 4).max(64),
                report_secondary,
                use_hamming: hamming,
            };

            let command_line = std::env::args().collect::<Vec<_>>().join(" ");
            let read_files: Vec<String> = reads
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect();

            let mut writer: Box<dyn std::io::Write> = match output {
                Some(path) => match std::fs::File::create(&path) {
                    Ok(f) => Box::new(std::io::BufWriter::new(f)),
                    Err(e) => {
                        log::error!("Cannot create {}: {}", path, e);
                        std::process::exit(1);
                    }
                },
                None => Box::new(std::io::BufWriter::new(std::io::stdout())),
            };

            if let Err(e) = osprey_align::sam::write_header(&mut writer, &genome, &command_line) {
                log::error!("Error writing SAM header: {}", e);
                std::process::exit(1);
            }

            single_end::process_single_end(
                &genome,
                &seed_index,
                &options,
                &driver,
                &read_files,
                &mut writer,
            );

            if let Err(e) = writer.flush() {
                log::error!("Error flushing output: {}", e);
                std::process::exit(1);
            }
        }
    }
}
