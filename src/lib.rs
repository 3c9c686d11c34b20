pub mod adjuster;
pub mod affine_gap;
pub mod aligner;
pub mod candidates;
pub mod edit_distance;
pub mod fastq_reader; // FASTQ reading via bio::io::fastq with gzip detection
pub mod genome;
pub mod options;
pub mod probability;
pub mod read;
pub mod result;
pub mod sam;
pub mod score_set;
pub mod seed_index;
pub mod single_end;
pub mod stats;
