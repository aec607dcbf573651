use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Operation;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    #[clap(
        short,
        long,
        global = true,
        default_value_t = 0,
        help = "Number of threads to use for flush/merge (0 for all logical cores)"
    )]
    pub threads: usize,

    #[clap(short, long, global = true, action = clap::ArgAction::Count, help = "Verbosity level (e.g., -v, -vv)")]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Count canonical k-mers across one or more FASTA/FASTQ inputs,
    /// spilling to a memory-bounded, prefix-partitioned set of output files.
    Count(CountArgs),
}

/// Canonicalisation strategy accepted on the command line (spec.md §4.2 /
/// §6 "operation" tunable). Mirrors [`Operation`] one-to-one; kept as a
/// separate `ValueEnum` so the CLI's string spelling is decoupled from the
/// CORE's internal enum.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationArg {
    Count,
    CountForward,
    CountReverse,
}

impl From<OperationArg> for Operation {
    fn from(op: OperationArg) -> Self {
        match op {
            OperationArg::Count => Operation::Count,
            OperationArg::CountForward => Operation::CountForward,
            OperationArg::CountReverse => Operation::CountReverse,
        }
    }
}

#[derive(Parser, Debug)]
pub struct CountArgs {
    #[clap(short = 'k', long = "kmer-size", required = true, help = "The length of the k-mer (1..=32)")]
    pub kmer_size: u8,

    #[clap(short = 'i', long = "input", required = true, num_args = 1.., help = "One or more input FASTA/FASTQ files (can be compressed)")]
    pub input_files: Vec<PathBuf>,

    #[clap(
        short = 'o',
        long = "output-prefix",
        required = true,
        help = "Path prefix for the output file set; final files are named <prefix>.<file>.kmerspill"
    )]
    pub output_prefix: PathBuf,

    #[clap(
        short = 'm',
        long = "memory",
        default_value_t = 1u64 << 30,
        help = "Soft memory budget in bytes; crossing it triggers a flush"
    )]
    pub memory: u64,

    #[clap(
        long = "expected-kmers",
        default_value_t = 0,
        help = "Override the kmer-count size estimator (0 = estimate from input file sizes)"
    )]
    pub expected_kmers: u64,

    #[clap(
        long = "operation",
        value_enum,
        default_value_t = OperationArg::Count,
        help = "Which strand(s) to count"
    )]
    pub operation: OperationArg,

    #[clap(
        long = "num-files",
        default_value_t = 4,
        help = "Number of output files to partition prefixes across (rounded down to a power of two)"
    )]
    pub num_files: u32,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
