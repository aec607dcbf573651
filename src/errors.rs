use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KmerSpillError {
    #[error("Invalid k-mer size: {0}. Must be between 1 and 32.")]
    InvalidKmerSize(u8),

    #[error("Estimate of number of kmers (--expected-kmers) is zero or unavailable.")]
    MissingKmerEstimate,

    #[error("No output prefix configured for count operation.")]
    MissingOutput,

    #[error(
        "Cannot fit into memory limit of {max_memory} bytes: would require {n_outputs} iterations (max 32)."
    )]
    TooManyIterations { max_memory: u64, n_outputs: u64 },

    #[error("Input file not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse input file {0:?}")]
    FileParsingError(PathBuf),

    #[error("I/O error")]
    IoError(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}
