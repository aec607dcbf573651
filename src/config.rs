//! Tunables threaded explicitly through the driver.
//!
//! Per spec.md ("Design notes"), the original C++ source keeps a couple of
//! global mutable statics (`_verbosity`, `_showProgress`). We avoid that
//! entirely: every piece of configuration the driver needs lives in
//! [`CounterConfig`] and is passed by reference, never read from process-wide
//! state.

use std::path::PathBuf;

/// Which strand(s) to count, mirroring meryl's `Count` / `CountForward` /
/// `CountReverse` operations (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Canonical: min(forward, reverse-complement).
    Count,
    /// Always the forward-strand encoding.
    CountForward,
    /// Always the reverse-complement encoding.
    CountReverse,
}

impl Default for Operation {
    fn default() -> Self {
        Operation::Count
    }
}

/// Recognised configuration (spec.md §6 "Tunables").
#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// K-mer size, 1 ..= 32.
    pub k: u8,
    /// Soft memory limit in bytes; crossing it triggers a flush.
    pub max_memory: u64,
    /// Flush/merge worker count. 0 means "use all logical cores".
    pub threads: usize,
    /// Override for the size estimator. 0 means "estimate from inputs".
    pub expected_kmers: u64,
    /// Canonicalisation strategy.
    pub operation: Operation,
    /// Output file-set prefix; final files are named `{prefix}.{file}.kmerspill`.
    pub output_prefix: PathBuf,
    /// Number of output files the writer partitions prefixes across. Must be
    /// a power of two.
    pub num_files: u32,
}

impl CounterConfig {
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}
