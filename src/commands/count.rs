//! CLI entry point for the `count` subcommand: a thin translation layer
//! from parsed arguments to a [`CounterConfig`] plus a list of
//! [`BaseSource`]s, handed straight to [`CountDriver`]. Per spec.md's
//! explicit non-goal, no counting logic lives here.

use anyhow::{Context, Result};
use log::info;

use crate::cli::CountArgs;
use crate::config::CounterConfig;
use crate::driver::CountDriver;
use crate::errors::KmerSpillError;
use crate::sequence::{estimate_kmers_from_path, BaseSource, NeedletailBaseSource};

pub fn run_count(args: CountArgs, threads: usize) -> Result<()> {
    info!("starting count: k={} inputs={:?}", args.kmer_size, args.input_files);

    if args.kmer_size == 0 || args.kmer_size > 32 {
        return Err(KmerSpillError::InvalidKmerSize(args.kmer_size).into());
    }

    for path in &args.input_files {
        if !path.exists() {
            return Err(KmerSpillError::FileNotFound(path.clone()).into());
        }
    }

    let expected_kmers = if args.expected_kmers > 0 {
        args.expected_kmers
    } else {
        let estimate: u64 = args
            .input_files
            .iter()
            .map(|p| estimate_kmers_from_path(p))
            .sum();
        info!("estimated {} kmers from input file sizes", estimate);
        estimate
    };

    let config = CounterConfig {
        k: args.kmer_size,
        max_memory: args.memory,
        threads,
        expected_kmers,
        operation: args.operation.into(),
        output_prefix: args.output_prefix.clone(),
        num_files: args.num_files,
    };

    let mut driver = CountDriver::new(config).context("failed to initialise count driver")?;

    let mut sources: Vec<Box<dyn BaseSource>> = args
        .input_files
        .iter()
        .map(|p| Box::new(NeedletailBaseSource::new(p.clone())) as Box<dyn BaseSource>)
        .collect();

    driver
        .run(&mut sources)
        .map_err(|e| anyhow::anyhow!("count run failed: {e}"))?;

    info!(
        "finished counting: prefix width {} bits, {} expected iteration(s)",
        driver.size_estimate().w_prefix,
        driver.size_estimate().n_outputs,
    );

    Ok(())
}
