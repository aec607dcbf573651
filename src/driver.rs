//! Top-level streaming driver: wires the encoder, per-prefix buckets, the
//! memory-threshold flush trigger, and the writer's iteration/merge
//! machinery into one pass over the input (spec.md §4.6).

use rayon::prelude::*;

use crate::config::CounterConfig;
use crate::count_array::CountArray;
use crate::encoder::{select_kmer, KmerEncoder, KmerState};
use crate::errors::KmerSpillError;
use crate::sequence::{BaseEvent, BaseSource};
use crate::size_estimator::{estimate_sizes, SizeEstimate};
use crate::writer::Writer;

/// Reduce `requested` to a power of two no larger than `n_prefix`, and no
/// smaller than 1. The writer's `fileOf` bit-shift partitioning requires a
/// power-of-two file count (spec.md §4.5).
fn resolve_num_files(requested: u32, n_prefix: u64) -> u32 {
    let requested = requested.max(1);
    let capped = (requested as u64).min(n_prefix) as u32;
    let mut p = 1u32;
    while (p as u64) * 2 <= capped as u64 {
        p *= 2;
    }
    p
}

pub struct CountDriver {
    config: CounterConfig,
    size: SizeEstimate,
    writer: Writer,
    buckets: Vec<CountArray>,
    encoder: KmerEncoder,
    kmers_since_flush: u64,
    flush_threshold_bits: u64,
    flush_error: Option<KmerSpillError>,
}

impl CountDriver {
    /// `config.expected_kmers` must already be resolved (spec.md §4.4's
    /// `_expNumKmers` is computed by the caller, e.g. by summing
    /// [`crate::sequence::estimate_kmers_from_path`] over the input files,
    /// before this constructor runs).
    pub fn new(config: CounterConfig) -> Result<Self, KmerSpillError> {
        if config.k == 0 || config.k > 32 {
            return Err(KmerSpillError::InvalidKmerSize(config.k));
        }
        if config.output_prefix.as_os_str().is_empty() {
            return Err(KmerSpillError::MissingOutput);
        }

        let size = estimate_sizes(config.max_memory, config.expected_kmers, config.k)?;
        log::info!("sizing sweep:\n{}", size.report());

        let num_files = resolve_num_files(config.num_files, size.n_prefix);
        let writer = Writer::new(
            config.output_prefix.clone(),
            size.w_prefix,
            size.w_data,
            num_files,
        );

        let buckets = (0..size.n_prefix)
            .map(|p| CountArray::new(p, size.w_data))
            .collect();

        let encoder = KmerEncoder::new(config.k);

        // Bits of packed suffix data this run is willing to hold in memory
        // before flushing. Approximate: it ignores the segment/struct
        // overhead `size_estimator` otherwise accounts for, so real usage
        // always runs a little ahead of this figure. Matches the
        // source's own bookkeeping, which is no more precise; do not
        // "fix" this without re-deriving the whole sizing sweep around it.
        let flush_threshold_bits = config.max_memory.saturating_mul(8);

        Ok(CountDriver {
            config,
            size,
            writer,
            buckets,
            encoder,
            kmers_since_flush: 0,
            flush_threshold_bits,
            flush_error: None,
        })
    }

    pub fn size_estimate(&self) -> &SizeEstimate {
        &self.size
    }

    /// Run every source to completion, flushing whenever the in-memory
    /// budget is exceeded, then perform the final flush and merge.
    pub fn run(&mut self, sources: &mut [Box<dyn BaseSource>]) -> Result<(), KmerSpillError> {
        for source in sources.iter_mut() {
            let this = &mut *self;
            source
                .for_each_base(&mut |event| match event {
                    BaseEvent::Base(b) => this.ingest_base(b),
                    BaseEvent::RecordEnd => {
                        if this.flush_error.is_none() {
                            this.encoder.reset();
                        }
                    }
                })
                .map_err(|e| KmerSpillError::Generic(format!("{e:#}")))?;

            // An I/O error during a mid-stream flush is fatal (spec.md §7);
            // abort here instead of continuing to ingest into buckets that
            // were never actually cleared out.
            if let Some(err) = self.flush_error.take() {
                return Err(err);
            }
        }

        self.flush_all()?;
        self.writer.finalize()?;
        Ok(())
    }

    fn ingest_base(&mut self, b: u8) {
        if self.flush_error.is_some() {
            return;
        }

        if let KmerState::Ready(forward, reverse) = self.encoder.add_base(b) {
            let kmer = select_kmer(forward, reverse, self.config.operation);
            let prefix = kmer >> self.size.w_data;
            let suffix = kmer & self.size.w_data_mask;

            self.buckets[prefix as usize].append(suffix);
            self.kmers_since_flush += 1;

            let bits_used = self.kmers_since_flush * self.size.w_data as u64;
            if bits_used >= self.flush_threshold_bits {
                if let Err(e) = self.flush_all() {
                    // Stash and stop ingesting: the buckets already
                    // flushed this round were cleared, but leaving some
                    // unflushed after the error would let a later call
                    // re-flush the same iteration's already-written
                    // prefixes, double-counting them in the merge pass.
                    self.flush_error = Some(e);
                }
            }
        }
    }

    fn flush_all(&mut self) -> Result<(), KmerSpillError> {
        let writer = &self.writer;
        let num_files = writer.num_files() as u64;
        let n_prefix = self.buckets.len() as u64;
        let prefixes_per_file = (n_prefix / num_files) as usize;

        // One parallel unit per output file, each walking its own
        // contiguous prefix range in ascending order, so within a single
        // file blocks land in increasing prefix order (spec.md §4.6, §5)
        // instead of racing for the file's lock in whatever order buckets
        // happen to finish counting.
        self.buckets
            .par_chunks_mut(prefixes_per_file)
            .try_for_each(|chunk| -> Result<(), KmerSpillError> {
                for bucket in chunk {
                    bucket.count_kmers();
                    writer
                        .dump_counted_kmers(bucket.prefix(), bucket.counted())
                        .map_err(KmerSpillError::IoError)?;
                    bucket.remove_counted_kmers();
                }
                Ok(())
            })?;

        self.writer.increment_iteration()?;
        self.kmers_since_flush = 0;
        Ok(())
    }
}
