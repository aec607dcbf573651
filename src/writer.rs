//! Owns the N output files; routes prefix -> file, tracks the iteration
//! counter, and merges iterations at the end (spec.md §4.5).
//!
//! On-disk block format (the core's half of the "output contract" in
//! spec.md §6): each block is
//!
//! ```text
//! u64 prefix
//! u64 n_entries
//! n_entries * (u64 kmer, u64 count)
//! ```
//!
//! with `kmer = (prefix << w_data) | suffix`, entries sorted strictly
//! ascending by `kmer`. A file is a back-to-back sequence of blocks, one per
//! prefix in `[first_prefix_in_file(f), last_prefix_in_file(f)]`, written in
//! increasing prefix order within a single iteration (spec.md §5).

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::count_array::CountedBucket;

/// One open per-file handle for the *current* iteration. Lazily created on
/// first write so files with no data in an iteration are never touched.
struct FileHandle {
    writer: Option<BufWriter<File>>,
}

pub struct Writer {
    output_prefix: PathBuf,
    w_prefix: u32,
    w_data: u32,
    n_prefix: u64,
    num_files: u32,
    num_file_bits: u32,
    iteration: AtomicU32,
    handles: Vec<Mutex<FileHandle>>,
}

impl Writer {
    /// `num_files` must be a power of two and `<= 2^w_prefix`.
    pub fn new(output_prefix: PathBuf, w_prefix: u32, w_data: u32, num_files: u32) -> Self {
        debug_assert!(num_files.is_power_of_two());
        let n_prefix = 1u64 << w_prefix;
        debug_assert!((num_files as u64) <= n_prefix);

        let num_file_bits = num_files.trailing_zeros();
        let handles = (0..num_files)
            .map(|_| Mutex::new(FileHandle { writer: None }))
            .collect();

        Writer {
            output_prefix,
            w_prefix,
            w_data,
            n_prefix,
            num_files,
            num_file_bits,
            iteration: AtomicU32::new(0),
            handles,
        }
    }

    pub fn num_files(&self) -> u32 {
        self.num_files
    }

    pub fn current_iteration(&self) -> u32 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// `fileOf(p) = p >> (wPrefix - numFileBits)` (spec.md §4.5).
    pub fn file_of(&self, prefix: u64) -> u32 {
        (prefix >> (self.w_prefix - self.num_file_bits)) as u32
    }

    pub fn first_prefix_in_file(&self, file: u32) -> u64 {
        let prefixes_per_file = self.n_prefix / self.num_files as u64;
        file as u64 * prefixes_per_file
    }

    pub fn last_prefix_in_file(&self, file: u32) -> u64 {
        let prefixes_per_file = self.n_prefix / self.num_files as u64;
        (file as u64 + 1) * prefixes_per_file - 1
    }

    fn iteration_path(&self, file: u32, iteration: u32) -> PathBuf {
        let mut p = self.output_prefix.clone();
        let mut name = p
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{file}.iter{iteration}.block"));
        p.set_file_name(name);
        p
    }

    fn final_path(&self, file: u32) -> PathBuf {
        let mut p = self.output_prefix.clone();
        let mut name = p
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{file}.kmerspill"));
        p.set_file_name(name);
        p
    }

    /// Write one bucket's counted suffixes as a block into the file owning
    /// `bucket.prefix()`. Appends to the handle owned by the caller's
    /// worker; different files' handles never contend because each flush
    /// worker only ever touches the file(s) its prefix range maps to.
    pub fn dump_counted_kmers(&self, prefix: u64, bucket: &CountedBucket) -> io::Result<()> {
        debug_assert!(prefix < self.n_prefix);

        let file = self.file_of(prefix);
        let iteration = self.current_iteration();
        let mut handle = self.handles[file as usize].lock().unwrap();

        if handle.writer.is_none() {
            let path = self.iteration_path(file, iteration);
            let f = File::create(&path)?;
            handle.writer = Some(BufWriter::new(f));
        }

        let w = handle.writer.as_mut().unwrap();
        write_block(w, prefix, self.w_data, bucket)
    }

    /// Bump the iteration counter; subsequent `dump_counted_kmers` calls
    /// write into the next iteration's files.
    pub fn increment_iteration(&self) -> io::Result<()> {
        for handle in &self.handles {
            let mut h = handle.lock().unwrap();
            if let Some(w) = h.writer.as_mut() {
                w.flush()?;
            }
            h.writer = None;
        }
        self.iteration.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// If exactly one iteration was written, rename the interim files to
    /// final names untouched. Otherwise merge all iteration blocks of each
    /// file into a single sorted, per-prefix block per file, summing counts
    /// for equal keys across iterations.
    ///
    /// Assumes the current iteration has already been flushed and closed
    /// (via [`Writer::increment_iteration`]); callers that haven't done so
    /// yet should call [`Writer::finish_iteration`] instead.
    pub fn finalize(&self) -> io::Result<()> {
        let iterations = self.current_iteration();

        for file in 0..self.num_files {
            let final_path = self.final_path(file);

            if iterations == 1 {
                let iter_path = self.iteration_path(file, 0);
                if iter_path.exists() {
                    fs::rename(&iter_path, &final_path)?;
                } else {
                    // No data was ever flushed for this file; still produce
                    // an empty final file so downstream tooling sees every
                    // configured file.
                    File::create(&final_path)?;
                }
                continue;
            }

            merge_iterations_for_file(self, file, iterations, &final_path)?;
        }

        Ok(())
    }

    /// Close out the current iteration and finalize in one call, for
    /// callers that haven't already flushed. [`crate::driver::CountDriver`]
    /// flushes immediately before finalizing, so it calls
    /// [`Writer::finalize`] directly instead, to avoid bumping the
    /// iteration counter twice.
    pub fn finish_iteration(&self) -> io::Result<()> {
        self.increment_iteration()?;
        self.finalize()
    }

    fn iteration_path_for_merge(&self, file: u32, iteration: u32) -> PathBuf {
        self.iteration_path(file, iteration)
    }
}

fn write_block(w: &mut impl Write, prefix: u64, _w_data: u32, bucket: &CountedBucket) -> io::Result<()> {
    w.write_all(&prefix.to_le_bytes())?;
    w.write_all(&(bucket.suffixes.len() as u64).to_le_bytes())?;
    for (&suffix, &count) in bucket.suffixes.iter().zip(bucket.counts.iter()) {
        let kmer = (prefix << _w_data) | suffix;
        w.write_all(&kmer.to_le_bytes())?;
        w.write_all(&(count as u64).to_le_bytes())?;
    }
    Ok(())
}

/// One decoded block: the prefix it belongs to and its sorted
/// `(kmer, count)` entries.
#[derive(Debug, Clone)]
pub struct Block {
    pub prefix: u64,
    pub entries: Vec<(u64, u64)>,
}

fn read_block(r: &mut impl Read) -> io::Result<Option<Block>> {
    let mut u64buf = [0u8; 8];
    match r.read_exact(&mut u64buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let prefix = u64::from_le_bytes(u64buf);

    r.read_exact(&mut u64buf)?;
    let n_entries = u64::from_le_bytes(u64buf) as usize;

    let mut entries = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        r.read_exact(&mut u64buf)?;
        let kmer = u64::from_le_bytes(u64buf);
        r.read_exact(&mut u64buf)?;
        let count = u64::from_le_bytes(u64buf);
        entries.push((kmer, count));
    }
    Ok(Some(Block { prefix, entries }))
}

/// Read every block out of a finished or interim output file, in order.
pub fn read_all_blocks(path: &Path) -> io::Result<Vec<Block>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);
    let mut blocks = Vec::new();
    while let Some(b) = read_block(&mut r)? {
        blocks.push(b);
    }
    Ok(blocks)
}

/// Two sorted `(kmer, count)` sequences merged, summing counts for equal
/// keys (spec.md §4.5 "equal keys across iterations sum their counts").
fn merge_sorted_counts(a: &[(u64, u64)], b: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push((a[i].0, a[i].1 + b[j].1));
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn merge_iterations_for_file(
    writer: &Writer,
    file: u32,
    iterations: u32,
    final_path: &Path,
) -> io::Result<()> {
    use std::collections::BTreeMap;

    let mut by_prefix: BTreeMap<u64, Vec<(u64, u64)>> = BTreeMap::new();

    for it in 0..iterations {
        let path = writer.iteration_path_for_merge(file, it);
        if !path.exists() {
            continue;
        }
        for block in read_all_blocks(&path)? {
            by_prefix
                .entry(block.prefix)
                .and_modify(|existing| *existing = merge_sorted_counts(existing, &block.entries))
                .or_insert(block.entries);
        }
        fs::remove_file(&path)?;
    }

    let out_file = File::create(final_path)?;
    let mut out = BufWriter::new(out_file);

    for (prefix, entries) in by_prefix {
        out.write_all(&prefix.to_le_bytes())?;
        out.write_all(&(entries.len() as u64).to_le_bytes())?;
        for (kmer, count) in entries {
            out.write_all(&kmer.to_le_bytes())?;
            out.write_all(&count.to_le_bytes())?;
        }
    }
    out.flush()?;
    Ok(())
}
