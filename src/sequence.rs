//! Sequence ingestion: an opaque stream of bases feeding the encoder, plus
//! the file-size-based heuristic for guessing how many k-mers an input will
//! produce before it's been read (spec.md §6, §4.4).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use needletail::{parse_fastx_file, Sequence};

/// One event out of a [`BaseSource`]: either the next raw base, or the end
/// of a record (so the caller knows to reset its sliding k-mer window).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseEvent {
    Base(u8),
    RecordEnd,
}

/// A source of DNA bases. [`crate::driver::CountDriver`] only ever sees
/// this trait, never a concrete file format, matching spec.md §6's framing
/// of sequence I/O as an external collaborator.
pub trait BaseSource {
    /// Feed every base of every record, in order, to `on_event`.
    fn for_each_base(&mut self, on_event: &mut dyn FnMut(BaseEvent)) -> Result<()>;
}

/// Adapts a FASTA/FASTQ file (optionally compressed, per `needletail`'s own
/// format sniffing) into a [`BaseSource`].
pub struct NeedletailBaseSource {
    path: std::path::PathBuf,
}

impl NeedletailBaseSource {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        NeedletailBaseSource { path: path.into() }
    }
}

impl BaseSource for NeedletailBaseSource {
    fn for_each_base(&mut self, on_event: &mut dyn FnMut(BaseEvent)) -> Result<()> {
        let path_str = self.path.to_string_lossy().into_owned();
        let mut reader = parse_fastx_file(&self.path)
            .with_context(|| format!("failed to open sequence file: {path_str}"))?;

        while let Some(record) = reader.next() {
            let record =
                record.with_context(|| format!("error reading record from {path_str}"))?;
            let norm_seq = record.normalize(false);
            for &b in norm_seq.iter() {
                on_event(BaseEvent::Base(b));
            }
            on_event(BaseEvent::RecordEnd);
        }

        Ok(())
    }
}

/// An in-memory adapter, used by tests to drive the driver without touching
/// the filesystem.
pub struct SliceBaseSource {
    records: Vec<Vec<u8>>,
}

impl SliceBaseSource {
    pub fn new(records: Vec<Vec<u8>>) -> Self {
        SliceBaseSource { records }
    }

    pub fn single(record: impl Into<Vec<u8>>) -> Self {
        SliceBaseSource {
            records: vec![record.into()],
        }
    }
}

impl BaseSource for SliceBaseSource {
    fn for_each_base(&mut self, on_event: &mut dyn FnMut(BaseEvent)) -> Result<()> {
        for record in &self.records {
            for &b in record {
                on_event(BaseEvent::Base(b));
            }
            on_event(BaseEvent::RecordEnd);
        }
        Ok(())
    }
}

/// A complete guess at the number of k-mers in a file, from its size and
/// extension alone. No rigor went into the multipliers beyond what the
/// original tool used; `"-"` (stdin) always guesses zero since its size is
/// unknowable up front.
pub fn estimate_kmers_from_path(path: &Path) -> u64 {
    let name = path.to_string_lossy();

    if name == "-" {
        return 0;
    }

    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return 0,
    };

    if name.ends_with(".xz") {
        size * 5
    } else if name.ends_with(".gz") {
        size * 4
    } else if name.ends_with(".bz2") {
        size * 4
    } else {
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn slice_source_visits_every_base_and_resets_between_records() {
        let mut source = SliceBaseSource::new(vec![b"ACGT".to_vec(), b"TTT".to_vec()]);
        let mut bases = Vec::new();
        let mut record_ends = 0;
        source
            .for_each_base(&mut |ev| match ev {
                BaseEvent::Base(b) => bases.push(b),
                BaseEvent::RecordEnd => record_ends += 1,
            })
            .unwrap();
        assert_eq!(bases, b"ACGTTTT");
        assert_eq!(record_ends, 2);
    }

    #[test]
    fn stdin_marker_estimates_zero() {
        assert_eq!(estimate_kmers_from_path(Path::new("-")), 0);
    }

    #[test]
    fn missing_file_estimates_zero() {
        assert_eq!(estimate_kmers_from_path(Path::new("/no/such/file.fasta")), 0);
    }

    #[test]
    fn plain_file_uses_raw_size() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b">r\nACGTACGTACGT\n").unwrap();
        let size = fs::metadata(f.path()).unwrap().len();
        assert_eq!(estimate_kmers_from_path(f.path()), size);
    }

    #[test]
    fn gz_extension_quadruples_the_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fasta.gz");
        fs::write(&path, b"not really gzip, just testing the extension rule").unwrap();
        let size = fs::metadata(&path).unwrap().len();
        assert_eq!(estimate_kmers_from_path(&path), size * 4);
    }

    #[test]
    fn xz_extension_uses_a_five_times_multiplier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fasta.xz");
        fs::write(&path, b"placeholder bytes").unwrap();
        let size = fs::metadata(&path).unwrap().len();
        assert_eq!(estimate_kmers_from_path(&path), size * 5);
    }
}
