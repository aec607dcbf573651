//! A growable, segmented, bit-packed list of `w_data`-bit suffixes for one
//! prefix bucket (spec.md §4.3).
//!
//! The source models this as a struct holding a raw pointer-vector of
//! segment pointers (`merylCountArray`); per spec.md §9's redesign note we
//! instead own a `Vec<Vec<u8>>` of owned segment buffers and index into it —
//! indices, not pointers, are the natural cross-reference in safe Rust.

use crate::bitstream::{bytes_for_bits, get_value, set_value};

/// Bits per segment: `8192 * 64`, matching the source's `SEGMENT_SIZE`.
pub const SEGMENT_BITS: u64 = 8192 * 64;

/// One fixed-size bit-buffer holding up to `SEGMENT_BITS / w_data` suffixes.
type Segment = Vec<u8>;

/// The counted form of a bucket: parallel `(suffix, count)` arrays, sorted
/// ascending by suffix, produced by [`CountArray::count_kmers`].
#[derive(Debug, Clone, Default)]
pub struct CountedBucket {
    pub suffixes: Vec<u64>,
    pub counts: Vec<u32>,
}

/// An append-only ordered multiset of `w_data`-bit suffixes for one prefix
/// bucket.
#[derive(Debug)]
pub struct CountArray {
    prefix: u64,
    w_data: u32,
    kmers_per_segment: u64,
    segments: Vec<Segment>,
    n_values_in_last_segment: u64,
    n_values: u64,
    counted: Option<CountedBucket>,
}

impl CountArray {
    pub fn new(prefix: u64, w_data: u32) -> Self {
        debug_assert!(w_data >= 1 && w_data <= 64);
        let kmers_per_segment = SEGMENT_BITS / w_data as u64;
        debug_assert!(kmers_per_segment >= 1);
        CountArray {
            prefix,
            w_data,
            kmers_per_segment,
            segments: Vec::new(),
            n_values_in_last_segment: 0,
            n_values: 0,
            counted: None,
        }
    }

    pub fn prefix(&self) -> u64 {
        self.prefix
    }

    pub fn len(&self) -> u64 {
        self.n_values
    }

    pub fn is_empty(&self) -> bool {
        self.n_values == 0
    }

    /// Append one suffix to the bucket, allocating a new segment on demand.
    pub fn append(&mut self, suffix: u64) {
        debug_assert!(self.w_data == 64 || suffix < (1u64 << self.w_data));

        if self.segments.is_empty() || self.n_values_in_last_segment == self.kmers_per_segment {
            self.segments.push(vec![0u8; bytes_for_bits(SEGMENT_BITS)]);
            self.n_values_in_last_segment = 0;
        }

        let seg = self.segments.last_mut().unwrap();
        let bit_offset = self.n_values_in_last_segment * self.w_data as u64;
        set_value(seg, bit_offset, self.w_data, suffix);

        self.n_values_in_last_segment += 1;
        self.n_values += 1;
    }

    /// Materialise every appended suffix, sort ascending, and run-length
    /// encode into parallel `(unique_suffix, count)` arrays. After this call
    /// the segmented representation is replaced by the counted form.
    pub fn count_kmers(&mut self) {
        let mut flat = Vec::with_capacity(self.n_values as usize);

        for (seg_idx, seg) in self.segments.iter().enumerate() {
            let n_in_seg = if seg_idx + 1 == self.segments.len() {
                self.n_values_in_last_segment
            } else {
                self.kmers_per_segment
            };
            for i in 0..n_in_seg {
                let bit_offset = i * self.w_data as u64;
                flat.push(get_value(seg, bit_offset, self.w_data));
            }
        }

        flat.sort_unstable();

        let mut suffixes = Vec::new();
        let mut counts: Vec<u32> = Vec::new();
        for v in flat {
            if suffixes.last().copied() == Some(v) {
                *counts.last_mut().unwrap() += 1;
            } else {
                suffixes.push(v);
                counts.push(1);
            }
        }

        self.counted = Some(CountedBucket { suffixes, counts });
    }

    /// Hand the `(unique, count)` pairs to a consumer (typically
    /// [`crate::writer::Writer::dump_counted_kmers`]). Must be called after
    /// [`Self::count_kmers`].
    pub fn counted(&self) -> &CountedBucket {
        self.counted
            .as_ref()
            .expect("count_kmers() must be called before counted()")
    }

    /// Free both the segmented and counted representations; the bucket is
    /// reusable afterwards.
    pub fn remove_counted_kmers(&mut self) {
        self.segments.clear();
        self.n_values_in_last_segment = 0;
        self.n_values = 0;
        self.counted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_count_preserves_multiset() {
        let mut arr = CountArray::new(0, 10);
        let values = [5u64, 3, 5, 1023, 0, 5, 3];
        for &v in &values {
            arr.append(v);
        }
        assert_eq!(arr.len(), values.len() as u64);

        arr.count_kmers();
        let counted = arr.counted();
        assert_eq!(counted.suffixes, vec![0, 3, 5, 1023]);
        assert_eq!(counted.counts, vec![1, 2, 3, 1]);

        let total: u32 = counted.counts.iter().sum();
        assert_eq!(total as u64, values.len() as u64);
    }

    #[test]
    fn remove_counted_kmers_frees_and_resets() {
        let mut arr = CountArray::new(2, 6);
        arr.append(1);
        arr.append(2);
        arr.count_kmers();
        arr.remove_counted_kmers();
        assert_eq!(arr.len(), 0);
        assert!(arr.is_empty());

        // Reusable: append/count again from scratch.
        arr.append(4);
        arr.count_kmers();
        assert_eq!(arr.counted().suffixes, vec![4]);
    }

    #[test]
    fn spans_multiple_segments() {
        // Tiny w_data so kmers_per_segment is reached quickly but still > 0.
        let w_data = 2;
        let mut arr = CountArray::new(0, w_data);
        let per_seg = SEGMENT_BITS / w_data as u64;
        let total = per_seg * 2 + 5;

        for i in 0..total {
            arr.append(i % 4);
        }
        assert_eq!(arr.len(), total);

        arr.count_kmers();
        let counted = arr.counted();
        let sum: u64 = counted.counts.iter().map(|&c| c as u64).sum();
        assert_eq!(sum, total);
        // Strictly ascending unique suffixes (spec.md testable property #4
        // generalised to the pre-writer representation).
        for w in counted.suffixes.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn ties_collapse_exactly_once() {
        let mut arr = CountArray::new(0, 8);
        for _ in 0..100 {
            arr.append(42);
        }
        arr.count_kmers();
        assert_eq!(arr.counted().suffixes, vec![42]);
        assert_eq!(arr.counted().counts, vec![100]);
    }
}
