//! A bit-packed hash table over canonical k-mers, mapping each k-mer to its
//! occurrence positions, plus a byte-for-byte text dump matching the
//! original tool's grammar (spec.md §4.7, ported from
//! `original_source/src/meryl-san/libkmer/positionDB-dump.C`).
//!
//! This is a diagnostic structure, separate from the count/spill path in
//! [`crate::driver`]: it is built once, fully in memory, from a finished set
//! of (kmer, position) observations, and exists to answer "which positions
//! did this k-mer occur at" and to support the `dump` grammar exactly.

use std::io::{self, Write};

use crate::bitstream::{bytes_for_bits, get_value, get_values, set_value, set_values};

fn bits_needed(max_value: u64) -> u32 {
    if max_value == 0 {
        1
    } else {
        64 - max_value.leading_zeros()
    }
}

pub struct PositionDb {
    hash_width: u32,
    chck_width: u32,
    pptr_width: u32,
    size_width: u32,
    posn_width: u32,
    w_fin: u32,

    table_size_in_entries: u64,
    hash_table: Vec<u8>,

    n_bucket_entries: u64,
    buckets: Vec<u8>,

    positions: Vec<u8>,
}

impl PositionDb {
    /// Build the table from every (kmer, position) observation. `hash_bits`
    /// selects how many low bits of the kmer address the hash table; the
    /// remaining bits up to `chck_width` above that serve as the check value
    /// disambiguating a bucket's entries without a full kmer compare.
    pub fn build(observations: &[(u64, u64)], hash_bits: u32, chck_width: u32) -> Self {
        use std::collections::BTreeMap;

        let hash_mask = if hash_bits == 64 { u64::MAX } else { (1u64 << hash_bits) - 1 };
        let chck_mask = if chck_width == 64 { u64::MAX } else { (1u64 << chck_width) - 1 };

        let mut by_kmer: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for &(kmer, pos) in observations {
            by_kmer.entry(kmer).or_default().push(pos);
        }

        // Group kmers by hash bucket, keeping a stable order within a
        // bucket (ascending chk) so the dump is deterministic.
        let mut per_bucket: Vec<Vec<(u64, u64, Vec<u64>)>> =
            vec![Vec::new(); 1usize << hash_bits];
        for (kmer, positions) in by_kmer {
            let hash = (kmer & hash_mask) as usize;
            let chk = (kmer >> hash_bits) & chck_mask;
            per_bucket[hash].push((chk, kmer, positions));
        }
        for bucket in per_bucket.iter_mut() {
            bucket.sort_by_key(|&(chk, _, _)| chk);
        }

        let max_position = observations.iter().map(|&(_, p)| p).max().unwrap_or(0);
        let posn_width = bits_needed(max_position).max(1);

        // First pass: lay out the positions array for multi-occurrence
        // kmers and record each one's (posn-unit) start index.
        let mut positions_bits: u64 = 0;
        let mut pos_index_of: Vec<Option<u64>> = Vec::new();
        let mut flat_buckets: Vec<(u64, u64, u64, u64)> = Vec::new(); // (chk, pos_field, dup, siz)

        for bucket in &per_bucket {
            for (chk, _kmer, positions) in bucket {
                let siz = positions.len() as u64;
                if positions.len() == 1 {
                    flat_buckets.push((*chk, positions[0], 1, siz));
                    pos_index_of.push(None);
                } else {
                    let start_unit = positions_bits / posn_width as u64;
                    flat_buckets.push((*chk, start_unit, 0, siz));
                    positions_bits += posn_width as u64 * (1 + positions.len() as u64);
                    pos_index_of.push(Some(start_unit));
                }
            }
        }

        let n_bucket_entries = flat_buckets.len() as u64;

        let max_pptr = flat_buckets
            .iter()
            .map(|&(_, p, _, _)| p)
            .max()
            .unwrap_or(0);
        let pptr_width = bits_needed(max_pptr).max(1);

        let max_siz = flat_buckets.iter().map(|&(_, _, _, s)| s).max().unwrap_or(0);
        let size_width = bits_needed(max_siz).max(1);

        let w_fin = chck_width + pptr_width + 1 + size_width;

        let mut buckets = vec![0u8; bytes_for_bits(n_bucket_entries * w_fin as u64)];
        let widths = [chck_width, pptr_width, 1, size_width];
        for (i, &(chk, pos_field, dup, siz)) in flat_buckets.iter().enumerate() {
            let bit_offset = i as u64 * w_fin as u64;
            set_values(&mut buckets, bit_offset, &widths, &[chk, pos_field, dup, siz]);
        }

        let mut positions = vec![0u8; bytes_for_bits(positions_bits)];
        {
            let mut flat_idx = 0usize;
            for bucket in &per_bucket {
                for (_chk, _kmer, kmer_positions) in bucket {
                    if kmer_positions.len() > 1 {
                        if let Some(start_unit) = pos_index_of[flat_idx] {
                            let mut bit = start_unit * posn_width as u64;
                            set_value(&mut positions, bit, posn_width, kmer_positions.len() as u64);
                            bit += posn_width as u64;
                            for &p in kmer_positions {
                                set_value(&mut positions, bit, posn_width, p);
                                bit += posn_width as u64;
                            }
                        }
                    }
                    flat_idx += 1;
                }
            }
        }

        // Hash table: cumulative counts per bucket, plus a trailing
        // sentinel equal to the total entry count.
        let table_size_in_entries = 1u64 << hash_bits;
        let counts: Vec<u64> = per_bucket.iter().map(|b| b.len() as u64).collect();
        let hash_width = bits_needed(n_bucket_entries).max(1);
        let mut hash_table = vec![0u8; bytes_for_bits((table_size_in_entries + 1) * hash_width as u64)];
        let mut running = 0u64;
        for h in 0..table_size_in_entries as usize {
            set_value(&mut hash_table, h as u64 * hash_width as u64, hash_width, running);
            running += counts[h];
        }
        set_value(
            &mut hash_table,
            table_size_in_entries * hash_width as u64,
            hash_width,
            running,
        );

        PositionDb {
            hash_width,
            chck_width,
            pptr_width,
            size_width,
            posn_width,
            w_fin,
            table_size_in_entries,
            hash_table,
            n_bucket_entries,
            buckets,
            positions,
        }
    }

    pub fn table_size_in_entries(&self) -> u64 {
        self.table_size_in_entries
    }

    pub fn n_bucket_entries(&self) -> u64 {
        self.n_bucket_entries
    }

    fn bucket_range(&self, h: u64) -> (u64, u64) {
        let st = get_value(&self.hash_table, h * self.hash_width as u64, self.hash_width);
        let ed = get_value(
            &self.hash_table,
            (h + 1) * self.hash_width as u64,
            self.hash_width,
        );
        (st, ed)
    }

    /// Write the text dump: one `B <h> <st>-<ed>` header line per hash
    /// bucket, followed by one `D`/`U` line per occupied slot in that
    /// bucket's range, in the exact shape
    /// `positionDB-dump.C` produces.
    pub fn dump_to_writer(&self, w: &mut impl Write) -> io::Result<()> {
        let widths = [self.chck_width, self.pptr_width, 1, self.size_width];

        for h in 0..self.table_size_in_entries {
            let (st, ed) = self.bucket_range(h);
            writeln!(w, "B {h} {st}-{ed}")?;

            for i in st..ed {
                let cb = i * self.w_fin as u64;
                let mut vals = [0u64; 4];
                get_values(&self.buckets, cb, &widths, &mut vals);
                let (chk, pos, dup, siz) = (vals[0], vals[1], vals[2], vals[3]);

                write!(w, "{} chk={:x} pos={} siz={}", if dup == 0 { 'D' } else { 'U' }, chk, pos, siz)?;

                if dup == 0 {
                    let mut p = pos * self.posn_width as u64;
                    let len = get_value(&self.positions, p, self.posn_width);
                    p += self.posn_width as u64;
                    for _ in 0..len {
                        write!(w, " {}", get_value(&self.positions, p, self.posn_width))?;
                        p += self.posn_width as u64;
                    }
                }

                writeln!(w)?;
            }
        }

        Ok(())
    }
}
