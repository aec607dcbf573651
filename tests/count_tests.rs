//! End-to-end tests driving the `count` subcommand as a subprocess, per the
//! scenario table in spec.md §8.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use kmerspill::writer::read_all_blocks;

fn base_code(b: u8) -> u64 {
    match b {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => panic!("not a base: {}", b as char),
    }
}

fn kmer_to_str(mut kmer: u64, k: u8) -> String {
    let mut chars = vec![0u8; k as usize];
    for i in (0..k as usize).rev() {
        chars[i] = match kmer & 0b11 {
            0 => b'A',
            1 => b'C',
            2 => b'G',
            3 => b'T',
            _ => unreachable!(),
        };
        kmer >>= 2;
    }
    String::from_utf8(chars).unwrap()
}

fn str_to_kmer(s: &str) -> u64 {
    s.bytes().fold(0u64, |acc, b| (acc << 2) | base_code(b))
}

/// Writes `records` as a FASTA file, runs `count`, and returns the merged
/// (kmer-as-string, count) pairs read back out of every final output file.
fn run_count(
    k: u8,
    records: &[&str],
    memory: Option<u64>,
    num_files: Option<u32>,
    operation: Option<&str>,
) -> Vec<(String, u64)> {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("input.fasta");
    {
        let mut f = File::create(&input_path).unwrap();
        for (i, record) in records.iter().enumerate() {
            writeln!(f, ">seq{i}\n{record}").unwrap();
        }
    }
    let output_prefix = dir.path().join("out");

    let mut cmd = Command::cargo_bin("kmerspill").unwrap();
    cmd.arg("count")
        .arg("-k")
        .arg(k.to_string())
        .arg("-i")
        .arg(&input_path)
        .arg("-o")
        .arg(&output_prefix)
        .arg("--num-files")
        .arg(num_files.unwrap_or(1).to_string());

    if let Some(m) = memory {
        cmd.arg("--memory").arg(m.to_string());
    }
    if let Some(op) = operation {
        cmd.arg("--operation").arg(op);
    }

    cmd.assert().success();

    collect_all_counts(&output_prefix, k, num_files.unwrap_or(1))
}

fn collect_all_counts(output_prefix: &Path, k: u8, num_files: u32) -> Vec<(String, u64)> {
    let mut out = Vec::new();
    for f in 0..num_files {
        let mut path: PathBuf = output_prefix.to_path_buf();
        let mut name = path.file_name().unwrap().to_os_string();
        name.push(format!(".{f}.kmerspill"));
        path.set_file_name(name);
        if !path.exists() {
            continue;
        }
        for block in read_all_blocks(&path).unwrap() {
            for (kmer, count) in block.entries {
                out.push((kmer_to_str(kmer, k), count));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn scenario_acgt_canonical_collapses_to_single_kmer() {
    // spec.md §8 scenario 1
    let counts = run_count(3, &["ACGT"], None, None, None);
    assert_eq!(counts, vec![("ACG".to_string(), 2)]);
}

#[test]
fn scenario_aaaa_counts_canonical_aaa_twice() {
    // spec.md §8 scenario 2
    let counts = run_count(3, &["AAAA"], None, None, None);
    assert_eq!(counts, vec![("AAA".to_string(), 2)]);
}

#[test]
fn scenario_ambiguous_base_skips_overlapping_windows() {
    // spec.md §8 scenario 3
    let counts = run_count(3, &["ACNACG"], None, None, None);
    assert_eq!(counts, vec![("ACG".to_string(), 1)]);
}

#[test]
fn scenario_acgacg_produces_four_distinct_canonical_windows() {
    // spec.md §8 scenario 4
    let counts = run_count(3, &["ACGACG"], None, None, None);
    assert_eq!(
        counts,
        vec![
            ("ACG".to_string(), 2),
            ("CGA".to_string(), 1),
            ("GAC".to_string(), 1),
        ]
    );
}

#[test]
fn scenario_count_forward_is_not_canonicalised() {
    // spec.md §8 scenario 5
    let counts = run_count(3, &["ACGT"], None, None, Some("count-forward"));
    assert_eq!(counts, vec![("ACG".to_string(), 1), ("CGT".to_string(), 1)]);
}

#[test]
fn scenario_count_reverse_emits_revcomp_strand() {
    // spec.md §8 scenario 6
    let counts = run_count(3, &["ACGT"], None, None, Some("count-reverse"));
    assert_eq!(counts, vec![("ACG".to_string(), 1), ("CGT".to_string(), 1)]);
}

#[test]
fn forced_multi_iteration_merges_to_the_same_totals_as_one_pass() {
    // Even at k=3 the smallest feasible bucket layout holds ~512KiB, so the
    // small budget below still has to clear minMemory/32 or the estimator
    // rejects the run outright. 20000 bytes forces several flush rounds
    // without tripping that fatal precondition.
    let record = "ACG".repeat(20_000);
    let small_memory = run_count(3, &[record.as_str()], Some(20_000), None, None);
    let big_memory = run_count(3, &[record.as_str()], Some(1 << 30), None, None);
    assert_eq!(small_memory, big_memory);

    let total: u64 = small_memory.iter().map(|(_, c)| c).sum();
    assert_eq!(total, record.len() as u64 - 3 + 1);
}

#[test]
fn multiple_records_reset_the_window_between_sequences() {
    // "AC" + "GT" must not be treated as one continuous "ACGT": each record
    // is too short alone to ever complete a k=3 window.
    let counts = run_count(3, &["AC", "GT"], None, None, None);
    assert!(counts.is_empty());
}

#[test]
fn invalid_kmer_size_zero_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("in.fasta");
    fs::write(&input_path, ">s\nACGT\n").unwrap();
    let output_prefix = dir.path().join("out");

    let mut cmd = Command::cargo_bin("kmerspill").unwrap();
    cmd.arg("count")
        .arg("-k")
        .arg("0")
        .arg("-i")
        .arg(&input_path)
        .arg("-o")
        .arg(&output_prefix);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid k-mer size: 0"));
}

#[test]
fn invalid_kmer_size_above_32_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("in.fasta");
    fs::write(&input_path, ">s\nACGT\n").unwrap();
    let output_prefix = dir.path().join("out");

    let mut cmd = Command::cargo_bin("kmerspill").unwrap();
    cmd.arg("count")
        .arg("-k")
        .arg("33")
        .arg("-i")
        .arg(&input_path)
        .arg("-o")
        .arg(&output_prefix);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid k-mer size: 33"));
}

#[test]
fn missing_input_file_is_reported_before_running() {
    let dir = TempDir::new().unwrap();
    let output_prefix = dir.path().join("out");

    let mut cmd = Command::cargo_bin("kmerspill").unwrap();
    cmd.arg("count")
        .arg("-k")
        .arg("5")
        .arg("-i")
        .arg(dir.path().join("does_not_exist.fasta"))
        .arg("-o")
        .arg(&output_prefix);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn infeasible_memory_budget_fails_with_too_many_iterations() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("in.fasta");
    // A long-ish repetitive sequence so the estimator sees plenty of kmers
    // relative to an absurdly tiny memory budget.
    let seq = "ACGT".repeat(5000);
    fs::write(&input_path, format!(">s\n{seq}\n")).unwrap();
    let output_prefix = dir.path().join("out");

    let mut cmd = Command::cargo_bin("kmerspill").unwrap();
    cmd.arg("count")
        .arg("-k")
        .arg("16")
        .arg("-i")
        .arg(&input_path)
        .arg("-o")
        .arg(&output_prefix)
        .arg("--memory")
        .arg("1");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("iterations"));
}

#[test]
fn str_to_kmer_and_kmer_to_str_round_trip() {
    for s in ["A", "ACG", "ACGTACGT", "TTTTTTTTTTTTTTTT"] {
        let k = s.len() as u8;
        assert_eq!(kmer_to_str(str_to_kmer(s), k), s);
    }
}
