use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

use spotdump::extract::Extractor;
use spotdump::format::{JoinOptions, LayoutMode};
use spotdump::io::TempRegistry;
use spotdump::stats::JoinStats;
use spotdump::table::FlatTable;

const TABLE: &str = "\
# two paired spots, one single-fragment spot, one with a technical fragment
spot1\tAAAATTTT\t!!!!####\t4,4\t1,1
spot2\tCCCCGGGG\t$$$$%%%%\t4,4\t1,1
spot3\tACGT\t!!!!\t4\t1
spot4\tNNNNACGT\t####!!!!\t4,4\t0,1
";

#[test]
fn test_split_3_pipeline_end_to_end() {
    let table = FlatTable::parse(TABLE).expect("parse table");
    let temp = tempfile::tempdir().expect("create temp dir");
    let out = tempfile::tempdir().expect("create out dir");
    let registry = TempRegistry::new();

    let options = JoinOptions {
        skip_tech: true,
        ..JoinOptions::default()
    };
    let mut stats = JoinStats::default();
    Extractor::new(&table, "SRR1")
        .num_threads(3)
        .run_partitioned(
            LayoutMode::FastqSplit3,
            &options,
            temp.path(),
            &registry,
            &mut stats,
        )
        .expect("join failed");

    assert_eq!(stats.spots_read, 4);
    assert_eq!(stats.reads_read, 7);
    // spot1/spot2 pair up, spot3 and the biological half of spot4 go unpaired
    assert_eq!(stats.reads_written, 6);
    assert_eq!(stats.reads_technical, 1);

    registry
        .concatenate(out.path(), "SRR1", "fastq")
        .expect("concatenate failed");

    let unpaired = fs::read_to_string(out.path().join("SRR1.fastq")).unwrap();
    assert_eq!(
        unpaired,
        "@spot3 length=4\nACGT\n+\n!!!!\n@spot4 length=4\nACGT\n+\n!!!!\n"
    );
    let mate1 = fs::read_to_string(out.path().join("SRR1_1.fastq")).unwrap();
    assert_eq!(
        mate1,
        "@spot1 length=4\nAAAA\n+\n!!!!\n@spot2 length=4\nCCCC\n+\n$$$$\n"
    );
    let mate2 = fs::read_to_string(out.path().join("SRR1_2.fastq")).unwrap();
    assert_eq!(
        mate2,
        "@spot1 length=4\nTTTT\n+\n####\n@spot2 length=4\nGGGG\n+\n%%%%\n"
    );
}

#[test]
fn test_cli_writes_fastq_and_summary() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("run.tsv");
    fs::write(&input, TABLE).unwrap();

    Command::cargo_bin("spotdump")
        .unwrap()
        .args([
            "-i",
            input.to_str().unwrap(),
            "-o",
            dir.path().to_str().unwrap(),
            "--split-spot",
            "--threads",
            "2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("run.tsv\t4\t7\t7\t"));

    let fastq = fs::read_to_string(dir.path().join("run.fastq")).unwrap();
    assert_eq!(fastq.lines().count(), 4 * 7);
    assert!(fastq.starts_with("@spot1 length=4\nAAAA\n+\n!!!!\n"));
    // no temp partitions left behind
    assert!(!dir
        .path()
        .read_dir()
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().ends_with(".tmp")));
}

#[test]
fn test_cli_fast_path_to_stdout() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("run.tsv");
    fs::write(&input, "only\tACGTACGT\t!!!!!!!!\t4,4\t1,1\n").unwrap();

    Command::cargo_bin("spotdump")
        .unwrap()
        .args([
            "-i",
            input.to_str().unwrap(),
            "--fast",
            "--stdout",
            "--threads",
            "1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(">only length=4\nACGT\n>only length=4\nACGT\n"));
}

#[test]
fn test_cli_strict_fails_on_corrupt_table() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("bad.tsv");
    // READ_LEN declares more bases than READ holds
    fs::write(&input, ".\tACGT\t!!!!\t4,4\t1,1\n").unwrap();

    Command::cargo_bin("spotdump")
        .unwrap()
        .args([
            "-i",
            input.to_str().unwrap(),
            "-o",
            dir.path().to_str().unwrap(),
            "--split-spot",
            "--strict",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("row #1"));
}
