//! Integration tests for the glyco binary.
//!
//! These tests verify end-to-end behavior including:
//! - Writing the synthetic day
//! - Single-window and per-day studies
//! - JSON and CSV output
//! - Tolerance of malformed input lines

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("glyco"))
}

/// Write the synthetic day for `date` into a timeline file
fn write_demo(timeline: &Path, date: &str) {
    cli()
        .arg("demo")
        .arg("--date")
        .arg(date)
        .arg("--input")
        .arg(timeline)
        .assert()
        .success();
}

fn demo_timeline(temp_dir: &TempDir) -> PathBuf {
    let timeline = temp_dir.path().join("timeline.jsonl");
    write_demo(&timeline, "2024-03-01");
    timeline
}

fn study_json(timeline: &Path) -> serde_json::Value {
    let output = cli()
        .arg("study")
        .arg("--input")
        .arg(timeline)
        .arg("--json")
        .output()
        .expect("Failed to run study");
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).expect("Study output is not JSON")
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Insulin and glycemia study over pump and sensor data",
        ));
}

#[test]
fn test_demo_writes_timeline() {
    let temp_dir = setup_test_dir();
    let timeline = temp_dir.path().join("data").join("timeline.jsonl");

    cli()
        .arg("demo")
        .arg("--date")
        .arg("2024-03-01")
        .arg("--input")
        .arg(&timeline)
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-03-01"));

    let contents = fs::read_to_string(&timeline).expect("Failed to read timeline");
    let lines: Vec<_> = contents.lines().collect();
    assert!(lines.len() > 288, "Expected a full day of readings");

    for line in lines {
        let _: serde_json::Value = serde_json::from_str(line).expect("Invalid JSON line");
    }
}

#[test]
fn test_study_summary() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);

    cli()
        .arg("study")
        .arg("--input")
        .arg(&timeline)
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-03-01"))
        .stdout(predicate::str::contains("Dosing episodes: 5"))
        .stdout(predicate::str::contains("Range crossings: 2"))
        .stdout(predicate::str::contains("Bolus audit"));
}

#[test]
fn test_study_json_output() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);

    let json = study_json(&timeline);
    assert_eq!(json["label"], "2024-03-01");
    assert_eq!(json["unfinished_episodes"], 0);

    let verdicts = json["verdicts"].as_array().expect("verdicts is an array");
    assert_eq!(verdicts.len(), 5);
    assert_eq!(verdicts[0]["kind"], "correction");
    assert_eq!(verdicts[1]["kind"], "meal");
    // A second meal bolus during breakfast counts as both correction and rescue
    assert_eq!(verdicts[1]["classification"], "inconclusive");

    assert_eq!(json["audits"].as_array().map(Vec::len), Some(6));
    assert_eq!(json["suspensions"].as_array().map(Vec::len), Some(1));
    assert!(json["series"]["iob"].as_array().is_some());
    assert!(json["series"]["glycemia"].as_array().map(Vec::len) >= Some(288));

    assert_eq!(json["daily_carbs"][0]["period"], "breakfast");
    assert_eq!(json["daily_carbs"][0]["grams"], 65.0);
    assert_eq!(json["ratio_changes"].as_array().map(Vec::len), Some(4));
    assert_eq!(json["meal_ratios"].as_array().map(Vec::len), Some(4));
    assert_eq!(json["range_crossings"][0]["crossing"], "hyper_end");
    assert_eq!(json["range_crossings"][1]["crossing"], "hypo_start");
}

#[test]
fn test_study_explicit_window() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);

    let output = cli()
        .arg("study")
        .arg("--input")
        .arg(&timeline)
        .arg("--start")
        .arg("2024-03-01T07:00")
        .arg("--end")
        .arg("2024-03-01T13:00")
        .arg("--label")
        .arg("morning")
        .arg("--json")
        .output()
        .expect("Failed to run study");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["label"], "morning");
    // Breakfast closes at 10:05, lunch is still open at 13:00
    assert_eq!(json["verdicts"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["unfinished_episodes"], 1);
}

#[test]
fn test_study_writes_csv() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);
    let csv_dir = temp_dir.path().join("csv");

    cli()
        .arg("study")
        .arg("--input")
        .arg(&timeline)
        .arg("--csv-dir")
        .arg(&csv_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("CSV written"));

    for name in [
        "series.csv",
        "verdicts.csv",
        "basal_segments.csv",
        "suspensions.csv",
        "audits.csv",
        "daily_carbs.csv",
        "ratio_changes.csv",
        "meal_ratios.csv",
        "range_crossings.csv",
    ] {
        assert!(csv_dir.join(name).exists(), "{} missing", name);
    }

    let verdicts = fs::read_to_string(csv_dir.join("verdicts.csv")).unwrap();
    assert!(verdicts.starts_with("opened_at,closed_at,kind"));
    assert_eq!(verdicts.lines().count(), 6);
}

#[test]
fn test_daily_runs_newest_first() {
    let temp_dir = setup_test_dir();
    let timeline = temp_dir.path().join("timeline.jsonl");
    write_demo(&timeline, "2024-03-01");
    write_demo(&timeline, "2024-03-02");

    let output = cli()
        .arg("daily")
        .arg("--days")
        .arg("2")
        .arg("--input")
        .arg(&timeline)
        .arg("--json")
        .output()
        .expect("Failed to run daily");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let runs = json.as_array().expect("daily output is an array");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["label"], "2024-03-02");
    assert_eq!(runs[1]["label"], "2024-03-01");
}

#[test]
fn test_daily_csv_per_day() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);
    let csv_dir = temp_dir.path().join("daily");

    cli()
        .arg("daily")
        .arg("--days")
        .arg("1")
        .arg("--input")
        .arg(&timeline)
        .arg("--csv-dir")
        .arg(&csv_dir)
        .assert()
        .success();

    assert!(csv_dir.join("2024-03-01").join("series.csv").exists());
}

#[test]
fn test_malformed_lines_are_skipped() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);

    let mut contents = fs::read_to_string(&timeline).unwrap();
    contents.push_str("{ this is not json\n");
    contents.push_str("{\"time\":\"2024-03-01T09:00:00\",\"kind\":\"bolus\"}\n");
    fs::write(&timeline, contents).unwrap();

    cli()
        .arg("study")
        .arg("--input")
        .arg(&timeline)
        .assert()
        .success()
        .stderr(predicate::str::contains("Skipped 2 invalid records"));
}

#[test]
fn test_missing_input_fails() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("study")
        .arg("--input")
        .arg(temp_dir.path().join("absent.jsonl"))
        .assert()
        .failure();
}

#[test]
fn test_empty_timeline_fails() {
    let temp_dir = setup_test_dir();
    let timeline = temp_dir.path().join("timeline.jsonl");
    fs::write(&timeline, "").unwrap();

    cli()
        .arg("study")
        .arg("--input")
        .arg(&timeline)
        .assert()
        .failure()
        .stderr(predicate::str::contains("EmptyTimeline"));
}

#[test]
fn test_inverted_window_fails() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);

    cli()
        .arg("study")
        .arg("--input")
        .arg(&timeline)
        .arg("--start")
        .arg("2024-03-01T12:00")
        .arg("--end")
        .arg("2024-03-01T08:00")
        .assert()
        .failure()
        .stderr(predicate::str::contains("InvalidWindow"));
}

#[test]
fn test_config_overrides_model() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "[model]\ndefault_target = 140.0\n").unwrap();

    let output = cli()
        .arg("study")
        .arg("--config")
        .arg(&config)
        .arg("--input")
        .arg(&timeline)
        .arg("--json")
        .output()
        .expect("Failed to run study");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["verdicts"][0]["target"], 140.0);
}

#[test]
fn test_oversized_activity_window_is_rejected() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "[model]\ninsulin_activity_minutes = 4611686018427387903\n").unwrap();

    cli()
        .arg("study")
        .arg("--config")
        .arg(&config)
        .arg("--input")
        .arg(&timeline)
        .assert()
        .failure()
        .stderr(predicate::str::contains("insulin_activity_minutes"));
}

#[test]
fn test_invalid_config_fails() {
    let temp_dir = setup_test_dir();
    let timeline = demo_timeline(&temp_dir);
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "[model]\ninsulin_activity_minutes = 0\n").unwrap();

    cli()
        .arg("study")
        .arg("--config")
        .arg(&config)
        .arg("--input")
        .arg(&timeline)
        .assert()
        .failure();
}
