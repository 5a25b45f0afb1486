//! Integration tests for the medisynth binary.
//!
//! These tests verify end-to-end behavior including:
//! - Record creation and persistence across invocations
//! - Allocation and assignment bookkeeping
//! - Cascading patient removal
//! - Criticality scoring and roster export

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// CLI bound to an isolated data and config directory
fn cli(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("medisynth"));
    cmd.env("XDG_CONFIG_HOME", dir.join("config"))
        .env("RUST_LOG", "warn")
        .arg("--data-dir")
        .arg(dir.join("data"));
    cmd
}

fn run(dir: &Path, args: &[&str]) {
    cli(dir).args(args).assert().success();
}

fn show(dir: &Path, kind: &str, id: &str) -> serde_json::Value {
    let output = cli(dir)
        .args([kind, "show", id])
        .output()
        .expect("Failed to run show");
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).expect("show prints JSON")
}

fn seed(dir: &Path) {
    run(dir, &["patient", "add", "--id", "p1", "--name", "Asha Verma", "--age", "67"]);
    run(dir, &["patient", "add", "--id", "p2"]);
    run(dir, &["resource", "add", "vent", "--name", "Ventilator", "--total", "1"]);
    run(dir, &["staff", "add", "s1", "--name", "Dr. Okafor", "--role", "physician"]);
}

#[test]
fn test_cli_help() {
    Command::new(assert_cmd::cargo::cargo_bin!("medisynth"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Hospital records, resource allocation and criticality scoring",
        ));
}

#[test]
fn test_config_loading_is_logged() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();

    cli(dir)
        .env_remove("RUST_LOG")
        .args(["patient", "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No config file found"));

    // A configured level applies to everything logged after loading
    let config_dir = dir.join("config/medisynth");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "[logging]\nlevel = \"warn\"\n").unwrap();

    cli(dir)
        .env_remove("RUST_LOG")
        .args(["patient", "add", "--id", "p1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Loaded config"))
        .stderr(predicate::str::contains("Created patient").not());
}

#[test]
fn test_records_persist_between_runs() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);

    assert!(dir.join("data/records.json").exists());

    let patient = show(dir, "patient", "p1");
    assert_eq!(patient["patient_info"]["name"], "Asha Verma");
    assert_eq!(patient["patient_info"]["age"], 67.0);

    let resource = show(dir, "resource", "vent");
    assert_eq!(resource["total"], 1);
    assert_eq!(resource["available"], 1);
}

#[test]
fn test_allocation_updates_both_sides() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);

    cli(dir)
        .args(["allocate", "p1", "vent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Allocated vent to patient p1"));

    let resource = show(dir, "resource", "vent");
    assert_eq!(resource["available"], 0);
    assert_eq!(resource["allocated_patients"], serde_json::json!(["p1"]));
    let patient = show(dir, "patient", "p1");
    assert_eq!(patient["resources_allocated"], serde_json::json!(["vent"]));

    // Capacity exhausted
    cli(dir)
        .args(["allocate", "p2", "vent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unavailable"));

    cli(dir).arg("audit").assert().success();
}

#[test]
fn test_deallocate_unallocated_pair_fails() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);

    cli(dir)
        .args(["deallocate", "p2", "vent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotAllocated"));
}

#[test]
fn test_unknown_patient_is_not_found() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);

    cli(dir)
        .args(["assign", "ghost", "s1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
}

#[test]
fn test_assignment_and_staff_patients() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);
    run(dir, &["assign", "p1", "s1"]);

    cli(dir)
        .args(["assign", "p1", "s1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AlreadyAssigned"));

    let output = cli(dir).args(["staff", "patients", "s1"]).output().unwrap();
    let patients: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(patients.as_array().unwrap().len(), 1);
    assert_eq!(patients[0]["id"], "p1");

    run(dir, &["unassign", "p1", "s1"]);
    assert_eq!(show(dir, "staff", "s1")["patients_assigned"], serde_json::json!([]));
}

#[test]
fn test_remove_patient_releases_everything() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);
    run(dir, &["allocate", "p1", "vent"]);
    run(dir, &["assign", "p1", "s1"]);

    cli(dir)
        .args(["patient", "remove", "p1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"deallocated\""));

    cli(dir).args(["patient", "show", "p1"]).assert().failure();
    assert_eq!(show(dir, "resource", "vent")["available"], 1);
    assert_eq!(show(dir, "staff", "s1")["patients_assigned"], serde_json::json!([]));
    cli(dir).arg("audit").assert().success();
}

#[test]
fn test_manual_data_and_score() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);

    run(
        dir,
        &[
            "patient",
            "manual",
            "p1",
            "--field",
            "RestingBP=180",
            "--field",
            "ExerciseAngina=Y",
            "--field",
            "ST_Slope=Down",
        ],
    );

    let output = cli(dir).args(["patient", "score", "p1"]).output().unwrap();
    assert!(output.status.success());
    let assessment: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(assessment["score"].as_f64().unwrap() > 2.125);
    assert_eq!(assessment["breakdown"].as_array().unwrap().len(), 8);

    let patient = show(dir, "patient", "p1");
    assert_eq!(patient["criticality_score"], assessment["score"]);
    assert_eq!(patient["manual_data"]["RestingBP"], 180.0);
}

#[test]
fn test_ingest_lab_extraction_creates_patient() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    let report = dir.join("report.json");
    fs::write(
        &report,
        r#"{
            "patient_info": {"name": "R. Iyer", "age": 71},
            "anomalies": [{"test_name": "Mean Platelet Volume", "result": 13.1, "reference_range": "6.5-12.0", "unit": "fL"}],
            "vitals": {"ChestPainType": "NAP"},
            "lab_results": {"Hemoglobin": 10.9}
        }"#,
    )
    .unwrap();

    cli(dir)
        .args(["patient", "ingest", "p7", "--file"])
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Mean Platelet Volume"));

    let patient = show(dir, "patient", "p7");
    assert_eq!(patient["vitals"]["ChestPainType"], "NAP");
    assert_eq!(patient["anomalies"].as_array().unwrap().len(), 1);
}

#[test]
fn test_roster_export() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);
    run(dir, &["patient", "manual", "p2", "--field", "RestingBP=180"]);
    run(dir, &["patient", "score", "p1"]);
    run(dir, &["patient", "score", "p2"]);

    cli(dir)
        .arg("roster")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 2 patients"));

    let csv = fs::read_to_string(dir.join("data/roster.csv")).unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("p2,"));
    assert!(lines[2].starts_with("p1,Asha Verma,"));
}

#[test]
fn test_audit_reports_drift() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    seed(dir);
    run(dir, &["allocate", "p1", "vent"]);

    // Corrupt the resource side by hand
    let path = dir.join("data/records.json");
    let mut records: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    records["resources"]["vent"]["allocated_patients"] = serde_json::json!([]);
    fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    cli(dir)
        .arg("audit")
        .assert()
        .failure()
        .stdout(predicate::str::contains("without a back-reference"));
}
