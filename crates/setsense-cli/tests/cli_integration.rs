//! CLI integration tests.
//!
//! These run the built `setsense` binary. None of them need a sensor.

use std::process::{Command, Output};

use setsense_store::Store;
use setsense_types::WorkoutRecord;
use time::macros::datetime;
use uuid::Uuid;

fn run_setsense(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_setsense"))
        .args(args)
        .env_remove("SETSENSE_DATABASE")
        .output()
        .expect("Failed to run setsense binary")
}

fn record(user: &str, machine: &str, minute: u8) -> WorkoutRecord {
    WorkoutRecord {
        id: Uuid::new_v4(),
        user_id: user.to_string(),
        machine_name: machine.to_string(),
        sets: 2,
        reps: 8,
        completed_at: datetime!(2026-02-10 07:00:00 UTC).replace_minute(minute).unwrap(),
        set_reps_completed: vec![8, 8],
        set_rest_times: vec![45, 0],
        duration_seconds: 300,
    }
}

#[test]
fn test_help() {
    let output = run_setsense(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["scan", "workout", "history", "config"] {
        assert!(stdout.contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_version() {
    let output = run_setsense(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("setsense"));
}

#[test]
fn test_history_json_from_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workouts.db");
    {
        let store = Store::open(&path).unwrap();
        store.append_workout(&record("alex", "Row", 1)).unwrap();
        store.append_workout(&record("alex", "Squat", 2)).unwrap();
        store.append_workout(&record("sam", "Row", 3)).unwrap();
    }

    let db = path.to_str().unwrap();
    let output = run_setsense(&["history", "--database", db, "--user", "alex", "-f", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let records: Vec<WorkoutRecord> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].machine_name, "Squat");

    let output = run_setsense(&[
        "history", "--database", db, "--user", "alex", "--machine", "Row", "-f", "json",
    ]);
    let records: Vec<WorkoutRecord> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn test_history_stats() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workouts.db");
    {
        let store = Store::open(&path).unwrap();
        store.append_workout(&record("alex", "Row", 1)).unwrap();
        store.append_workout(&record("alex", "Row", 2)).unwrap();
    }

    let db = path.to_str().unwrap();
    let output = run_setsense(&["history", "--database", db, "-u", "alex", "--stats", "-f", "json"]);
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["workouts"], 2);
    assert_eq!(stats["total_reps"], 32);
}

#[test]
fn test_history_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.db");
    let output = run_setsense(&["history", "--database", path.to_str().unwrap(), "-u", "nobody"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No workouts found."));
}

#[test]
fn test_config_path() {
    let output = run_setsense(&["config", "path"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("config.toml"));
}
