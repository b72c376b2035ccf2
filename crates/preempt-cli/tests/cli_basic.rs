//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own temporary data directory.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_preempt"))
        .args(args)
        .env("PREEMPT_DATA_DIR", data_dir)
        .env_remove("PREEMPT_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_ok(data_dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    stdout
}

#[test]
fn test_config_get_set() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run_ok(dir.path(), &["config", "get", "pomodoro.focus_minutes"]).trim(), "25");

    run_ok(dir.path(), &["config", "set", "pomodoro.focus_minutes", "30"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "pomodoro.focus_minutes"]).trim(), "30");
    assert!(dir.path().join("config.toml").exists());

    let (_, stderr, code) = run_cli(dir.path(), &["config", "set", "pomodoro.nope", "1"]);
    assert_eq!(code, 1);
    assert!(stderr.starts_with("error:"));
}

#[test]
fn test_config_list() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = run_ok(dir.path(), &["config", "list"]);
    assert!(stdout.contains("horizon.days = 7"));
    assert!(stdout.contains("prediction.spread_multiplier = 1.5"));
}

#[test]
fn test_plan_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = run_ok(
        dir.path(),
        &["context", "add", "Work", "--start", "09:00", "--end", "17:00", "--buffer", "10"],
    );
    assert!(stdout.contains("Context created:"));

    let stdout = run_ok(dir.path(), &["task", "add", "Write report", "-c", "work", "-m", "90"]);
    assert!(stdout.contains("Task created:"));

    let stdout = run_ok(
        dir.path(),
        &["timeline", "--from", "2024-03-04", "--days", "1", "--json"],
    );
    let schedule: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let focus = schedule["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "focus")
        .count();
    assert_eq!(focus, 4);

    let stdout = run_ok(dir.path(), &["task", "list", "--json"]);
    let tasks: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(tasks[0]["status"], "scheduled");

    let stdout = run_ok(dir.path(), &["task", "complete", "Write report"]);
    assert!(stdout.contains("Task completed:"));
    let stdout = run_ok(dir.path(), &["task", "list", "--status", "completed"]);
    assert!(stdout.contains("Write report"));
}

#[test]
fn test_observations_shift_the_prediction() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(
        dir.path(),
        &["context", "add", "Work", "--start", "09:00", "--end", "17:00"],
    );
    for date in ["2024-02-05", "2024-02-12", "2024-02-19", "2024-02-26", "2024-01-29"] {
        let stdout = run_ok(
            dir.path(),
            &["context", "observe", "Work", "--date", date, "--start", "09:12", "--end", "17:00"],
        );
        assert!(stdout.contains("start +12m"));
    }

    let stdout = run_ok(
        dir.path(),
        &["context", "show", "Work", "--from", "2024-03-04", "--days", "1", "--json"],
    );
    let shown: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(shown["windows"][0]["start"]["expected"], "2024-03-04T09:12:00Z");
    assert_eq!(shown["windows"][0]["start"]["sample_count"], 5);
}

#[test]
fn test_unknown_context_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["task", "add", "Lost", "-c", "Nowhere", "-m", "30"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_dependency_cycle_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["context", "add", "Work", "--start", "09:00", "--end", "17:00"]);
    run_ok(dir.path(), &["task", "add", "Design", "-c", "Work", "-m", "30"]);
    run_ok(dir.path(), &["task", "add", "Build", "-c", "Work", "-m", "30", "--after", "Design"]);

    let (_, stderr, code) = run_cli(dir.path(), &["task", "depend", "Design", "Build"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("cycle"), "{stderr}");
}

#[test]
fn test_timeline_starts_now_by_default() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["context", "add", "Work", "--start", "09:00", "--end", "17:00"]);
    run_ok(dir.path(), &["task", "add", "Inbox", "-c", "Work", "-m", "30"]);

    let before = chrono::Utc::now();
    let stdout = run_ok(dir.path(), &["timeline", "--days", "2", "--json"]);
    let after = chrono::Utc::now();

    let schedule: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let start: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(schedule["horizon"]["start"].clone()).unwrap();
    assert!(start >= before - chrono::Duration::seconds(1) && start <= after);
    for entry in schedule["entries"].as_array().unwrap() {
        let entry_start: chrono::DateTime<chrono::Utc> =
            serde_json::from_value(entry["start_time"].clone()).unwrap();
        assert!(entry_start >= start);
    }
}
