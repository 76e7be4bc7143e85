#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn agent(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("backup-agent").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("BACKUP_AGENT_CONFIG", config_path(dir))
        .env_remove("RUST_LOG");
    cmd
}

fn config_path(dir: &TempDir) -> PathBuf {
    dir.path().join("config.yaml")
}

/// Write a `command` method config that runs `program <src> <dst>`.
fn write_config(dir: &TempDir, program: &str, extra: &str) {
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    let yaml = format!(
        "command:\n  from: \"{}\"\n  to: \"{}\"\n  program: \"{program}\"\nstate_dir: \"{}\"\n{extra}",
        src.display(),
        dir.path().join("dst").display(),
        dir.path().join("state").display(),
    );
    std::fs::write(config_path(dir), yaml).unwrap();
}

fn read_status(dir: &TempDir) -> serde_json::Value {
    let data = std::fs::read_to_string(dir.path().join("state/status.json")).unwrap();
    serde_json::from_str(&data).unwrap()
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_default_config() {
    let dir = TempDir::new().unwrap();
    agent(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    let content = std::fs::read_to_string(config_path(&dir)).unwrap();
    assert!(content.contains("rsync:"));
    assert!(content.contains("poll_interval_secs"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    std::fs::write(config_path(&dir), "# mine\n").unwrap();

    agent(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(config_path(&dir)).unwrap(), "# mine\n");

    agent(&dir).args(["init", "--force"]).assert().success();
    assert!(std::fs::read_to_string(config_path(&dir))
        .unwrap()
        .contains("rsync:"));
}

#[test]
fn default_config_loads() {
    let dir = TempDir::new().unwrap();
    agent(&dir).arg("init").assert().success();
    // rsync may be missing on the test host, which only fails validation
    agent(&dir)
        .args(["check", "--json"])
        .assert()
        .stdout(predicate::str::contains("\"method\": \"rsync\""));
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[test]
fn check_fails_without_config() {
    let dir = TempDir::new().unwrap();
    agent(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn check_rejects_two_method_sections() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        config_path(&dir),
        "rsync:\n  from: /a\n  to: /b\nrclone:\n  from: /a\n  to: remote:b\n",
    )
    .unwrap();
    agent(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("more than one backup method section"));
}

#[test]
fn check_reports_command_line_and_verdict() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");

    let output = agent(&dir).args(["check", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["method"], "command");
    assert_eq!(value["can_backup"], true);
    assert_eq!(value["precondition"], "always");
    let argv = value["command_line"].as_array().unwrap();
    assert_eq!(argv.len(), 3);
    assert_eq!(argv[0], "true");
}

#[test]
fn check_fails_when_program_is_missing() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "__no_such_backup_tool__", "");
    agent(&dir)
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("not found on PATH"));
}

// ---------------------------------------------------------------------------
// run --once
// ---------------------------------------------------------------------------

#[test]
fn run_once_success_records_status() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");

    agent(&dir)
        .args(["run", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup succeeded"));

    let status = read_status(&dir);
    assert_eq!(status["state"], "succeeded");
    assert!(status["run_id"].is_string());
}

#[test]
fn run_once_failure_exits_nonzero_with_code() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "false", "");

    agent(&dir)
        .args(["run", "--once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("backup failed"));

    let status = read_status(&dir);
    assert_eq!(status["state"], "failed");
    assert_eq!(status["reason"]["type"], "exit_code");
    assert_eq!(status["reason"]["code"], 1);
}

#[test]
fn run_once_skips_when_precondition_fails() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "true",
        "preconditions:\n  - type: command\n    command: \"false\"\n",
    );

    agent(&dir)
        .args(["run", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("preconditions not met"));
    assert_eq!(read_status(&dir)["state"], "skipped_precondition_not_met");
}

#[test]
fn run_once_events_prints_json_lines() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");

    let output = agent(&dir)
        .args(["run", "--once", "--events"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let states: Vec<String> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| {
            let event: serde_json::Value = serde_json::from_str(line).unwrap();
            event["state"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(states, vec!["running", "succeeded"]);
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

#[test]
fn status_before_any_run() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");
    agent(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backup has run yet"));
}

#[test]
fn status_shows_last_result_and_next_due() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "schedule:\n  period_hours: 6\n");
    agent(&dir).args(["run", "--once"]).assert().success();

    let output = agent(&dir).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["last"]["state"], "succeeded");
    assert!(value["next_due_at"].is_string());
    assert!(value["last_success_at"].is_string());

    agent(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("next due"));
}

// ---------------------------------------------------------------------------
// postpone
// ---------------------------------------------------------------------------

#[test]
fn postpone_writes_next_due_to_schedule() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");

    agent(&dir)
        .args(["postpone", "24"])
        .assert()
        .success()
        .stdout(predicate::str::contains("postponed until"));

    let data = std::fs::read_to_string(dir.path().join("state/schedule.json")).unwrap();
    let schedule: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert!(schedule["postponed_until"].is_string());

    let output = agent(&dir).args(["status", "--json"]).output().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["next_due_at"], schedule["postponed_until"]);
}

#[test]
fn postpone_rejects_non_positive_hours() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");
    agent(&dir)
        .args(["postpone", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive"));
    assert!(!dir.path().join("state/schedule.json").exists());
}

#[test]
fn run_once_overrides_postponement() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "true", "");
    agent(&dir).args(["postpone", "1"]).assert().success();
    agent(&dir).args(["run", "--once"]).assert().success();
    assert_eq!(read_status(&dir)["state"], "succeeded");
}
