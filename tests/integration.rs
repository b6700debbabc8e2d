//! Integration tests for the procpool CLI.
//!
//! These run the real binary, so every task below goes through actual worker
//! processes.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// Get a command for the procpool binary.
fn procpool() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("procpool").unwrap();
    cmd.env_remove("PROCPOOL_WORKERS")
        .env_remove("PROCPOOL_ON_WORKER_FAILURE")
        .env_remove("PROCPOOL_LOG");
    cmd
}

#[test]
fn test_help_displays() {
    procpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("worker processes"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("jobs"));
}

#[test]
fn test_version_displays() {
    procpool()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("procpool"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_jobs_lists_demo_jobs() {
    procpool()
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("echo"))
        .stdout(predicate::str::contains("sleep"))
        .stdout(predicate::str::contains("crash"));
}

#[test]
fn test_run_single_worker_output_order() {
    let output = procpool()
        .args(["run", "-w", "1", "echo hello", "echo world"])
        .output()
        .expect("Failed to run procpool");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Starting task \"echo hello\"",
            "hello",
            "Task complete!",
            "Starting task \"echo world\"",
            "world",
            "Task complete!",
        ]
    );
}

#[test]
fn test_run_reports_summary_on_stderr() {
    procpool()
        .args(["run", "--workers", "2", "lines 2", "echo done"])
        .assert()
        .success()
        .stdout(predicate::str::contains("line 2"))
        .stdout(predicate::str::contains("done"))
        .stderr(predicate::str::contains("2 of 2 task(s) on 2 worker(s)"));
}

#[test]
fn test_quiet_suppresses_summary() {
    procpool()
        .args(["run", "-q", "-w", "1", "echo hi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hi"))
        .stderr(predicate::str::contains("Finished").not());
}

#[test]
fn test_run_tasks_from_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("tasks.txt");
    std::fs::write(&path, "# demo tasks\necho from file\n\nlines 1\n").unwrap();

    procpool()
        .args(["run", "-w", "1", "--file"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("from file"))
        .stdout(predicate::str::contains("line 1"))
        .stdout(predicate::str::contains("demo tasks").not());
}

#[test]
fn test_run_tasks_from_stdin() {
    procpool()
        .args(["run", "-w", "1", "--file", "-"])
        .write_stdin("echo piped\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("piped"));
}

#[test]
fn test_run_without_tasks_fails() {
    procpool()
        .args(["run", "-w", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No tasks given"));
}

#[test]
fn test_missing_task_file_fails() {
    procpool()
        .args(["run", "--file", "/nonexistent/tasks.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read task file"));
}

#[test]
fn test_crash_is_survived_by_default() {
    procpool()
        .args(["run", "-w", "1", "crash", "echo still here"])
        .assert()
        .success()
        .stdout(predicate::str::contains("still here"))
        .stderr(predicate::str::contains("warning"))
        .stderr(predicate::str::contains("crash"));
}

#[test]
fn test_crash_escalates_to_exit_code() {
    procpool()
        .args(["run", "-w", "1", "--on-worker-failure", "escalate", "crash"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Pool did not finish cleanly"))
        .stderr(predicate::str::contains("Worker 0"));
}

#[test]
fn test_failure_policy_from_env() {
    procpool()
        .env("PROCPOOL_ON_WORKER_FAILURE", "retire")
        .args(["run", "-w", "1", "crash", "echo never"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("never").not())
        .stderr(predicate::str::contains("No live workers"));
}

#[test]
fn test_timeout() {
    procpool()
        .args(["run", "-w", "1", "--timeout", "1", "sleep 10000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Timed out"));
}

#[test]
fn test_job_exit_code_is_not_an_error() {
    procpool()
        .args(["run", "-w", "1", "fail 3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Task complete!"));
}
