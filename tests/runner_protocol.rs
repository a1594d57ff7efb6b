//! The `cattle-run init` / `cattle-run exec` protocol, driven directly.

use cattle::execution::{ExecutionId, ARCHIVE_NAME};
use cattle::package;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const CATTLE_RUN: &str = env!("CARGO_BIN_EXE_cattle-run");

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(CATTLE_RUN)
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
}

fn stage(exec_dir: &Path, manifest: &str) {
    let source = exec_dir.parent().unwrap().join("source-config");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("cattle.json"), manifest).unwrap();

    let excludes = cattle::defaults::Defaults::default().package.excludes;
    fs::create_dir_all(exec_dir).unwrap();
    package::build_archive(&source, &exec_dir.join(ARCHIVE_NAME), &excludes).unwrap();
}

#[test]
fn init_then_exec_writes_done_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let exec_dir = dir.path().join(ExecutionId::mint().as_str());
    stage(&exec_dir, r#"{"steps": [{"type": "flaky", "attempts": 2}]}"#);

    assert!(run_in(&exec_dir, &["init", ARCHIVE_NAME]).status.success());
    assert!(exec_dir.join("config/cattle.json").is_file());

    let exec = run_in(&exec_dir, &["exec", "config"]);
    assert!(exec.status.success());
    assert_eq!(fs::read_to_string(exec_dir.join("STATUS")).unwrap(), "DONE");

    let log = fs::read_to_string(exec_dir.join("exec.log")).unwrap();
    assert!(log.contains("Running step 1 (FlakyAction)"));
    assert!(log.contains("config executed successfully."));
}

#[test]
fn failed_step_still_exits_zero_with_error_status() {
    let dir = tempfile::tempdir().unwrap();
    let exec_dir = dir.path().join("exec");
    stage(&exec_dir, r#"{"steps": [{"type": "flaky", "attempts": 4}]}"#);

    run_in(&exec_dir, &["init", ARCHIVE_NAME]);
    let exec = run_in(&exec_dir, &["exec", "config"]);

    assert!(exec.status.success());
    assert_eq!(fs::read_to_string(exec_dir.join("STATUS")).unwrap(), "ERROR");
}

#[test]
fn second_exec_in_a_finished_exec_dir_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let exec_dir = dir.path().join("exec");
    let marker = dir.path().join("marker");
    stage(
        &exec_dir,
        &format!(
            r#"{{"steps": [{{"type": "make_dir", "path": "{}"}}]}}"#,
            marker.display()
        ),
    );

    run_in(&exec_dir, &["init", ARCHIVE_NAME]);
    assert!(run_in(&exec_dir, &["exec", "config"]).status.success());
    fs::remove_dir(&marker).unwrap();

    let again = run_in(&exec_dir, &["exec", "config"]);
    assert_eq!(again.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already started"));
    assert!(!marker.exists());
    assert_eq!(fs::read_to_string(exec_dir.join("STATUS")).unwrap(), "DONE");
}

#[test]
fn load_failure_exits_one_without_status() {
    let dir = tempfile::tempdir().unwrap();
    let exec_dir = dir.path().join("exec");
    stage(&exec_dir, r#"{"not_steps": []}"#);

    run_in(&exec_dir, &["init", ARCHIVE_NAME]);
    let exec = run_in(&exec_dir, &["exec", "config"]);

    assert_eq!(exec.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&exec.stderr).starts_with("couldn't load config:"));
    assert!(!exec_dir.join("STATUS").exists());
    assert!(!exec_dir.join("exec.log").exists());
}

#[test]
fn dry_run_prints_descriptions_only() {
    let dir = tempfile::tempdir().unwrap();
    let exec_dir = dir.path().join("exec");
    let target = dir.path().join("never-created");
    stage(
        &exec_dir,
        &format!(
            r#"{{"steps": [{{"type": "make_dir", "path": "{}"}}]}}"#,
            target.display()
        ),
    );

    run_in(&exec_dir, &["init", ARCHIVE_NAME]);
    let exec = run_in(&exec_dir, &["exec", "config", "--dry-run"]);

    assert!(exec.status.success());
    assert_eq!(
        String::from_utf8_lossy(&exec.stdout),
        format!("> MakeDir:\n   > make directory {}\n", target.display())
    );
    assert!(!target.exists());
    assert!(!exec_dir.join("STATUS").exists());
    assert!(!exec_dir.join("exec.log").exists());
}

#[test]
fn init_with_missing_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    let init = run_in(dir.path(), &["init", "absent.tar.gz"]);
    assert_eq!(init.status.code(), Some(1));
}
