//! Concurrency tests for lift.
//!
//! Several processes sharing one data directory must not corrupt each
//! other's records or the shared sync queue file.

use assert_cmd::Command;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;

fn cli(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("lift"));
    cmd.env("XDG_CONFIG_HOME", data_dir.join("config"))
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    let output = cli(data_dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("Failed to run lift");
    assert!(
        output.status.success(),
        "lift {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("Output was not JSON")
}

/// One user's whole workout, driven through separate processes
fn run_user_workout(data_dir: PathBuf, user: String) -> String {
    let session = run_json(&data_dir, &["create", "--user", &user, "--workout", "full_body_a"]);
    let id = session["id"].as_str().unwrap().to_string();
    run_json(&data_dir, &["start", &id]);
    let started = run_json(&data_dir, &["exercise", "start", &id, "--index", "0"]);
    let log = started["exercise_log"]["id"].as_str().unwrap().to_string();
    for n in 1..=3 {
        run_json(
            &data_dir,
            &["set", &id, "--log", &log, "--number", &n.to_string(), "--reps", "10"],
        );
    }
    run_json(&data_dir, &["exercise", "complete", &id, "--log", &log]);
    id
}

#[test]
fn test_parallel_sessions_for_different_users() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let data_dir = data_dir.clone();
            thread::spawn(move || run_user_workout(data_dir, format!("user{}", i)))
        })
        .collect();
    let ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().expect("Worker thread panicked"))
        .collect();

    for id in &ids {
        let shown = run_json(&data_dir, &["show", id]);
        assert_eq!(shown["session"]["sets_completed"], 3);
        assert_eq!(shown["session"]["exercises_completed"], 1);
        assert_eq!(shown["set_logs"].as_array().unwrap().len(), 3);
    }

    // The shared queue file is still readable
    let contents = std::fs::read_to_string(data_dir.join("sync_queue.json")).unwrap();
    serde_json::from_str::<Value>(&contents).expect("Queue file corrupted");
}

#[test]
fn test_readers_during_writes() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    let session = run_json(&data_dir, &["create", "--user", "alex", "--workout", "upper_push"]);
    let id = session["id"].as_str().unwrap().to_string();
    run_json(&data_dir, &["start", &id]);
    run_json(&data_dir, &["exercise", "start", &id, "--index", "0"]);

    let reader_dir = data_dir.clone();
    let reader_id = id.clone();
    let reader = thread::spawn(move || {
        for _ in 0..5 {
            run_json(&reader_dir, &["show", &reader_id]);
            run_json(&reader_dir, &["latest", "--user", "alex"]);
        }
    });

    for _ in 0..3 {
        run_json(&data_dir, &["rest", "start", &id]);
        run_json(&data_dir, &["rest", "skip", &id]);
    }
    reader.join().expect("Reader thread panicked");

    let latest = run_json(&data_dir, &["latest", "--user", "alex"]);
    assert_eq!(latest["id"], id.as_str());
    assert_eq!(latest["current_phase"], "working_set");
}

#[test]
fn test_parallel_runs_keep_every_queued_write() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    // No write can reach the store, so every one stays queued
    std::fs::write(data_dir.join("sessions"), "not a directory").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                let user = format!("user{}", i);
                let session = run_json(&data_dir, &["create", "--user", &user, "--workout", "full_body_a"]);
                session["id"].as_str().unwrap().to_string()
            })
        })
        .collect();
    let mut ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().expect("Worker thread panicked"))
        .collect();
    ids.sort();

    let contents = std::fs::read_to_string(data_dir.join("sync_queue.json")).unwrap();
    let queue: Value = serde_json::from_str(&contents).expect("Queue file corrupted");
    let mut queued: Vec<String> = queue["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["session_id"].as_str().unwrap().to_string())
        .collect();
    queued.sort();
    assert_eq!(queued, ids);
}
