//! End-to-end tests driving the compiled binary over the demo documents.

use std::path::PathBuf;
use std::process::Command;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

fn tokenflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tokenflow"))
}

#[test]
fn throughput_of_demo_pair() {
    let out = tokenflow()
        .arg("throughput")
        .arg(demo("pair.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("throughput: 1/5"));
    assert!(stdout.contains("deadlock free: true"));
}

#[test]
fn buffer_minimum_of_demo_pair() {
    let out = tokenflow()
        .args(["buffer", "--bound", "min"])
        .arg(demo("pair.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("pareto front"));
}

#[test]
fn latency_of_demo_pair() {
    let out = tokenflow()
        .args(["latency", "--src", "a", "--dst", "b", "--mode", "minimal"])
        .arg(demo("pair.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("latency a -> b (minimal): 5"));
}

#[test]
fn schedule_of_demo_pair() {
    let out = tokenflow()
        .arg("schedule")
        .arg(demo("pair.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("period: 5"));
}

#[test]
fn binding_of_demo_mapping() {
    let out = tokenflow()
        .arg("binding")
        .arg(demo("mapped.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("binding-aware throughput"));
}

#[test]
fn noc_of_demo_problem() {
    let out = tokenflow()
        .args(["noc", "--strategy", "greedy"])
        .arg(demo("noc.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("scheduled 2 messages"));
}

#[test]
fn export_dot_of_csdf_demo() {
    let out = tokenflow()
        .args(["export", "--format", "dot"])
        .arg(demo("csdf_pair.json"))
        .output()
        .expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("digraph csdf_pair"));
    assert!(stdout.contains("[1,2,1]"));
}

#[test]
fn csdf_to_sdf_conversion_is_refused() {
    let out = tokenflow()
        .args(["export", "--format", "sdf"])
        .arg(demo("csdf_pair.json"))
        .output()
        .expect("binary runs");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("not supported"));
}

#[test]
fn missing_file_is_a_validation_error() {
    let out = tokenflow()
        .arg("throughput")
        .arg(demo("does_not_exist.json"))
        .output()
        .expect("binary runs");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn battery_passes() {
    let out = tokenflow().arg("check").output().expect("binary runs");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("0 failed"));
}
