#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

fn cellwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cellwire"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .env_remove("CELLWIRE_QUIT_TIMEOUT")
        .env_remove("CELLWIRE_POLL_SLICE")
        .env_remove("CELLWIRE_LOG_LEVEL")
        .output()
        .expect("cellwire should start")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn demo_reports_doubled_values() {
    let output = cellwire(&["--format", "json", "demo"]);
    let json = stdout_json(&output);

    let steps = json["steps"].as_array().expect("steps should be an array");
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["step"], "create");
    assert_eq!(steps[0]["input"], 5);
    assert_eq!(steps[0]["output"], 10);
    assert_eq!(steps[1]["step"], "pull");
    assert_eq!(steps[1]["input"], 7);
    assert_eq!(steps[1]["output"], 14);
    assert_ne!(json["worker_pid"], json["master_pid"]);
}

#[test]
fn demo_accepts_custom_inputs_and_timing() {
    let output = cellwire(&[
        "--format",
        "json",
        "demo",
        "--input",
        "-3",
        "--update",
        "21",
        "--poll-slice",
        "50ms",
        "--quit-timeout",
        "500ms",
    ]);
    let json = stdout_json(&output);

    assert_eq!(json["steps"][0]["output"], -6);
    assert_eq!(json["steps"][1]["output"], 42);
}

#[test]
fn demo_pretty_output_names_both_steps() {
    let output = cellwire(&["--format", "pretty", "demo"]);
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("create n=5 double=10"), "stdout: {text}");
    assert!(text.contains("pull   n=7 double=14"), "stdout: {text}");
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = cellwire(&["demo", "--poll-slice", "soon"]);
    assert_eq!(output.status.code(), Some(64));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid duration value"), "stderr: {stderr}");
}

#[test]
fn overflowing_input_is_usage_error() {
    let output = cellwire(&["demo", "--input", &i64::MAX.to_string()]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = cellwire(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("cellwire {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_protocol_tags() {
    let output = cellwire(&["version", "--extended"]);
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("tags: new value (VALUE)"), "stdout: {text}");
    assert!(text.contains("quit ack (CONTROL)"), "stdout: {text}");
}
