use std::io::Write;
use std::process::Command;

use serde_json::json;
use tempfile::NamedTempFile;

fn write_temp(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn run_lightvm(
    args: &[&str],
    program: &serde_json::Value,
    program_args: &[&str],
) -> (String, String, bool) {
    let file = write_temp(&program.to_string(), ".json");
    let path = file.path().to_str().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_lightvm"))
        .args(args)
        .arg(path)
        .args(program_args)
        .output()
        .expect("failed to execute lightvm");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn assert_success(args: &[&str], program: serde_json::Value) -> String {
    let (stdout, stderr, success) = run_lightvm(args, &program, &[]);
    assert!(success, "program should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(args: &[&str], program: serde_json::Value) -> String {
    let (_, stderr, success) = run_lightvm(args, &program, &[]);
    assert!(!success, "program should fail");
    stderr
}

#[test]
fn test_run_prints_result() {
    let stdout = assert_success(
        &["run"],
        json!({"body": [
            {"op": "const", "value": 3}, {"op": "const", "value": 4},
            {"op": "binary", "operator": "add", "kind": "i32"},
            {"op": "return", "value": true}
        ]}),
    );
    assert_eq!(stdout, "7\n");
}

#[test]
fn test_print_and_arguments() {
    let program = json!({"parameters": ["a", "b"], "body": [
        {"op": "const", "value": "sum"}, {"op": "call", "method": "print"},
        {"op": "load", "name": "a"}, {"op": "load", "name": "b"},
        {"op": "binary", "operator": "add", "kind": "i32", "checked": true},
        {"op": "call", "method": "print"}
    ]});
    let (stdout, stderr, success) = run_lightvm(&["run"], &program, &["20", "22"]);
    assert!(success, "program should succeed, stderr:\n{}", stderr);
    assert_eq!(stdout, "sum\n42\n");
}

#[test]
fn test_uncaught_error_reports_trace() {
    let stderr = assert_failure(
        &["run"],
        json!({"name": "divide", "body": [
            {"op": "line", "start": 12},
            {"op": "const", "value": 1}, {"op": "const", "value": 0},
            {"op": "binary", "operator": "div", "kind": "i32"},
            {"op": "return", "value": true}
        ]}),
    );
    assert!(stderr.contains("divide_by_zero"), "stderr:\n{}", stderr);
    assert!(stderr.contains("at divide [2] line 12"), "stderr:\n{}", stderr);
}

#[test]
fn test_budget_aborts() {
    let stderr = assert_failure(
        &["run", "--budget", "100"],
        json!({"body": [
            {"op": "label", "name": "spin"}, {"op": "branch", "label": "spin"}
        ]}),
    );
    assert!(stderr.contains("aborted"), "stderr:\n{}", stderr);
}

#[test]
fn test_config_file_budget() {
    let config = write_temp("instruction_budget = 50\n", ".toml");
    let stderr = assert_failure(
        &["run", "--config", config.path().to_str().unwrap()],
        json!({"body": [
            {"op": "label", "name": "spin"}, {"op": "branch", "label": "spin"}
        ]}),
    );
    assert!(stderr.contains("instruction budget of 50"), "stderr:\n{}", stderr);
}

#[test]
fn test_build_error() {
    let stderr = assert_failure(
        &["check"],
        json!({"body": [{"op": "load", "name": "missing"}]}),
    );
    assert!(stderr.contains("unknown variable 'missing'"), "stderr:\n{}", stderr);
}

#[test]
fn test_check() {
    let stdout = assert_success(
        &["check"],
        json!({"name": "ok", "body": [{"op": "const", "value": 1}, {"op": "pop"}]}),
    );
    assert!(stdout.starts_with("ok: ok (2 instructions"), "stdout:\n{}", stdout);
}

#[test]
fn test_dump() {
    let stdout = assert_success(
        &["dump"],
        json!({"body": [
            {"op": "try",
             "body": [{"op": "const", "value": "x"}, {"op": "throw"}],
             "catches": [{"body": []}]}
        ]}),
    );
    assert!(stdout.contains("EnterTryCatchFinally"), "stdout:\n{}", stdout);
    assert!(stdout.contains("try #0"), "stdout:\n{}", stdout);
}
