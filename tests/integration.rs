//! Integration tests for the `pjob` binary.
//!
//! Each test runs the compiled binary and validates that:
//!   1. stdout contains valid JSON only.
//!   2. The JSON contains `schema_version`, `ok`, and `type` fields.
//!   3. Command-specific fields are present.

use std::path::PathBuf;
use std::process::Command;

/// Path to the compiled binary.
fn binary() -> PathBuf {
    let mut p = std::env::current_exe().expect("current exe");
    p.pop(); // remove test binary name
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("pjob");
    if cfg!(windows) {
        p.set_extension("exe");
    }
    p
}

/// Test harness that owns an isolated temporary base directory used as
/// `--temp-base` for every job started under it.
struct TestHarness {
    tmp: tempfile::TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().expect("create tempdir"),
        }
    }

    fn base(&self) -> &str {
        self.tmp.path().to_str().expect("tempdir path is valid UTF-8")
    }

    /// Run `pjob run --temp-base <base> -- <command>`.
    fn run(&self, command: &[&str]) -> serde_json::Value {
        let mut args = vec!["run", "--temp-base", self.base(), "--"];
        args.extend_from_slice(command);
        run_cmd(&args)
    }

    /// Run `pjob run-async --temp-base <base> -- <command>`.
    fn run_async(&self, command: &[&str]) -> serde_json::Value {
        let mut args = vec!["run-async", "--temp-base", self.base(), "--"];
        args.extend_from_slice(command);
        run_cmd(&args)
    }
}

fn run_cmd(args: &[&str]) -> serde_json::Value {
    let output = Command::new(binary())
        .args(args)
        .output()
        .expect("run binary");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stdout.trim().is_empty(),
        "stdout is empty (stderr: {stderr})\nargs: {args:?}"
    );
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!("stdout is not valid JSON: {e}\nstdout: {stdout}\nstderr: {stderr}\nargs: {args:?}")
    })
}

/// Validate the common envelope fields.
fn assert_envelope(v: &serde_json::Value, expected_type: &str, expected_ok: bool) {
    assert_eq!(
        v["schema_version"].as_str().unwrap_or(""),
        "0.1",
        "schema_version mismatch: {v}"
    );
    assert_eq!(
        v["ok"].as_bool().unwrap_or(!expected_ok),
        expected_ok,
        "ok mismatch: {v}"
    );
    assert_eq!(
        v["type"].as_str().unwrap_or(""),
        expected_type,
        "type mismatch: {v}"
    );
}

// ── run ──────────────────────────────────────────────────────────────────

#[test]
fn run_reports_success_and_exit_code() {
    let h = TestHarness::new();
    let v = h.run(&["echo", "hello"]);
    assert_envelope(&v, "run", true);
    assert_eq!(v["mode"].as_str().unwrap_or(""), "foreground");
    assert_eq!(v["state"].as_str().unwrap_or(""), "exited");
    assert_eq!(v["exit_code"].as_i64(), Some(0));
    assert!(!v["tempdir"].as_str().unwrap_or("").is_empty());
}

#[test]
fn run_failure_is_surfaced_as_error_envelope() {
    let v = run_cmd(&["run", "--", "false"]);
    assert_envelope(&v, "error", false);
    assert_eq!(v["error"]["code"].as_str().unwrap_or(""), "internal_error");
    assert!(v["error"]["message"]
        .as_str()
        .unwrap_or("")
        .contains("command failed"));
}

#[test]
fn run_no_raise_error_reports_failed_state_without_error_envelope() {
    let h = TestHarness::new();
    let args = vec![
        "run",
        "--temp-base",
        h.base(),
        "--no-raise-error",
        "--",
        "false",
    ];
    let v = run_cmd(&args);
    assert_envelope(&v, "run", true);
    assert_eq!(v["state"].as_str().unwrap_or(""), "failed");
    assert!(v["error"].as_str().is_some());
}

#[test]
fn run_captures_stdout_to_out_path() {
    let h = TestHarness::new();
    let out_path = h.tmp.path().join("captured.out");
    let v = run_cmd(&[
        "run",
        "--temp-base",
        h.base(),
        "--out",
        out_path.to_str().unwrap(),
        "--",
        "echo",
        "captured",
    ]);
    assert_envelope(&v, "run", true);
    let contents = std::fs::read_to_string(&out_path).expect("read captured stdout");
    assert_eq!(contents.trim(), "captured");
}

// ── run-async / status / wait / kill / cleanup ──────────────────────────

#[test]
fn run_async_then_wait_reaches_exited_state() {
    let h = TestHarness::new();
    let v = h.run_async(&["true"]);
    assert_envelope(&v, "run-async", true);
    assert_eq!(v["mode"].as_str().unwrap_or(""), "background");
    assert!(v["pid"].as_u64().is_some());
    let tempdir = v["tempdir"].as_str().expect("tempdir").to_string();

    let waited = run_cmd(&["wait", "--tempdir", &tempdir]);
    assert_envelope(&waited, "wait", true);
    assert_eq!(waited["state"].as_str().unwrap_or(""), "exited");
    assert_eq!(waited["exit_code"].as_i64(), Some(0));
}

#[test]
fn status_reports_running_then_exited() {
    let h = TestHarness::new();
    let v = h.run_async(&["sleep", "1"]);
    let tempdir = v["tempdir"].as_str().expect("tempdir").to_string();

    let status = run_cmd(&["status", "--tempdir", &tempdir]);
    assert_envelope(&status, "status", true);
    assert_eq!(status["state"].as_str().unwrap_or(""), "running");

    let waited = run_cmd(&["wait", "--tempdir", &tempdir]);
    assert_envelope(&waited, "wait", true);
    assert_eq!(waited["state"].as_str().unwrap_or(""), "exited");
}

#[test]
fn kill_cancels_a_long_running_background_job() {
    let h = TestHarness::new();
    let v = h.run_async(&["sleep", "30"]);
    let tempdir = v["tempdir"].as_str().expect("tempdir").to_string();

    let killed = run_cmd(&["kill", "--tempdir", &tempdir]);
    assert_envelope(&killed, "kill", true);
    assert_eq!(killed["killed"].as_bool(), Some(true));
}

#[test]
fn cleanup_removes_the_tempdir() {
    let h = TestHarness::new();
    let v = h.run(&["true"]);
    let tempdir = v["tempdir"].as_str().expect("tempdir").to_string();
    assert!(std::path::Path::new(&tempdir).is_dir());

    let cleaned = run_cmd(&["cleanup", "--tempdir", &tempdir]);
    assert_envelope(&cleaned, "cleanup", true);
    assert_eq!(cleaned["removed"].as_bool(), Some(true));
    assert!(!std::path::Path::new(&tempdir).is_dir());
}

#[test]
fn status_of_unknown_tempdir_is_job_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let missing = tmp.path().join("never-ran");
    let v = run_cmd(&["status", "--tempdir", missing.to_str().unwrap()]);
    assert_envelope(&v, "error", false);
    assert_eq!(v["error"]["code"].as_str().unwrap_or(""), "job_not_found");
}
