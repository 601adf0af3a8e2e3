//! End-to-end tests of the `bd` binary that never launch a real server.

use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn bd_binary() -> String {
    env!("CARGO_BIN_EXE_bd").to_string()
}

/// Run `bd --root <root> args...` with breaker files kept under `tmp`.
fn bd(root: &Path, tmp: &Path, args: &[&str]) -> Output {
    Command::new(bd_binary())
        .arg("--root")
        .arg(root)
        .args(args)
        .env("TMPDIR", tmp)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run bd")
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".beads")).unwrap();
    dir
}

fn write_config(root: &Path, yaml: &str) {
    std::fs::write(root.join(".beads").join("config.yaml"), yaml).unwrap();
}

fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn help_lists_subcommands() {
    let output = Command::new(bd_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("server"));
    assert!(stdout.contains("breaker"));
    assert!(stdout.contains("promote"));
    assert!(stdout.contains("compact"));
    assert!(!stdout.contains("idle-monitor"));
}

#[test]
fn status_reports_not_running() {
    let root = project();
    let tmp = TempDir::new().unwrap();

    let output = bd(root.path(), tmp.path(), &["server", "status"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not running"), "stdout: {}", stdout);

    let output = bd(root.path(), tmp.path(), &["server", "status", "--json"]);
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["running"], false);
    assert_eq!(status["reachable"], false);
    assert!(status["pid"].is_null());
}

#[test]
fn stop_without_server_fails_with_hint() {
    let root = project();
    let tmp = TempDir::new().unwrap();

    let output = bd(root.path(), tmp.path(), &["server", "stop"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not running"), "stderr: {}", stderr);
    assert!(stderr.contains("Hint:"));
}

#[test]
fn ensure_with_unreachable_explicit_port_starts_nothing() {
    let root = project();
    let tmp = TempDir::new().unwrap();
    let port = unused_port();
    write_config(root.path(), &format!("server:\n  port: {}\n", port));

    let output = bd(root.path(), tmp.path(), &["server", "ensure"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not reachable"), "stderr: {}", stderr);
    assert!(!root.path().join(".beads").join("dolt-server.pid").exists());
    assert!(!root.path().join(".beads").join("dolt").exists());
}

#[test]
fn breaker_status_and_reset_use_shared_file() {
    let root = project();
    let tmp = TempDir::new().unwrap();
    let port = unused_port();
    let state_file = tmp.path().join(format!("beads-dolt-circuit-{}.json", port));
    std::fs::write(
        &state_file,
        r#"{"state":"open","failures":5,"tripped_at":"2099-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let port_arg = port.to_string();
    let output = bd(
        root.path(),
        tmp.path(),
        &["breaker", "status", "--port", &port_arg, "--json"],
    );
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["state"], "open");
    assert_eq!(status["failures"], 5);
    assert_eq!(status["port"], port);

    let output = bd(
        root.path(),
        tmp.path(),
        &["breaker", "reset", "--port", &port_arg],
    );
    assert!(output.status.success());
    assert!(!state_file.exists());

    let output = bd(
        root.path(),
        tmp.path(),
        &["breaker", "status", "--port", &port_arg],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("closed"), "stdout: {}", stdout);
}

#[test]
fn open_breaker_status_warns_on_stderr() {
    let root = project();
    let tmp = TempDir::new().unwrap();
    let port = unused_port();
    std::fs::write(
        tmp.path().join(format!("beads-dolt-circuit-{}.json", port)),
        r#"{"state":"open","failures":5,"tripped_at":"2099-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let port_arg = port.to_string();
    let output = bd(root.path(), tmp.path(), &["breaker", "status", "--port", &port_arg]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("open"), "stdout: {}", stdout);
    assert!(!stdout.contains("fail fast"));
    assert!(stderr.contains("fail fast"), "stderr: {}", stderr);
}

#[test]
fn store_commands_go_through_the_server_guard() {
    let root = project();
    let tmp = TempDir::new().unwrap();
    let port = unused_port();
    write_config(root.path(), &format!("server:\n  port: {}\n", port));

    let output = bd(root.path(), tmp.path(), &["promote", "bd-wisp-1"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not reachable"), "stderr: {}", stderr);

    // An open breaker for the port short-circuits before any connection
    std::fs::write(
        tmp.path().join(format!("beads-dolt-circuit-{}.json", port)),
        r#"{"state":"open","failures":5,"tripped_at":"2099-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let output = bd(root.path(), tmp.path(), &["compact", "stats"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("circuit open"), "stderr: {}", stderr);
    assert!(!root.path().join(".beads").join("dolt").exists());
}

#[test]
fn idle_monitor_with_zero_timeout_exits_at_once() {
    let root = project();
    let tmp = TempDir::new().unwrap();

    let started = Instant::now();
    let output = bd(
        root.path(),
        tmp.path(),
        &["server", "idle-monitor", "--timeout", "0"],
    );
    assert!(output.status.success());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn completions_generate_without_a_project() {
    let output = Command::new(bd_binary())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("bd"));
}
