//! Launching the idle monitor sidecar from a program that is not `bd`,
//! which is what this test executable is.

use beads_dolt::process::default_probe;
use beads_dolt::server::{idle, spawn_idle_monitor, stop_idle_monitor, StatePaths};
use beads_dolt::Error;
use std::time::Duration;
use tempfile::TempDir;

fn project() -> (TempDir, StatePaths) {
    let root = TempDir::new().unwrap();
    let paths = StatePaths::new(root.path());
    std::fs::create_dir_all(&paths.beads_dir).unwrap();
    (root, paths)
}

async fn wait_dead(pid: u32) -> bool {
    let probe = default_probe();
    for _ in 0..50 {
        if !probe.is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[test]
fn foreign_executable_is_never_the_monitor() {
    match idle::resolve_monitor_binary(None) {
        Ok(path) => assert_eq!(
            path.file_stem().and_then(|s| s.to_str()),
            Some(idle::BD_BINARY),
            "resolved {:?}",
            path
        ),
        Err(e) => {
            assert!(matches!(e, Error::Process(_)));
            assert!(e.to_string().contains("server.monitor_binary"));
        }
    }
}

#[tokio::test]
async fn configured_bd_binary_launches_a_live_monitor() {
    let (root, paths) = project();
    let probe = default_probe();

    spawn_idle_monitor(
        root.path(),
        &paths,
        probe.as_ref(),
        Duration::from_secs(60),
        Some(env!("CARGO_BIN_EXE_bd")),
    )
    .await
    .unwrap();

    let pid = idle::running_idle_monitor(&paths, probe.as_ref()).expect("monitor is running");
    let argv = probe.command_line(pid).unwrap();
    assert!(argv.iter().any(|a| a == idle::IDLE_MONITOR_ARG), "argv: {:?}", argv);

    // A second launch reuses the live monitor
    spawn_idle_monitor(
        root.path(),
        &paths,
        probe.as_ref(),
        Duration::from_secs(60),
        Some(env!("CARGO_BIN_EXE_bd")),
    )
    .await
    .unwrap();
    assert_eq!(idle::running_idle_monitor(&paths, probe.as_ref()), Some(pid));

    stop_idle_monitor(&paths, probe.as_ref());
    assert!(wait_dead(pid).await);
    assert!(!paths.monitor_pid.exists());
}

#[tokio::test]
async fn monitor_binary_that_exits_is_an_error() {
    let Ok(exits) = which::which("true") else {
        eprintln!("skipping: no `true` on PATH");
        return;
    };
    let (root, paths) = project();
    let probe = default_probe();

    let err = spawn_idle_monitor(
        root.path(),
        &paths,
        probe.as_ref(),
        Duration::from_secs(60),
        exits.to_str(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Process(_)), "{:?}", err);
    assert!(!paths.monitor_pid.exists());
    assert_eq!(idle::running_idle_monitor(&paths, probe.as_ref()), None);
}
