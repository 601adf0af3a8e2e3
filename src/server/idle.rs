//! Idle monitor: a detached `bd server idle-monitor` process that stops an
//! unused server and restarts one that crashed while still in use.

use super::manager::ServerManager;
use super::state::StatePaths;
use crate::error::{Error, Result};
use crate::files;
use crate::process::{self, ProcessProbe};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Argument that identifies monitor processes on their command line.
pub const IDLE_MONITOR_ARG: &str = "idle-monitor";

/// Name of the executable that implements `server idle-monitor`.
pub const BD_BINARY: &str = "bd";

/// Grace period before checking that a launched monitor is still alive.
const MONITOR_SETTLE: Duration = Duration::from_millis(200);

/// Run the monitor for the project at `root` until there is nothing left to
/// supervise. A zero timeout disables monitoring and returns at once.
pub async fn run_idle_monitor(root: &Path, timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        debug!("Idle timeout is zero, monitor disabled");
        return Ok(());
    }
    // Restarts from inside the monitor must not fork another monitor
    let manager = ServerManager::from_project(root)?.without_idle_monitor();
    run_idle_monitor_with(&manager, timeout, IDLE_POLL_INTERVAL).await
}

/// Monitor loop over an existing manager.
pub async fn run_idle_monitor_with(
    manager: &ServerManager,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    if timeout.is_zero() {
        return Ok(());
    }

    let paths = manager.paths();
    files::write_value(&paths.monitor_pid, std::process::id())?;
    info!(
        "Idle monitor started for {:?} (timeout {:?})",
        manager.root(),
        timeout
    );

    loop {
        tokio::time::sleep(poll_interval).await;

        let idle_for = paths
            .read_activity()
            .map(|at| (Utc::now() - at).to_std().unwrap_or(Duration::ZERO));
        let recently_active = idle_for.map(|d| d <= timeout).unwrap_or(false);

        let state = match manager.is_running() {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to read server state: {}", e);
                continue;
            }
        };

        if state.running {
            if recently_active {
                continue;
            }
            info!(
                "Dolt server idle for {:?} (limit {:?}), stopping",
                idle_for, timeout
            );
            if let Err(e) = manager.stop().await {
                warn!("Failed to stop idle server: {}", e);
            }
            break;
        }

        if !recently_active {
            info!("Dolt server is down and idle, monitor exiting");
            break;
        }

        warn!("Dolt server exited unexpectedly while in use, restarting");
        match manager.start().await {
            Ok(state) => info!("Dolt server restarted on port {:?}", state.port),
            Err(e) => warn!("Watchdog restart failed: {}", e),
        }
    }

    release_monitor_pid(paths);
    Ok(())
}

fn release_monitor_pid(paths: &StatePaths) {
    if files::read_value::<u32>(&paths.monitor_pid) == Some(std::process::id()) {
        let _ = files::remove_if_exists(&paths.monitor_pid);
    }
}

fn is_idle_monitor(probe: &dyn ProcessProbe, pid: u32) -> bool {
    probe.is_process_alive(pid)
        && probe
            .command_line(pid)
            .map(|argv| argv.iter().any(|a| a == IDLE_MONITOR_ARG))
            .unwrap_or(false)
}

/// PID of a live monitor for this project, if any.
pub fn running_idle_monitor(paths: &StatePaths, probe: &dyn ProcessProbe) -> Option<u32> {
    files::read_value::<u32>(&paths.monitor_pid).filter(|pid| is_idle_monitor(probe, *pid))
}

/// Executable to run the monitor with.
///
/// A configured binary wins. Otherwise the current executable is used only if
/// it is `bd` itself; a library embedded in another program falls back to
/// `bd` on PATH.
pub fn resolve_monitor_binary(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(binary) = configured {
        return which::which(binary).map_err(|_| {
            Error::Process(format!(
                "idle monitor binary '{}' not found (server.monitor_binary)",
                binary
            ))
        });
    }
    if let Ok(exe) = std::env::current_exe() {
        if exe.file_stem().and_then(|s| s.to_str()) == Some(BD_BINARY) {
            return Ok(exe);
        }
    }
    which::which(BD_BINARY).map_err(|_| {
        Error::Process(format!(
            "'{}' not found on PATH, cannot launch the idle monitor (set server.monitor_binary)",
            BD_BINARY
        ))
    })
}

/// Launch the sidecar unless one is alive. Zero timeout launches nothing.
///
/// The PID file is written only once the child is confirmed to be a running
/// monitor; a binary that exits or is not `bd` is an error.
pub async fn spawn_idle_monitor(
    root: &Path,
    paths: &StatePaths,
    probe: &dyn ProcessProbe,
    timeout: Duration,
    monitor_binary: Option<&str>,
) -> Result<()> {
    if timeout.is_zero() {
        return Ok(());
    }
    if let Some(pid) = running_idle_monitor(paths, probe) {
        debug!("Idle monitor already running (PID {})", pid);
        return Ok(());
    }

    let exe = resolve_monitor_binary(monitor_binary)?;
    let mut cmd = tokio::process::Command::new(&exe);
    cmd.arg("--root")
        .arg(root)
        .args(["server", IDLE_MONITOR_ARG, "--timeout"])
        .arg(timeout.as_secs().max(1).to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        Error::Process(format!("Failed to launch idle monitor {}: {}", exe.display(), e))
    })?;
    let pid = child
        .id()
        .ok_or_else(|| Error::Process("idle monitor exited immediately".to_string()))?;

    tokio::time::sleep(MONITOR_SETTLE).await;
    if let Some(status) = child.try_wait()? {
        return Err(Error::Process(format!(
            "idle monitor {} exited at launch ({}), see {}",
            exe.display(),
            status,
            paths.monitor_log.display()
        )));
    }
    if !is_idle_monitor(probe, pid) {
        if let Err(e) = process::terminate(pid, "idle monitor") {
            debug!("Failed to stop misidentified monitor PID {}: {}", pid, e);
        }
        return Err(Error::Process(format!(
            "PID {} launched from {} is not an idle monitor",
            pid,
            exe.display()
        )));
    }

    files::write_value(&paths.monitor_pid, pid)?;
    debug!("Launched idle monitor PID {} from {}", pid, exe.display());
    Ok(())
}

/// Stop the project's monitor, unless the caller is the monitor itself.
pub fn stop_idle_monitor(paths: &StatePaths, probe: &dyn ProcessProbe) {
    let Some(pid) = files::read_value::<u32>(&paths.monitor_pid) else {
        return;
    };
    if pid == std::process::id() {
        return;
    }
    if is_idle_monitor(probe, pid) {
        if let Err(e) = process::terminate(pid, "idle monitor") {
            debug!("Failed to stop idle monitor PID {}: {}", pid, e);
        }
    }
    let _ = files::remove_if_exists(&paths.monitor_pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::time::Instant;
    use tempfile::TempDir;

    #[tokio::test]
    async fn zero_timeout_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        run_idle_monitor(dir.path(), Duration::ZERO).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!StatePaths::new(dir.path()).monitor_pid.exists());
    }

    #[tokio::test]
    async fn exits_when_down_and_idle() {
        let dir = TempDir::new().unwrap();
        let manager = ServerManager::new(dir.path(), ServerConfig::default()).without_idle_monitor();

        run_idle_monitor_with(&manager, Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(!manager.paths().monitor_pid.exists());
    }

    #[test]
    fn explicit_monitor_binary_must_exist() {
        let err = resolve_monitor_binary(Some("definitely-not-bd-xyz")).unwrap_err();
        assert!(matches!(err, Error::Process(_)));
        assert!(err.to_string().contains("server.monitor_binary"));
    }

    #[test]
    fn stale_monitor_pid_is_not_a_monitor() {
        let dir = TempDir::new().unwrap();
        let paths = StatePaths::new(dir.path());
        files::write_value(&paths.monitor_pid, std::process::id()).unwrap();
        let probe = process::default_probe();
        assert_eq!(running_idle_monitor(&paths, probe.as_ref()), None);
    }
}
