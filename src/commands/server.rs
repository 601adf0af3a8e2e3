use crate::output::UserOutput;
use beads_dolt::server::{self, idle, ServerManager};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub async fn run_server_start(root: &Path, out: &dyn UserOutput) -> anyhow::Result<()> {
    let manager = ServerManager::from_project(root)?;
    let state = manager.start().await?;
    out.success(&format!(
        "Dolt server running (PID {}, port {})",
        state.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
        state.port.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
    ));
    let idle_timeout = manager.config().idle_timeout();
    if !idle_timeout.is_zero() && idle::running_idle_monitor(manager.paths(), manager.probe()).is_none() {
        out.warning(&format!(
            "Idle monitor is not running; the server will not stop after {:?} idle (stop it with: bd server stop)",
            idle_timeout
        ));
    }
    Ok(())
}

pub async fn run_server_stop(root: &Path, out: &dyn UserOutput) -> anyhow::Result<()> {
    let manager = ServerManager::from_project(root)?;
    manager.stop().await?;
    out.success("Dolt server stopped");
    Ok(())
}

pub async fn run_server_ensure(root: &Path, out: &dyn UserOutput) -> anyhow::Result<()> {
    let manager = ServerManager::from_project(root)?;
    let port = manager.ensure_running().await?;
    out.status(&port.to_string());
    Ok(())
}

pub async fn run_server_status(root: &Path, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let manager = ServerManager::from_project(root)?;
    let state = manager.is_running()?;
    let reachable = match state.port.filter(|_| state.running) {
        Some(port) => manager.ping(port).await.is_ok(),
        None => false,
    };
    let monitor_pid = idle::running_idle_monitor(manager.paths(), manager.probe());
    let explicit_port = manager.config().explicit_port();

    if json {
        let status = json!({
            "running": state.running,
            "pid": state.pid,
            "port": state.port,
            "reachable": reachable,
            "data_dir": state.data_dir,
            "explicit_port": explicit_port,
            "idle_monitor_pid": monitor_pid,
        });
        out.status(&serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    out.status("Dolt Server:");
    out.status(&format!("{:-<50}", ""));
    if !state.running {
        out.status("  Status:    not running");
        out.status(&format!("  Port:      {} (when started)", manager.configured_port()));
        out.status(&format!("  Data dir:  {}", state.data_dir.display()));
        return Ok(());
    }

    let pid = state.pid.unwrap_or_default();
    let port = state.port.unwrap_or_default();
    if !reachable {
        out.warning(&format!(
            "Dolt server PID {} is running but not accepting connections on port {}",
            pid, port
        ));
    }
    out.status(&format!(
        "  Status:    running{}",
        if reachable { "" } else { " (not accepting connections)" }
    ));
    out.status(&format!("  PID:       {}", pid));
    out.status(&format!(
        "  Port:      {}{}",
        port,
        if explicit_port.is_some() { " (explicit)" } else { "" }
    ));
    out.status(&format!("  Data dir:  {}", state.data_dir.display()));
    match monitor_pid {
        Some(pid) => out.status(&format!(
            "  Idle stop: after {:?} (monitor PID {})",
            manager.config().idle_timeout(),
            pid
        )),
        None => out.status("  Idle stop: no monitor running"),
    }
    Ok(())
}

/// Entry point of the detached idle monitor sidecar.
pub async fn run_idle_monitor(root: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    server::run_idle_monitor(root, Duration::from_secs(timeout_secs)).await?;
    Ok(())
}
