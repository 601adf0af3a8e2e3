use crate::output::UserOutput;
use beads_dolt::{BreakerRegistry, BreakerState, ProjectConfig, ServerManager};
use chrono::Utc;
use std::path::Path;

/// Port whose breaker a command targets: explicit, else this project's server.
fn resolve_port(root: &Path, port: Option<u16>) -> anyhow::Result<u16> {
    if let Some(port) = port {
        return Ok(port);
    }
    let manager = ServerManager::from_project(root)?;
    let state = manager.is_running()?;
    Ok(state.port.unwrap_or_else(|| manager.configured_port()))
}

fn registry(root: &Path) -> anyhow::Result<BreakerRegistry> {
    let config = ProjectConfig::load(root)?;
    Ok(BreakerRegistry::new(config.circuit_breaker.to_breaker_config()))
}

pub fn run_breaker_status(
    root: &Path,
    port: Option<u16>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let port = resolve_port(root, port)?;
    let breaker = registry(root)?.for_port(port);
    let state = breaker.state();

    if json {
        let mut value = serde_json::to_value(&state)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("port".into(), port.into());
            obj.insert("path".into(), breaker.path().display().to_string().into());
        }
        out.status(&serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    out.status(&format!("Circuit breaker for port {}: {}", port, state.state));
    if state.failures > 0 {
        out.status(&format!("  Failures:   {}", state.failures));
    }
    if let Some(last) = state.last_failure {
        out.status(&format!("  Last:       {}", last.to_rfc3339()));
    }
    if state.state == BreakerState::Open {
        let remaining = state.cooldown_remaining(breaker.config(), Utc::now());
        out.status(&format!("  Cooldown:   {:?} remaining", remaining));
        out.warning(&format!(
            "Calls to the dolt server on port {} fail fast until the cooldown ends (reset with: bd breaker reset --port {})",
            port, port
        ));
    }
    Ok(())
}

pub fn run_breaker_reset(root: &Path, port: Option<u16>, out: &dyn UserOutput) -> anyhow::Result<()> {
    let port = resolve_port(root, port)?;
    registry(root)?.for_port(port).reset()?;
    out.success(&format!("Circuit breaker for port {} reset", port));
    Ok(())
}
