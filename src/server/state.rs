use crate::config::BEADS_DIR;
use crate::error::Result;
use crate::files;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DATA_DIR_NAME: &str = "dolt";
pub const PID_FILE: &str = "dolt-server.pid";
pub const PORT_FILE: &str = "dolt-server.port";
pub const ACTIVITY_FILE: &str = "dolt-server.activity";
pub const LOCK_FILE: &str = "dolt-server.lock";
pub const SERVER_LOG_FILE: &str = "dolt-server.log";
pub const MONITOR_PID_FILE: &str = "dolt-monitor.pid";
pub const MONITOR_LOG_FILE: &str = "dolt-monitor.log";

/// Snapshot of the server for one project root.
///
/// `running` is only true when the PID is alive and verified to be the
/// server binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerState {
    pub running: bool,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub data_dir: PathBuf,
}

impl ServerState {
    pub fn not_running(data_dir: PathBuf) -> Self {
        Self {
            running: false,
            pid: None,
            port: None,
            data_dir,
        }
    }
}

/// Locations of the per-project state files under `.beads/`.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub beads_dir: PathBuf,
    pub data_dir: PathBuf,
    pub pid: PathBuf,
    pub port: PathBuf,
    pub activity: PathBuf,
    pub lock: PathBuf,
    pub server_log: PathBuf,
    pub monitor_pid: PathBuf,
    pub monitor_log: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> Self {
        let beads_dir = root.join(BEADS_DIR);
        Self {
            data_dir: beads_dir.join(DATA_DIR_NAME),
            pid: beads_dir.join(PID_FILE),
            port: beads_dir.join(PORT_FILE),
            activity: beads_dir.join(ACTIVITY_FILE),
            lock: beads_dir.join(LOCK_FILE),
            server_log: beads_dir.join(SERVER_LOG_FILE),
            monitor_pid: beads_dir.join(MONITOR_PID_FILE),
            monitor_log: beads_dir.join(MONITOR_LOG_FILE),
            beads_dir,
        }
    }

    pub fn read_pid(&self) -> Option<u32> {
        files::read_value(&self.pid).filter(|pid| *pid > 0)
    }

    pub fn read_port(&self) -> Option<u16> {
        files::read_value(&self.port).filter(|port| *port > 0)
    }

    pub fn write_server(&self, pid: u32, port: u16) -> Result<()> {
        files::write_value(&self.pid, pid)?;
        files::write_value(&self.port, port)
    }

    /// Last recorded activity, if any.
    pub fn read_activity(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = files::read_value(&self.activity)?;
        Utc.timestamp_opt(secs, 0).single()
    }

    pub fn touch_activity(&self) -> Result<()> {
        self.touch_activity_at(Utc::now())
    }

    pub fn touch_activity_at(&self, at: DateTime<Utc>) -> Result<()> {
        files::write_value(&self.activity, at.timestamp())
    }

    /// Remove PID and port files after a stale PID was found.
    pub fn clear_stale(&self) -> Result<()> {
        files::remove_if_exists(&self.pid)?;
        files::remove_if_exists(&self.port)
    }

    /// Remove PID, port and activity files after a stop or failed start.
    pub fn clear_all(&self) -> Result<()> {
        self.clear_stale()?;
        files::remove_if_exists(&self.activity)
    }
}
