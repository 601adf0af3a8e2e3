// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Category of a failed database operation.
///
/// Callers match on this instead of inspecting driver error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOp {
    Transaction,
    Query,
    Scan,
    Exec,
}

impl fmt::Display for DbOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbOp::Transaction => "transaction",
            DbOp::Query => "query",
            DbOp::Scan => "scan",
            DbOp::Exec => "exec",
        };
        f.write_str(name)
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(bd::config::error), help("Check .beads/config.yaml"))]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection error: {0}")]
    #[diagnostic(
        code(bd::server::connection),
        help("Check that the dolt server is running with `bd server status`")
    )]
    Connection(String),

    #[error("Process error: {0}")]
    #[diagnostic(
        code(bd::process::error),
        help("Check that dolt is installed and on PATH")
    )]
    Process(String),

    #[error("Timeout waiting for {what} after {timeout:?}")]
    #[diagnostic(code(bd::server::timeout))]
    Timeout { what: String, timeout: Duration },

    #[error("Lock {} is held by another process", .0.display())]
    #[diagnostic(code(bd::lock::contention))]
    LockContention(PathBuf),

    #[error("Explicit server port {port} on {host} is not reachable; auto-start is disabled when a port is configured")]
    #[diagnostic(
        code(bd::server::guard_violation),
        help("Start the server for port {port} manually, or remove `server.port` from .beads/config.yaml to let bd manage it")
    )]
    GuardViolation { host: String, port: u16 },

    #[error("Port {port} is in use{}", .pid.map(|p| format!(" by PID {}", p)).unwrap_or_default())]
    #[diagnostic(code(bd::port::conflict))]
    PortConflict { port: u16, pid: Option<u32> },

    #[error("Dolt server for {} is not running", .0.display())]
    #[diagnostic(
        code(bd::server::not_running),
        help("Start it with: bd server start")
    )]
    ServerNotRunning(PathBuf),

    #[error("Dolt server on port {port} appears down, failing fast (circuit open, retry after {cooldown:?})")]
    #[diagnostic(
        code(bd::breaker::open),
        help("Wait for the cooldown or reset with: bd breaker reset --port {port}")
    )]
    CircuitOpen { port: u16, cooldown: Duration },

    #[error("Tier invariant violated for '{id}': {detail}")]
    #[diagnostic(code(bd::store::tier_invariant))]
    TierInvariant { id: String, detail: String },

    #[error("Not found: {0}")]
    #[diagnostic(code(bd::store::not_found))]
    NotFound(String),

    #[error("Validation failed: {0}")]
    #[diagnostic(code(bd::store::validation))]
    Validation(String),

    #[error("{op} error during {context}: {source}")]
    #[diagnostic(code(bd::store::database))]
    Store {
        op: DbOp,
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    #[diagnostic(code(bd::database::error))]
    Database(#[from] sqlx::Error),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a driver error with operation context. "No rows" becomes `NotFound`.
    pub fn db(op: DbOp, context: impl Into<String>, source: sqlx::Error) -> Self {
        let context = context.into();
        match source {
            sqlx::Error::RowNotFound => Error::NotFound(context),
            source => Error::Store {
                op,
                context,
                source,
            },
        }
    }

    /// Returns the database category for store errors.
    pub fn db_op(&self) -> Option<DbOp> {
        match self {
            Error::Store { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::GuardViolation { port, .. } => Some(format!(
                "An explicit port ({}) is configured, so bd will not start or substitute a server. \
                 Start the server on that port yourself, or remove `server.port` from .beads/config.yaml.",
                port
            )),
            Error::CircuitOpen { port, cooldown } => Some(format!(
                "The server on port {} failed repeatedly. bd will probe it again in {:?}. \
                 Check `bd server status`, or clear the breaker with `bd breaker reset --port {}`.",
                port, cooldown, port
            )),
            Error::ServerNotRunning(_) => Some("Start the server with: bd server start".to_string()),
            Error::PortConflict { port, pid } => Some(match pid {
                Some(p) => format!(
                    "Port {} is held by PID {}. Stop that process or choose another `server.port`.",
                    port, p
                ),
                None => format!(
                    "Port {} is already in use. Find the owner with: lsof -i :{}",
                    port, port
                ),
            }),
            Error::Process(msg) if msg.contains("not found") => Some(
                "Install dolt (https://github.com/dolthub/dolt) and make sure it is on PATH"
                    .to_string(),
            ),
            Error::Timeout { .. } => Some(
                "The server did not become ready in time. Check .beads/dolt-server.log".to_string(),
            ),
            Error::Config(_) | Error::Yaml(_) => {
                Some("Check the syntax of .beads/config.yaml".to_string())
            }
            Error::Database(e) | Error::Store { source: e, .. } => {
                let err_str = e.to_string();
                if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY") {
                    Some("Another bd process holds the database. Retry in a moment.".to_string())
                } else if matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) {
                    Some("The dolt server did not answer. Check it with: bd server status".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
#[cfg(unix)]
pub fn validate_pid(pid: u32, what: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for {} (refers to process group, not a process)",
                what
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("refusing to signal PID 1 (init) for {}", what),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for {}, cannot convert safely",
                pid, what
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but allows PID 1 for existence checks.
/// Use validate_pid for signal operations; use this for read-only checks.
#[cfg(unix)]
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_is_normalized_to_not_found() {
        let err = Error::db(DbOp::Query, "issue bd-1", sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert_eq!(err.db_op(), None);
    }

    #[test]
    fn driver_errors_keep_their_category() {
        let err = Error::db(
            DbOp::Exec,
            "insert issue",
            sqlx::Error::ColumnNotFound("nope".into()),
        );
        assert_eq!(err.db_op(), Some(DbOp::Exec));
        assert!(err.to_string().starts_with("exec error during insert issue"));
        assert_eq!(err.suggestion(), None);
    }

    #[test]
    fn unanswered_pool_points_at_server_status() {
        let err = Error::db(DbOp::Query, "issue bd-1", sqlx::Error::PoolTimedOut);
        assert!(err.suggestion().unwrap().contains("bd server status"));
    }

    #[test]
    fn guard_violation_names_the_port() {
        let err = Error::GuardViolation {
            host: "127.0.0.1".into(),
            port: 13400,
        };
        assert!(err.to_string().contains("13400"));
        assert!(err.to_string().contains("not reachable"));
        assert!(err.suggestion().unwrap().contains("13400"));
    }

    #[test]
    fn circuit_open_mentions_cooldown() {
        let err = Error::CircuitOpen {
            port: 13500,
            cooldown: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("failing fast"));
        assert!(msg.contains("5s"));
    }

    #[cfg(unix)]
    #[test]
    fn validate_pid_rejects_special_values() {
        assert!(validate_pid(0, "server").is_err());
        assert!(validate_pid(1, "server").is_err());
        assert!(validate_pid(i32::MAX as u32 + 1, "server").is_err());
        assert!(validate_pid(4242, "server").is_ok());
        assert!(validate_pid_for_check(1).is_some());
        assert!(validate_pid_for_check(0).is_none());
    }
}
