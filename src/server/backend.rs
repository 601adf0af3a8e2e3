//! How a database server is provisioned and launched.

use crate::error::{Error, Result};
use crate::process::ServerSignature;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Provisioning and launch of a database server process.
///
/// The manager owns locking, port choice, state files and readiness. A
/// backend only knows how to prepare a data directory and build the command
/// that serves it.
#[async_trait]
pub trait ServerBackend: Send + Sync {
    /// Command-line shape used to recognise this backend's server processes.
    fn signature(&self) -> ServerSignature;

    /// Make sure the binary exists and `data_dir` holds `database`.
    async fn prepare(&self, data_dir: &Path, database: &str) -> Result<()>;

    /// Launch command for serving `data_dir` on `host:port`.
    ///
    /// The manager sets the working directory, stdio and process group.
    fn command(&self, host: &str, port: u16, data_dir: &Path) -> Result<Command>;
}

/// Fallback identity when neither dolt nor git has one configured.
const DEFAULT_USER_NAME: &str = "beads";
const DEFAULT_USER_EMAIL: &str = "beads@localhost";

/// Runs `dolt sql-server`.
#[derive(Debug, Clone)]
pub struct DoltBackend {
    binary: String,
}

impl DoltBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resolve the binary on PATH.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        which::which(&self.binary).map_err(|_| {
            Error::Process(format!(
                "dolt binary '{}' not found on PATH",
                self.binary
            ))
        })
    }

    async fn dolt_output(&self, binary: &Path, args: &[&str], cwd: Option<&Path>) -> Result<Option<String>> {
        let mut cmd = Command::new(binary);
        cmd.args(args).stdin(Stdio::null());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Process(format!("Failed to run dolt {}: {}", args.join(" "), e)))?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Make sure dolt has `user.name` and `user.email`, copying git's if unset.
    ///
    /// Git is asked from inside `project_dir`, so a repository-local identity
    /// wins over the global one.
    async fn ensure_identity(&self, binary: &Path, project_dir: &Path) -> Result<()> {
        for (key, fallback) in [
            ("user.name", DEFAULT_USER_NAME),
            ("user.email", DEFAULT_USER_EMAIL),
        ] {
            let existing = self
                .dolt_output(binary, &["config", "--global", "--get", key], None)
                .await?
                .filter(|v| !v.is_empty());
            if existing.is_some() {
                continue;
            }

            let value = git_config(key, project_dir)
                .await
                .unwrap_or_else(|| fallback.to_string());
            info!("Configuring dolt {} from {}", key, if value == fallback { "defaults" } else { "git" });
            let set = self
                .dolt_output(binary, &["config", "--global", "--add", key, &value], None)
                .await?;
            if set.is_none() {
                return Err(Error::Process(format!(
                    "Failed to set dolt {} (run: dolt config --global --add {} <value>)",
                    key, key
                )));
            }
        }
        Ok(())
    }
}

/// `git config --get key` as seen from `dir`, or its nearest existing ancestor.
async fn git_config(key: &str, dir: &Path) -> Option<String> {
    let cwd = dir.ancestors().find(|p| p.is_dir())?;
    let output = Command::new("git")
        .args(["config", "--get", key])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[async_trait]
impl ServerBackend for DoltBackend {
    fn signature(&self) -> ServerSignature {
        ServerSignature::new(self.binary.clone(), "sql-server")
    }

    async fn prepare(&self, data_dir: &Path, database: &str) -> Result<()> {
        let binary = self.resolve_binary()?;
        self.ensure_identity(&binary, data_dir).await?;

        let db_dir = data_dir.join(database);
        if db_dir.join(".dolt").is_dir() {
            debug!("Database {:?} already initialized", db_dir);
            return Ok(());
        }

        std::fs::create_dir_all(&db_dir)?;
        info!("Initializing dolt database in {:?}", db_dir);
        if self
            .dolt_output(&binary, &["init"], Some(&db_dir))
            .await?
            .is_none()
        {
            return Err(Error::Process(format!(
                "dolt init failed in {}",
                db_dir.display()
            )));
        }
        Ok(())
    }

    fn command(&self, host: &str, port: u16, _data_dir: &Path) -> Result<Command> {
        let binary = self.resolve_binary()?;
        let mut cmd = Command::new(binary);
        cmd.arg("sql-server")
            .arg("--host")
            .arg(host)
            .arg("--port")
            .arg(port.to_string());
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_uses_configured_binary() {
        let backend = DoltBackend::new("/opt/dolt/bin/dolt");
        let sig = backend.signature();
        assert_eq!(sig.subcommand, "sql-server");
        assert!(sig.matches(&[
            "/opt/dolt/bin/dolt".to_string(),
            "sql-server".to_string()
        ]));
    }

    #[test]
    fn missing_binary_is_a_process_error() {
        let backend = DoltBackend::new("definitely-not-a-dolt-binary-xyz");
        let err = backend.resolve_binary().unwrap_err();
        assert!(matches!(err, Error::Process(_)));
        assert!(err.suggestion().is_some());
    }

    #[tokio::test]
    async fn git_identity_is_read_from_the_project_repository() {
        if which::which("git").is_err() {
            eprintln!("skipping: git not on PATH");
            return;
        }
        let project = tempfile::TempDir::new().unwrap();
        let git = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(project.path())
                .output()
                .unwrap()
        };
        assert!(git(&["init", "-q"]).status.success());
        assert!(git(&["config", "user.name", "Project Local Name"]).status.success());

        // The data dir does not exist before the first start
        let data_dir = project.path().join(".beads").join("dolt");
        assert_eq!(
            git_config("user.name", &data_dir).await.as_deref(),
            Some("Project Local Name")
        );
    }

    #[tokio::test]
    async fn prepare_initializes_database_when_dolt_present() {
        if which::which("dolt").is_err() {
            eprintln!("skipping: dolt not on PATH");
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let backend = DoltBackend::new("dolt");
        backend.prepare(dir.path(), "beads").await.unwrap();
        assert!(dir.path().join("beads").join(".dolt").is_dir());
        // Second call is a no-op
        backend.prepare(dir.path(), "beads").await.unwrap();
    }
}
