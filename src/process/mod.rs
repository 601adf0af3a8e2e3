//! Process introspection and signalling.
//!
//! [`ProcessProbe`] answers the questions the server manager needs to tell
//! "my server" apart from a reused PID or another project's server. The unix
//! implementation reads `/proc` (Linux) or shells out to `ps`/`lsof` (macOS).
//! Elsewhere the fallback probe answers identity and directory questions with
//! "cannot determine", which callers treat as a foreign process.

#[cfg(not(unix))]
mod fallback;
#[cfg(unix)]
mod unix;

#[cfg(not(unix))]
pub use fallback::FallbackProbe;
#[cfg(unix)]
pub use unix::UnixProbe;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What the command line of a database server process must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSignature {
    /// Binary file name, e.g. `dolt`
    pub binary: String,
    /// Subcommand that must appear in argv, e.g. `sql-server`
    pub subcommand: String,
}

impl ServerSignature {
    pub fn new(binary: impl Into<String>, subcommand: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            subcommand: subcommand.into(),
        }
    }

    pub fn dolt() -> Self {
        Self::new("dolt", "sql-server")
    }

    /// True if argv names the binary (by file name) and carries the subcommand.
    ///
    /// The binary may appear in the first two positions so interpreters and
    /// wrappers (`env dolt ...`) still match, but the image name alone is never
    /// enough.
    pub fn matches(&self, argv: &[String]) -> bool {
        let binary_name = Path::new(&self.binary)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.binary.clone());

        let has_binary = argv.iter().take(2).any(|arg| {
            Path::new(arg)
                .file_name()
                .map(|n| n.to_string_lossy() == binary_name.as_str())
                .unwrap_or(false)
        });

        has_binary && argv.iter().skip(1).any(|arg| arg == &self.subcommand)
    }
}

/// Platform process introspection.
pub trait ProcessProbe: Send + Sync {
    /// Existence check (zero signal on unix). Zombies count as dead.
    fn is_process_alive(&self, pid: u32) -> bool;

    /// Full argv of a process, if it can be read.
    fn command_line(&self, pid: u32) -> Option<Vec<String>>;

    /// Alive and its command line matches `signature`.
    fn is_server_process(&self, pid: u32, signature: &ServerSignature) -> bool {
        self.is_process_alive(pid)
            && self
                .command_line(pid)
                .map(|argv| signature.matches(&argv))
                .unwrap_or(false)
    }

    /// PID of a process listening on `port`, if any can be resolved.
    fn find_pid_on_port(&self, port: u16) -> Option<u32>;

    /// Whether the process's working directory is `dir`.
    /// Returns false when the working directory cannot be determined.
    fn is_process_in_dir(&self, pid: u32, dir: &Path) -> bool;

    /// All live processes whose command line matches `signature`.
    fn list_server_pids(&self, signature: &ServerSignature) -> Vec<u32>;
}

/// The probe for the current platform.
pub fn default_probe() -> Arc<dyn ProcessProbe> {
    #[cfg(unix)]
    {
        Arc::new(UnixProbe)
    }
    #[cfg(not(unix))]
    {
        Arc::new(FallbackProbe)
    }
}

/// Ask a process (and its process group) to exit.
pub fn terminate(pid: u32, what: &str) -> crate::Result<()> {
    #[cfg(unix)]
    {
        unix::send_signal(pid, what, nix::sys::signal::Signal::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        fallback::taskkill(pid, what, false)
    }
}

/// Kill a process (and its process group) immediately.
pub fn force_kill(pid: u32, what: &str) -> crate::Result<()> {
    #[cfg(unix)]
    {
        unix::send_signal(pid, what, nix::sys::signal::Signal::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        fallback::taskkill(pid, what, true)
    }
}

/// Poll until `pid` exits. Returns true if it exited within `timeout`.
pub async fn wait_for_exit(
    probe: &dyn ProcessProbe,
    pid: u32,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let polls = (timeout.as_millis() / interval.as_millis().max(1)).max(1) as u64;
    for _ in 0..polls {
        if !probe.is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    !probe.is_process_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn signature_requires_binary_and_subcommand() {
        let sig = ServerSignature::dolt();
        assert!(sig.matches(&argv(&["/usr/local/bin/dolt", "sql-server", "--port", "13400"])));
        assert!(sig.matches(&argv(&["dolt", "sql-server"])));
        assert!(!sig.matches(&argv(&["dolt", "status"])));
        assert!(!sig.matches(&argv(&["sql-server"])));
        assert!(!sig.matches(&argv(&["vim", "dolt", "notes"])));
        assert!(!sig.matches(&[]));
    }

    #[test]
    fn signature_does_not_match_on_substring() {
        let sig = ServerSignature::dolt();
        assert!(!sig.matches(&argv(&["doltlab", "sql-server"])));
        assert!(!sig.matches(&argv(&["dolt", "sql-server-config"])));
    }

    #[test]
    fn signature_allows_wrapper_in_first_position() {
        let sig = ServerSignature::dolt();
        assert!(sig.matches(&argv(&["env", "dolt", "sql-server"])));
    }
}
