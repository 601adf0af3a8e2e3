use super::{ProcessProbe, ServerSignature};
use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;

/// Probe for platforms without `/proc` or POSIX signals.
///
/// Liveness and port ownership come from `tasklist`/`netstat`. Command lines
/// and working directories are not available, so identity checks fail closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackProbe;

impl ProcessProbe for FallbackProbe {
    fn is_process_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
            .output()
            .map(|out| {
                String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", pid))
            })
            .unwrap_or(false)
    }

    fn command_line(&self, _pid: u32) -> Option<Vec<String>> {
        None
    }

    /// Identity cannot be read here, so a live PID from our own PID file is
    /// trusted as-is.
    fn is_server_process(&self, pid: u32, _signature: &ServerSignature) -> bool {
        self.is_process_alive(pid)
    }

    fn find_pid_on_port(&self, port: u16) -> Option<u32> {
        let output = Command::new("netstat").args(["-ano", "-p", "TCP"]).output().ok()?;
        parse_netstat_output(&String::from_utf8_lossy(&output.stdout), port)
    }

    fn is_process_in_dir(&self, _pid: u32, _dir: &Path) -> bool {
        false
    }

    fn list_server_pids(&self, _signature: &ServerSignature) -> Vec<u32> {
        Vec::new()
    }
}

pub(super) fn taskkill(pid: u32, what: &str, force: bool) -> Result<()> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("PID 0 is invalid for {}", what),
        });
    }
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let status = Command::new("taskkill").args(&args).status()?;
    if !status.success() && FallbackProbe.is_process_alive(pid) {
        return Err(Error::Process(format!(
            "taskkill failed for {} (PID {})",
            what, pid
        )));
    }
    Ok(())
}

/// Find the owning PID of a LISTENING socket on `port` in `netstat -ano` output.
fn parse_netstat_output(stdout: &str, port: u16) -> Option<u32> {
    let suffix = format!(":{}", port);
    stdout.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || !fields[3].eq_ignore_ascii_case("LISTENING") {
            return None;
        }
        if !fields[1].ends_with(&suffix) {
            return None;
        }
        fields[4].parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netstat_listening_row_is_parsed() {
        let out = "\
  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1012
  TCP    127.0.0.1:13400        0.0.0.0:0              LISTENING       4242
  TCP    127.0.0.1:13400        127.0.0.1:51000        ESTABLISHED     4242
";
        assert_eq!(parse_netstat_output(out, 13400), Some(4242));
        assert_eq!(parse_netstat_output(out, 1340), None);
    }
}
