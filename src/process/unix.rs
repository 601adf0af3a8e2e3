use super::{ProcessProbe, ServerSignature};
use crate::error::{validate_pid, validate_pid_for_check, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use std::path::Path;

/// `/proc`-based probe on Linux, `ps`/`lsof`-based on other unixes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProbe;

impl ProcessProbe for UnixProbe {
    fn is_process_alive(&self, pid: u32) -> bool {
        let Some(nix_pid) = validate_pid_for_check(pid) else {
            return false;
        };

        // Signal 0 performs the permission and existence checks only.
        // EPERM means the process exists but belongs to someone else.
        match signal::kill(nix_pid, None) {
            Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
            Err(_) => false,
        }
    }

    fn command_line(&self, pid: u32) -> Option<Vec<String>> {
        read_command_line(pid)
    }

    fn find_pid_on_port(&self, port: u16) -> Option<u32> {
        crate::port::find_listeners(port)
            .into_iter()
            .map(|l| l.pid)
            .next()
    }

    fn is_process_in_dir(&self, pid: u32, dir: &Path) -> bool {
        let Some(cwd) = process_cwd(pid) else {
            return false;
        };
        let want = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let have = cwd.canonicalize().unwrap_or(cwd);
        have == want
    }

    fn list_server_pids(&self, signature: &ServerSignature) -> Vec<u32> {
        let me = std::process::id();
        candidate_pids()
            .into_iter()
            .filter(|pid| *pid != me)
            .filter(|pid| {
                read_command_line(*pid)
                    .map(|argv| signature.matches(&argv))
                    .unwrap_or(false)
            })
            .filter(|pid| self.is_process_alive(*pid))
            .collect()
    }
}

/// Signal the process group of `pid`, falling back to the single process.
pub(super) fn send_signal(pid: u32, what: &str, sig: Signal) -> Result<()> {
    let nix_pid = validate_pid(pid, what)?;
    let pgid = nix::unistd::getpgid(Some(nix_pid))
        .ok()
        .filter(|pgid| pgid.as_raw() > 1);

    // Only signal the group when the target leads it; never the caller's own group.
    let own_pgid = nix::unistd::getpgrp();
    let result = match pgid {
        Some(pgid) if pgid == nix_pid && pgid != own_pgid => {
            killpg(pgid, sig).or_else(|_| signal::kill(nix_pid, sig))
        }
        _ => signal::kill(nix_pid, sig),
    };

    match result {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(crate::Error::Process(format!(
            "Failed to send {:?} to {} (PID {}): {}",
            sig, what, pid, e
        ))),
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // The state field follows the parenthesised command name, which may itself
    // contain spaces, so parse from the last ')'.
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let close = stat.rfind(')')?;
            stat[close + 1..].split_whitespace().next().map(|s| s == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(pid: u32) -> bool {
    std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "stat="])
        .output()
        .ok()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().starts_with('Z'))
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
fn read_command_line(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let argv: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect();
    if argv.is_empty() {
        None
    } else {
        Some(argv)
    }
}

#[cfg(not(target_os = "linux"))]
fn read_command_line(pid: u32) -> Option<Vec<String>> {
    let output = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "command="])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout);
    let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        None
    } else {
        Some(argv)
    }
}

#[cfg(target_os = "linux")]
fn process_cwd(pid: u32) -> Option<std::path::PathBuf> {
    std::fs::read_link(format!("/proc/{}/cwd", pid)).ok()
}

#[cfg(target_os = "macos")]
fn process_cwd(pid: u32) -> Option<std::path::PathBuf> {
    let output = std::process::Command::new("lsof")
        .args(["-a", "-p", &pid.to_string(), "-d", "cwd", "-Fn"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix('n').map(std::path::PathBuf::from))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn process_cwd(_pid: u32) -> Option<std::path::PathBuf> {
    None
}

#[cfg(target_os = "linux")]
fn candidate_pids() -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn candidate_pids() -> Vec<u32> {
    let Ok(output) = std::process::Command::new("ps").args(["-axo", "pid="]).output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .collect()
}
