//! Resolve which processes are listening on a TCP port.
//!
//! Linux combines `ss` and `lsof`; macOS uses `lsof`. Other platforms report
//! nothing, which callers treat as "cannot determine".

#[cfg(unix)]
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub pid: u32,
    pub name: String,
}

/// Find all processes listening on `port`, deduplicated by PID.
pub fn find_listeners(port: u16) -> Vec<Listener> {
    #[cfg(target_os = "macos")]
    {
        listeners_lsof(port)
    }

    #[cfg(target_os = "linux")]
    {
        let mut listeners = listeners_ss(port);
        let seen: std::collections::HashSet<u32> = listeners.iter().map(|l| l.pid).collect();
        for l in listeners_lsof(port) {
            if !seen.contains(&l.pid) {
                listeners.push(l);
            }
        }
        listeners
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = port;
        Vec::new()
    }
}

#[cfg(target_os = "linux")]
fn listeners_ss(port: u16) -> Vec<Listener> {
    let output = match Command::new("ss")
        .args(["-tlnpH", &format!("sport = :{}", port)])
        .output()
    {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };

    parse_ss_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `ss -tlnp` output: the users column carries `pid=NNN` entries.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_ss_output(stdout: &str) -> Vec<Listener> {
    let mut listeners = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for line in stdout.lines() {
        if line.starts_with("State") {
            continue;
        }
        let Some(users) = line.split_whitespace().last() else {
            continue;
        };
        // users:(("dolt",pid=1234,fd=7))
        let name = users
            .split('"')
            .nth(1)
            .unwrap_or("unknown")
            .to_string();
        for part in users.split(|c| c == ',' || c == ')') {
            if let Some(pid) = part.strip_prefix("pid=").and_then(|p| p.parse::<u32>().ok()) {
                if seen.insert(pid) {
                    listeners.push(Listener {
                        pid,
                        name: name.clone(),
                    });
                }
            }
        }
    }

    listeners
}

#[cfg(unix)]
fn listeners_lsof(port: u16) -> Vec<Listener> {
    let output = match Command::new("lsof")
        .args([
            "-nP",
            &format!("-iTCP:{}", port),
            "-sTCP:LISTEN",
            "-F",
            "pc",
        ])
        .output()
    {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };

    parse_lsof_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `lsof -F pc` field output: each process block starts with a `p` line,
/// followed by a `c` line with the command name.
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn parse_lsof_output(stdout: &str) -> Vec<Listener> {
    let mut listeners: Vec<Listener> = Vec::new();
    let mut current: Option<Listener> = None;

    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            if let Some(done) = current.take() {
                if !listeners.iter().any(|l| l.pid == done.pid) {
                    listeners.push(done);
                }
            }
            current = pid.parse::<u32>().ok().map(|pid| Listener {
                pid,
                name: "unknown".to_string(),
            });
        } else if let Some(command) = line.strip_prefix('c') {
            if let Some(l) = current.as_mut() {
                l.name = command.to_string();
            }
        }
    }

    if let Some(done) = current {
        if !listeners.iter().any(|l| l.pid == done.pid) {
            listeners.push(done);
        }
    }

    listeners
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ss_users_column() {
        let out = "LISTEN 0 128 127.0.0.1:13401 0.0.0.0:* users:((\"dolt\",pid=4242,fd=9))\n";
        let listeners = parse_ss_output(out);
        assert_eq!(
            listeners,
            vec![Listener {
                pid: 4242,
                name: "dolt".into()
            }]
        );
    }

    #[test]
    fn parses_ss_multiple_pids_once() {
        let out = "LISTEN 0 128 *:13401 *:* users:((\"dolt\",pid=10,fd=9),(\"dolt\",pid=11,fd=9),(\"dolt\",pid=10,fd=12))\n";
        let pids: Vec<u32> = parse_ss_output(out).into_iter().map(|l| l.pid).collect();
        assert_eq!(pids, vec![10, 11]);
    }

    #[test]
    fn parses_lsof_field_output() {
        let out = "p123\ncdolt\np456\ncpython3\np123\ncdolt\n";
        let listeners = parse_lsof_output(out);
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].pid, 123);
        assert_eq!(listeners[0].name, "dolt");
        assert_eq!(listeners[1].name, "python3");
    }

    #[test]
    fn empty_output_yields_nothing() {
        assert!(parse_ss_output("").is_empty());
        assert!(parse_lsof_output("").is_empty());
    }
}
