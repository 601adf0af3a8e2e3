//! Deterministic per-project port derivation with a bounded fallback scan.

use std::net::TcpListener;
use std::path::Path;

/// First port of the derived range. Chosen above MySQL's 3306 and common
/// dev-server ports so a derived port rarely collides with a real service.
pub const PORT_RANGE_BASE: u16 = 13307;
/// Number of ports in the derived range.
pub const PORT_RANGE_SIZE: u16 = 1000;
/// Successive ports probed when the derived port is taken.
pub const PORT_FALLBACK_ATTEMPTS: u16 = 10;

/// FNV-1a 32-bit hash, deterministic across Rust versions and platforms.
pub(crate) fn fnv1a_32(data: &[u8]) -> u32 {
    const FNV_OFFSET: u32 = 2_166_136_261;
    const FNV_PRIME: u32 = 16_777_619;
    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Derive the server port for a project from its absolute path.
///
/// Identical paths always map to the same port. Distinct paths usually map to
/// distinct ports; collisions are resolved by [`find_available_port`] and the
/// port reclamation logic in the server manager, not here.
pub fn derive_port(project_root: &Path) -> u16 {
    let canonical = std::fs::canonicalize(project_root).unwrap_or_else(|_| {
        if project_root.is_absolute() {
            project_root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(project_root))
                .unwrap_or_else(|_| project_root.to_path_buf())
        }
    });
    let hash = fnv1a_32(canonical.as_os_str().as_encoded_bytes());
    PORT_RANGE_BASE + (hash % PORT_RANGE_SIZE as u32) as u16
}

/// Whether `port` is in the derived range.
pub fn in_derived_range(port: u16) -> bool {
    (PORT_RANGE_BASE..PORT_RANGE_BASE + PORT_RANGE_SIZE).contains(&port)
}

/// Returns the `offset`-th successor of `port`, wrapping inside the derived range.
fn wrap_in_range(port: u16, offset: u16) -> u16 {
    if !in_derived_range(port) {
        return port.saturating_add(offset);
    }
    let rel = (port - PORT_RANGE_BASE) as u32 + offset as u32;
    PORT_RANGE_BASE + (rel % PORT_RANGE_SIZE as u32) as u16
}

/// Check if a port can currently be bound on `host`.
///
/// On macOS, binding to 127.0.0.1 can succeed even when 0.0.0.0 is in use,
/// so loopback hosts check both addresses.
pub fn is_port_bindable(host: &str, port: u16) -> bool {
    if TcpListener::bind((host, port)).is_err() {
        return false;
    }
    if host == "127.0.0.1" || host == "localhost" {
        return TcpListener::bind(("0.0.0.0", port)).is_ok();
    }
    true
}

/// Linear probe from `derived` for the first bindable port.
///
/// If every candidate is taken the original port is returned so the caller's
/// bind failure names the port the user would expect.
pub fn find_available_port(host: &str, derived: u16) -> u16 {
    for offset in 0..PORT_FALLBACK_ATTEMPTS {
        let candidate = wrap_in_range(derived, offset);
        if is_port_bindable(host, candidate) {
            if offset > 0 {
                tracing::info!(
                    "Derived port {} is busy, using fallback port {}",
                    derived,
                    candidate
                );
            }
            return candidate;
        }
    }

    tracing::warn!(
        "No free port in {}..+{} from {}, returning derived port",
        derived,
        PORT_FALLBACK_ATTEMPTS,
        derived
    );
    derived
}
