//! Auto-managed dolt sql-server.
//!
//! One server per project root, shared by every `bd` process working in that
//! project. [`ServerManager`] starts it on demand under an advisory lock,
//! verifies its identity before trusting a PID file, and stops it on request.
//! The idle monitor sidecar stops it once nobody has used it for a while.

mod backend;
pub mod idle;
mod manager;
mod state;

pub use backend::{DoltBackend, ServerBackend};
pub use idle::{run_idle_monitor, run_idle_monitor_with, spawn_idle_monitor, stop_idle_monitor};
pub use manager::ServerManager;
pub use state::{ServerState, StatePaths};
