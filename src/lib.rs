//! # beads-dolt
//!
//! Storage core of the `bd` issue tracker: an auto-managed `dolt sql-server`
//! per project, a cross-process circuit breaker in front of it, and tiered
//! issue storage with ephemeral "wisps" and age-based compaction.
//!
//! ## Features
//!
//! - **Server lifecycle**: one server per project root, started on demand on a
//!   port derived from the project path, shared by every `bd` process
//! - **Multi-process safety**: advisory start lock with double-checked state,
//!   identity-verified PID files, stale state repaired in place
//! - **Idle monitor**: a detached sidecar stops unused servers and restarts
//!   ones that crash while in use
//! - **Circuit breaker**: per-port breaker state shared through a file so a
//!   down server fails fast across invocations
//! - **Wisps**: ephemeral issues in parallel tables, promotable to durable ones
//! - **Compaction**: two age-gated, monotonic compaction tiers for closed issues
//!
//! ## Quick Start
//!
//! ```no_run
//! use beads_dolt::ServerManager;
//!
//! # async fn example() -> Result<(), beads_dolt::Error> {
//! let root = std::path::Path::new(".");
//! let manager = ServerManager::from_project(root)?;
//!
//! // Starts the server if needed and returns the port to connect to
//! let port = manager.ensure_running().await?;
//! println!("dolt is listening on {}", port);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod files;
pub mod lock;
pub mod port;
pub mod process;
pub mod server;
pub mod store;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker, CircuitState};
pub use config::{ProjectConfig, ServerConfig};
pub use error::{DbOp, Error, Result};
pub use process::{ProcessProbe, ServerSignature};
pub use server::{ServerManager, ServerState};
pub use store::{DoltTarget, Issue, IssueStore, Tier};
