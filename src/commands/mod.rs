mod breaker;
mod server;
mod store;

pub use breaker::{run_breaker_reset, run_breaker_status};
pub use server::{run_idle_monitor, run_server_ensure, run_server_start, run_server_status, run_server_stop};
pub use store::{run_compact_candidates, run_compact_check, run_compact_stats, run_promote};
