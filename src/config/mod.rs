//! Project configuration.
//!
//! - `types` - `ProjectConfig`, `ServerConfig`, `BreakerSettings`
//! - `parser` - loading `.beads/config.yaml` and project root discovery
//! - `duration` - human-readable duration strings

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;
