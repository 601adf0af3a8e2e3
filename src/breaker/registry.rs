use super::{BreakerConfig, CircuitBreaker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Well-known breaker file for `port` under `dir`.
pub fn breaker_file_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("beads-dolt-circuit-{}.json", port))
}

/// Per-process handles to the shared per-port breaker files.
///
/// Construct one per process and pass it to whatever opens connections.
#[derive(Debug)]
pub struct BreakerRegistry {
    dir: PathBuf,
    config: BreakerConfig,
    breakers: Mutex<HashMap<u16, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Registry keeping state files in the system temp directory, where every
    /// process on the host finds them.
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_dir(std::env::temp_dir(), config)
    }

    pub fn with_dir(dir: impl Into<PathBuf>, config: BreakerConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_port(&self, port: u16) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(port)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    port,
                    breaker_file_path(&self.dir, port),
                    self.config,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_port_same_handle() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = BreakerRegistry::with_dir(dir.path(), BreakerConfig::default());
        let a = registry.for_port(13400);
        let b = registry.for_port(13400);
        let c = registry.for_port(13401);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(
            a.path(),
            dir.path().join("beads-dolt-circuit-13400.json").as_path()
        );
    }
}
