//! Cross-process circuit breaker for connections to the dolt server.
//!
//! The breaker for a port is a JSON file shared by every `bd` process on the
//! host. Every operation re-reads it, applies the transition, and writes it
//! back atomically. The in-process mutex only orders concurrent callers
//! inside one process; the file is the authority.
//!
//! ```text
//! closed --(threshold failures in window)--> open
//! open   --(cooldown elapsed, first allow)--> half-open
//! half-open --(success)--> closed
//! half-open --(failure)--> open
//! ```

mod classify;
mod registry;

pub use classify::{is_connection_error, is_connection_error_message};
pub use registry::{breaker_file_path, BreakerRegistry};

use crate::error::{Error, Result};
use crate::files;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within `failure_window` that trip the breaker.
    pub failure_threshold: u32,
    pub failure_window: Duration,
    /// Time after tripping before a probe is allowed.
    pub cooldown: Duration,
    /// A half-open probe that has not reported back after this long is
    /// presumed lost and another caller may probe.
    pub probe_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        })
    }
}

/// Persisted breaker record for one port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    pub state: BreakerState,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub first_failure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tripped_at: Option<DateTime<Utc>>,
    /// When the current half-open probe was handed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_started_at: Option<DateTime<Utc>>,
}

fn elapsed(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    since.map(|t| (now - t).to_std().unwrap_or(Duration::ZERO))
}

impl CircuitState {
    /// Time left before an open breaker lets a probe through.
    pub fn cooldown_remaining(&self, config: &BreakerConfig, now: DateTime<Utc>) -> Duration {
        if self.state != BreakerState::Open {
            return Duration::ZERO;
        }
        match elapsed(self.tripped_at, now) {
            Some(e) => config.cooldown.saturating_sub(e),
            None => Duration::ZERO,
        }
    }
}

/// Breaker handle for one server port.
#[derive(Debug)]
pub struct CircuitBreaker {
    port: u16,
    path: PathBuf,
    config: BreakerConfig,
    lock: Mutex<()>,
}

impl CircuitBreaker {
    /// Breaker whose state lives at `path`.
    pub fn new(port: u16, path: impl Into<PathBuf>, config: BreakerConfig) -> Self {
        Self {
            port,
            path: path.into(),
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn load(&self) -> CircuitState {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return CircuitState::default();
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            debug!(
                "Ignoring corrupt breaker state {:?} ({}), treating as closed",
                self.path, e
            );
            CircuitState::default()
        })
    }

    fn save(&self, state: &CircuitState) {
        let result = serde_json::to_string_pretty(state)
            .map_err(Error::from)
            .and_then(|json| files::atomic_write(&self.path, &json));
        if let Err(e) = result {
            warn!("Failed to persist breaker state {:?}: {}", self.path, e);
        }
    }

    fn clear(&self) {
        if let Err(e) = files::remove_if_exists(&self.path) {
            warn!("Failed to clear breaker state {:?}: {}", self.path, e);
        }
    }

    /// Current persisted state.
    pub fn state(&self) -> CircuitState {
        let _guard = self.lock.lock();
        self.load()
    }

    /// Whether the caller may attempt a connection now.
    pub fn allow(&self) -> bool {
        self.allow_at(Utc::now())
    }

    /// [`allow`](Self::allow) evaluated at `now`.
    ///
    /// Half-open admits one trial call and holds a lease for it. Other callers
    /// are refused until that call records a result, or until `probe_timeout`
    /// passes without one. After that the lease is renewed for the next
    /// caller, so a trial that crashed or hung cannot wedge the breaker in
    /// half-open. Within a lease the answer is `false` until a result is
    /// recorded.
    pub fn allow_at(&self, now: DateTime<Utc>) -> bool {
        let _guard = self.lock.lock();
        let mut state = self.load();
        match state.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = elapsed(state.tripped_at, now)
                    .map(|e| e >= self.config.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return false;
                }
                info!(
                    "Circuit for port {} cooled down, allowing a probe (half-open)",
                    self.port
                );
                state.state = BreakerState::HalfOpen;
                state.probe_started_at = Some(now);
                self.save(&state);
                true
            }
            BreakerState::HalfOpen => {
                let lease_expired = elapsed(state.probe_started_at, now)
                    .map(|e| e >= self.config.probe_timeout)
                    .unwrap_or(true);
                if lease_expired {
                    debug!(
                        "Half-open probe for port {} never reported, allowing another",
                        self.port
                    );
                    state.probe_started_at = Some(now);
                    self.save(&state);
                }
                lease_expired
            }
        }
    }

    /// Fail fast with `CircuitOpen` when the breaker rejects the call.
    pub fn check(&self) -> Result<()> {
        if self.allow() {
            Ok(())
        } else {
            Err(Error::CircuitOpen {
                port: self.port,
                cooldown: self.config.cooldown,
            })
        }
    }

    /// Reset to a clean closed record.
    pub fn record_success(&self) {
        let _guard = self.lock.lock();
        let state = self.load();
        if state != CircuitState::default() {
            if state.state != BreakerState::Closed {
                info!("Circuit for port {} closed", self.port);
            }
            self.clear();
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Utc::now())
    }

    pub fn record_failure_at(&self, now: DateTime<Utc>) {
        let _guard = self.lock.lock();
        let mut state = self.load();
        match state.state {
            BreakerState::HalfOpen => {
                warn!("Probe to port {} failed, circuit re-opened", self.port);
                state.state = BreakerState::Open;
                state.failures = state.failures.saturating_add(1);
                state.last_failure = Some(now);
                state.tripped_at = Some(now);
                state.probe_started_at = None;
            }
            BreakerState::Open => {
                state.last_failure = Some(now);
            }
            BreakerState::Closed => {
                let outside_window = elapsed(state.last_failure, now)
                    .map(|e| e > self.config.failure_window)
                    .unwrap_or(true);
                if outside_window || state.failures == 0 {
                    state.failures = 0;
                    state.first_failure = Some(now);
                }
                state.failures = state.failures.saturating_add(1);
                state.last_failure = Some(now);

                if state.failures >= self.config.failure_threshold {
                    warn!(
                        "Dolt server on port {} failed {} times, circuit opened for {:?}",
                        self.port, state.failures, self.config.cooldown
                    );
                    state.state = BreakerState::Open;
                    state.tripped_at = Some(now);
                } else {
                    debug!(
                        "Connection failure {}/{} for port {}",
                        state.failures, self.config.failure_threshold, self.port
                    );
                }
            }
        }
        self.save(&state);
    }

    /// Remove any persisted state.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.lock.lock();
        files::remove_if_exists(&self.path)
    }

    /// Gate `op` through the breaker.
    ///
    /// Connection-level failures count against the breaker. Any other outcome,
    /// including a query error, proves the server is reachable and closes it.
    pub async fn call<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        match op.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if is_connection_error(&e) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn breaker(dir: &TempDir) -> CircuitBreaker {
        CircuitBreaker::new(
            13400,
            dir.path().join("circuit.json"),
            BreakerConfig::default(),
        )
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn trips_at_threshold() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();

        for i in 0..4 {
            cb.record_failure_at(t0 + secs(i));
            assert!(cb.allow_at(t0 + secs(i)));
        }
        cb.record_failure_at(t0 + secs(4));
        let state = cb.state();
        assert_eq!(state.state, BreakerState::Open);
        assert_eq!(state.failures, 5);
        assert!(!cb.allow_at(t0 + secs(5)));
    }

    #[test]
    fn failures_outside_window_restart_count() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();

        for i in 0..4 {
            cb.record_failure_at(t0 + secs(i));
        }
        cb.record_failure_at(t0 + secs(200));
        let state = cb.state();
        assert_eq!(state.state, BreakerState::Closed);
        assert_eq!(state.failures, 1);
        assert_eq!(state.first_failure, Some(t0 + secs(200)));
    }

    #[test]
    fn single_probe_after_cooldown() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }

        assert!(!cb.allow_at(t0 + secs(4)));
        assert!(cb.allow_at(t0 + secs(5)));
        assert_eq!(cb.state().state, BreakerState::HalfOpen);
        assert!(!cb.allow_at(t0 + secs(6)));
        assert!(!cb.allow_at(t0 + secs(7)));
    }

    #[test]
    fn probe_outcomes() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }

        assert!(cb.allow_at(t0 + secs(6)));
        cb.record_failure_at(t0 + secs(6));
        let state = cb.state();
        assert_eq!(state.state, BreakerState::Open);
        assert_eq!(state.tripped_at, Some(t0 + secs(6)));
        assert!(!cb.allow_at(t0 + secs(7)));

        assert!(cb.allow_at(t0 + secs(12)));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::default());
        assert!(!cb.path().exists());
        assert!(cb.allow_at(t0 + secs(12)));
    }

    #[test]
    fn lost_probe_lease_expires() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }
        assert!(cb.allow_at(t0 + secs(5)));
        assert!(!cb.allow_at(t0 + secs(20)));
        assert!(cb.allow_at(t0 + secs(40)));
    }

    #[test]
    fn expired_lease_is_renewed_for_one_caller() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }
        assert!(cb.allow_at(t0 + secs(5)));
        assert!(cb.allow_at(t0 + secs(35)));
        // The renewed lease refuses everyone else again
        assert!(!cb.allow_at(t0 + secs(36)));
        assert!(!cb.allow_at(t0 + secs(64)));
        assert_eq!(cb.state().state, BreakerState::HalfOpen);

        cb.record_failure_at(t0 + secs(64));
        assert_eq!(cb.state().state, BreakerState::Open);
        assert!(!cb.allow_at(t0 + secs(65)));
    }

    #[test]
    fn open_failure_only_touches_last_failure() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        let t0 = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }
        cb.record_failure_at(t0 + secs(2));
        let state = cb.state();
        assert_eq!(state.failures, 5);
        assert_eq!(state.tripped_at, Some(t0));
        assert_eq!(state.last_failure, Some(t0 + secs(2)));
    }

    #[test]
    fn corrupt_file_reads_as_closed() {
        let dir = TempDir::new().unwrap();
        let cb = breaker(&dir);
        std::fs::write(cb.path(), "{not json").unwrap();
        assert_eq!(cb.state(), CircuitState::default());
        assert!(cb.allow());
    }

    #[test]
    fn state_file_is_shared_between_handles() {
        let dir = TempDir::new().unwrap();
        let a = breaker(&dir);
        let b = breaker(&dir);
        let t0 = Utc::now();
        for _ in 0..5 {
            a.record_failure_at(t0);
        }
        assert!(!b.allow_at(t0 + secs(1)));
        let json = std::fs::read_to_string(a.path()).unwrap();
        assert!(json.contains("\"state\": \"open\""));
        assert!(json.contains("\"tripped_at\""));
    }

    #[tokio::test]
    async fn call_classifies_errors() {
        let dir = TempDir::new().unwrap();
        let cb = CircuitBreaker::new(
            13400,
            dir.path().join("circuit.json"),
            BreakerConfig {
                failure_threshold: 2,
                ..BreakerConfig::default()
            },
        );

        let query_err: Result<()> = cb
            .call(async { Err(Error::Validation("bad column".into())) })
            .await;
        assert!(query_err.is_err());
        assert_eq!(cb.state().failures, 0);

        for _ in 0..2 {
            let _ = cb
                .call(async { Err::<(), _>(Error::Connection("connection refused".into())) })
                .await;
        }
        let err = cb.call(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { port: 13400, .. }));
        assert!(err.to_string().contains("failing fast"));
    }
}
