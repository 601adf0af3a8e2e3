use super::duration::duration_or;
use crate::breaker::BreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATABASE: &str = "beads";
pub const DEFAULT_BINARY: &str = "dolt";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Project configuration, read from `.beads/config.yaml`.
///
/// Every field is optional; accessors apply defaults so a missing file and an
/// empty file behave the same.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
}

/// Dolt sql-server settings.
///
/// # Example
///
/// ```yaml
/// server:
///   host: 127.0.0.1
///   port: 13400        # explicit port: disables auto-start and fallback
///   database: beads
///   idle_timeout: 30m  # "0" disables the idle monitor
///   monitor_binary: /usr/local/bin/bd
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Explicit port. When set, bd never derives, probes or substitutes a port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Server binary name or path (default: `dolt`, resolved via PATH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,

    /// `bd` executable that runs the idle monitor (default: this executable
    /// when it is `bd`, else `bd` on PATH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_binary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<String>,
}

impl ServerConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn explicit_port(&self) -> Option<u16> {
        self.port.filter(|p| *p != 0)
    }

    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or(DEFAULT_DATABASE)
    }

    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or(DEFAULT_BINARY)
    }

    pub fn monitor_binary(&self) -> Option<&str> {
        self.monitor_binary.as_deref().filter(|b| !b.is_empty())
    }

    pub fn idle_timeout(&self) -> Duration {
        duration_or(
            self.idle_timeout.as_deref(),
            DEFAULT_IDLE_TIMEOUT,
            "server.idle_timeout",
        )
    }

    pub fn startup_timeout(&self) -> Duration {
        duration_or(
            self.startup_timeout.as_deref(),
            DEFAULT_STARTUP_TIMEOUT,
            "server.startup_timeout",
        )
    }

    pub fn stop_timeout(&self) -> Duration {
        duration_or(
            self.stop_timeout.as_deref(),
            DEFAULT_STOP_TIMEOUT,
            "server.stop_timeout",
        )
    }
}

/// Circuit breaker tuning for connections to the dolt server.
///
/// ```yaml
/// circuit_breaker:
///   failure_threshold: 5
///   failure_window: 60s
///   cooldown: 5s
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_window: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        let defaults = BreakerConfig::default();
        BreakerConfig {
            failure_threshold: self
                .failure_threshold
                .filter(|t| *t > 0)
                .unwrap_or(defaults.failure_threshold),
            failure_window: duration_or(
                self.failure_window.as_deref(),
                defaults.failure_window,
                "circuit_breaker.failure_window",
            ),
            cooldown: duration_or(
                self.cooldown.as_deref(),
                defaults.cooldown,
                "circuit_breaker.cooldown",
            ),
            ..defaults
        }
    }
}
