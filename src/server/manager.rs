use super::backend::{DoltBackend, ServerBackend};
use super::idle;
use super::state::{ServerState, StatePaths};
use crate::breaker::BreakerRegistry;
use crate::config::{ProjectConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::lock::{self, TryLock};
use crate::port;
use crate::process::{self, ProcessProbe, ServerSignature};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Interval between readiness and exit polls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Per-attempt TCP connect timeout for readiness and ping.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Extra wait on the start lock beyond the holder's own startup timeout.
const LOCK_WAIT_SLACK: Duration = Duration::from_secs(5);
/// How long to wait for a SIGKILLed server to disappear.
const KILL_WAIT: Duration = Duration::from_secs(2);

enum PortChoice {
    Launch(u16),
    /// Our own server is already listening there with no PID file.
    Adopt { pid: u32, port: u16 },
}

/// Lifecycle of the dolt server for one project root.
///
/// Every method re-reads the state files; two managers for the same root in
/// different processes cooperate through them and the start lock.
pub struct ServerManager {
    root: PathBuf,
    config: ServerConfig,
    paths: StatePaths,
    probe: Arc<dyn ProcessProbe>,
    backend: Arc<dyn ServerBackend>,
    breakers: Option<Arc<BreakerRegistry>>,
    idle_monitor: bool,
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("idle_monitor", &self.idle_monitor)
            .finish_non_exhaustive()
    }
}

impl ServerManager {
    pub fn new(root: impl Into<PathBuf>, config: ServerConfig) -> Self {
        let root = root.into();
        let backend = Arc::new(DoltBackend::new(config.binary()));
        Self {
            paths: StatePaths::new(&root),
            root,
            config,
            probe: process::default_probe(),
            backend,
            breakers: None,
            idle_monitor: true,
        }
    }

    /// Manager configured from `<root>/.beads/config.yaml`.
    pub fn from_project(root: &Path) -> Result<Self> {
        let config = ProjectConfig::load(root)?;
        let breakers = Arc::new(BreakerRegistry::new(
            config.circuit_breaker.to_breaker_config(),
        ));
        Ok(Self::new(root, config.server).with_breakers(breakers))
    }

    pub fn with_backend(mut self, backend: Arc<dyn ServerBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Do not launch the idle monitor sidecar after a start.
    pub fn without_idle_monitor(mut self) -> Self {
        self.idle_monitor = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn probe(&self) -> &dyn ProcessProbe {
        self.probe.as_ref()
    }

    pub fn breakers(&self) -> Option<&Arc<BreakerRegistry>> {
        self.breakers.as_ref()
    }

    /// Address clients dial; wildcard listen addresses map to loopback.
    pub fn client_host(&self) -> &str {
        connect_host(self.config.host())
    }

    fn signature(&self) -> ServerSignature {
        self.backend.signature()
    }

    /// Port used when no port file exists: explicit, else derived from the root.
    pub fn configured_port(&self) -> u16 {
        self.config
            .explicit_port()
            .unwrap_or_else(|| port::derive_port(&self.root))
    }

    /// Current state, repairing stale PID/port files on the way.
    pub fn is_running(&self) -> Result<ServerState> {
        let data_dir = self.paths.data_dir.clone();
        let Some(pid) = self.paths.read_pid() else {
            return Ok(ServerState::not_running(data_dir));
        };

        if !self.probe.is_server_process(pid, &self.signature()) {
            debug!(
                "PID file for {:?} names {} which is not a live server, removing",
                self.root, pid
            );
            self.paths.clear_stale()?;
            return Ok(ServerState::not_running(data_dir));
        }

        let port = self
            .paths
            .read_port()
            .unwrap_or_else(|| self.configured_port());
        Ok(ServerState {
            running: true,
            pid: Some(pid),
            port: Some(port),
            data_dir,
        })
    }

    /// Return the port of a usable server, starting one if needed.
    ///
    /// With an explicit port configured this never starts or substitutes a
    /// server: the port is reachable or the call fails.
    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn ensure_running(&self) -> Result<u16> {
        let state = self.is_running()?;
        if let (true, Some(port)) = (state.running, state.port) {
            self.paths.touch_activity()?;
            return Ok(port);
        }

        if let Some(port) = self.config.explicit_port() {
            return match self.ping(port).await {
                Ok(()) => {
                    self.paths.touch_activity()?;
                    Ok(port)
                }
                Err(e @ Error::CircuitOpen { .. }) => Err(e),
                Err(e) => {
                    debug!("Explicit port {} unreachable: {}", port, e);
                    Err(Error::GuardViolation {
                        host: self.config.host().to_string(),
                        port,
                    })
                }
            };
        }

        let state = self.start().await?;
        state
            .port
            .ok_or_else(|| Error::Process("server started without a port".to_string()))
    }

    /// Start the server unless one is already running for this root.
    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn start(&self) -> Result<ServerState> {
        let state = self.is_running()?;
        if state.running {
            debug!("Server already running (PID {:?})", state.pid);
            return Ok(state);
        }

        std::fs::create_dir_all(&self.paths.beads_dir)?;
        let _guard = match lock::try_acquire(&self.paths.lock)? {
            TryLock::Acquired(guard) => guard,
            TryLock::Contended => {
                info!("Another process is starting the dolt server, waiting");
                let wait = self.config.startup_timeout() + LOCK_WAIT_SLACK;
                lock::acquire(&self.paths.lock, wait).await?
            }
        };

        // Someone may have finished a start between our first check and the lock
        let state = self.is_running()?;
        if state.running {
            debug!("Server started by another process (PID {:?})", state.pid);
            return Ok(state);
        }

        std::fs::create_dir_all(&self.paths.data_dir)?;
        self.backend
            .prepare(&self.paths.data_dir, self.config.database())
            .await?;

        let port = match self.choose_port()? {
            PortChoice::Adopt { pid, port } => {
                info!("Adopting running server PID {} on port {}", pid, port);
                self.paths.write_server(pid, port)?;
                self.paths.touch_activity()?;
                self.launch_idle_monitor().await;
                return Ok(ServerState {
                    running: true,
                    pid: Some(pid),
                    port: Some(port),
                    data_dir: self.paths.data_dir.clone(),
                });
            }
            PortChoice::Launch(port) => port,
        };

        self.kill_orphans().await;
        let pid = self.spawn_server(port)?;
        self.paths.write_server(pid, port)?;

        if let Err(e) = self.wait_ready(pid, port).await {
            warn!("Dolt server PID {} did not become ready: {}", pid, e);
            if let Err(kill_err) = process::force_kill(pid, "dolt server") {
                debug!("Force kill after failed start: {}", kill_err);
            }
            process::wait_for_exit(self.probe.as_ref(), pid, KILL_WAIT, POLL_INTERVAL).await;
            self.paths.clear_all()?;
            return Err(e);
        }

        info!("Dolt server started (PID {}, port {})", pid, port);
        self.paths.touch_activity()?;
        self.launch_idle_monitor().await;

        Ok(ServerState {
            running: true,
            pid: Some(pid),
            port: Some(port),
            data_dir: self.paths.data_dir.clone(),
        })
    }

    /// Gracefully stop the server, escalating to SIGKILL after the stop timeout.
    ///
    /// State files are removed and the idle monitor stopped whichever way the
    /// server goes down.
    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn stop(&self) -> Result<()> {
        let state = self.is_running()?;
        let Some(pid) = state.pid.filter(|_| state.running) else {
            return Err(Error::ServerNotRunning(self.root.clone()));
        };

        let result = self.terminate_server(pid).await;

        self.paths.clear_all()?;
        idle::stop_idle_monitor(&self.paths, self.probe.as_ref());
        if result.is_ok() {
            info!("Dolt server stopped (PID {})", pid);
        }
        result
    }

    async fn terminate_server(&self, pid: u32) -> Result<()> {
        process::terminate(pid, "dolt server")?;
        let timeout = self.config.stop_timeout();
        if process::wait_for_exit(self.probe.as_ref(), pid, timeout, POLL_INTERVAL).await {
            return Ok(());
        }

        warn!(
            "Dolt server PID {} did not exit after SIGTERM ({:?}), sending SIGKILL",
            pid, timeout
        );
        process::force_kill(pid, "dolt server")?;
        if !process::wait_for_exit(self.probe.as_ref(), pid, KILL_WAIT, POLL_INTERVAL).await {
            return Err(Error::Process(format!(
                "dolt server PID {} survived SIGKILL",
                pid
            )));
        }
        Ok(())
    }

    /// TCP reachability of the server on `port`, gated by its circuit breaker.
    pub async fn ping(&self, port: u16) -> Result<()> {
        let host = connect_host(self.config.host()).to_string();
        let attempt = tcp_connect(host, port);
        match &self.breakers {
            Some(registry) => registry.for_port(port).call(attempt).await,
            None => attempt.await,
        }
    }

    /// PID of our own server listening on `port`, if that is what holds it.
    fn our_server_on(&self, port: u16) -> Option<u32> {
        let pid = self.probe.find_pid_on_port(port)?;
        (self.probe.is_server_process(pid, &self.signature())
            && self.probe.is_process_in_dir(pid, &self.paths.data_dir))
        .then_some(pid)
    }

    fn choose_port(&self) -> Result<PortChoice> {
        let host = self.config.host();

        if let Some(explicit) = self.config.explicit_port() {
            if port::is_port_bindable(host, explicit) {
                return Ok(PortChoice::Launch(explicit));
            }
            if let Some(pid) = self.our_server_on(explicit) {
                return Ok(PortChoice::Adopt { pid, port: explicit });
            }
            return Err(Error::PortConflict {
                port: explicit,
                pid: self.probe.find_pid_on_port(explicit),
            });
        }

        let derived = port::derive_port(&self.root);
        if !port::is_port_bindable(host, derived) {
            if let Some(pid) = self.our_server_on(derived) {
                return Ok(PortChoice::Adopt { pid, port: derived });
            }
        }
        Ok(PortChoice::Launch(port::find_available_port(host, derived)))
    }

    /// Terminate servers left running in our data dir without a PID file.
    async fn kill_orphans(&self) {
        let orphans: Vec<u32> = self
            .probe
            .list_server_pids(&self.signature())
            .into_iter()
            .filter(|pid| self.probe.is_process_in_dir(*pid, &self.paths.data_dir))
            .collect();

        for pid in orphans {
            warn!("Stopping orphaned dolt server PID {} in {:?}", pid, self.paths.data_dir);
            if let Err(e) = self.terminate_server(pid).await {
                warn!("Failed to stop orphaned server PID {}: {}", pid, e);
            }
        }
    }

    fn spawn_server(&self, port: u16) -> Result<u32> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.server_log)?;
        let log_err = log.try_clone()?;

        let mut cmd = self
            .backend
            .command(self.config.host(), port, &self.paths.data_dir)?;
        cmd.current_dir(&self.paths.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            Error::Process(format!(
                "Failed to launch dolt server in {}: {}",
                self.paths.data_dir.display(),
                e
            ))
        })?;
        child
            .id()
            .ok_or_else(|| Error::Process("dolt server exited immediately".to_string()))
    }

    async fn wait_ready(&self, pid: u32, port: u16) -> Result<()> {
        let timeout = self.config.startup_timeout();
        let host = connect_host(self.config.host()).to_string();
        let deadline = tokio::time::Instant::now() + timeout;

        while tokio::time::Instant::now() < deadline {
            if !self.probe.is_process_alive(pid) {
                return Err(Error::Process(format!(
                    "dolt server exited during startup, see {}",
                    self.paths.server_log.display()
                )));
            }
            if tcp_connect(host.clone(), port).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(Error::Timeout {
            what: format!("dolt server on port {}", port),
            timeout,
        })
    }

    async fn launch_idle_monitor(&self) {
        if !self.idle_monitor {
            return;
        }
        let launched = idle::spawn_idle_monitor(
            &self.root,
            &self.paths,
            self.probe.as_ref(),
            self.config.idle_timeout(),
            self.config.monitor_binary(),
        )
        .await;
        if let Err(e) = launched {
            warn!("Failed to launch idle monitor: {}", e);
        }
    }
}

/// Wildcard listen addresses are reached through loopback.
fn connect_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

async fn tcp_connect(host: String, port: u16) -> Result<()> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(Error::Connection(format!("{}:{}: {}", host, port, e))),
        Err(_) => Err(Error::Timeout {
            what: format!("connection to {}:{}", host, port),
            timeout: CONNECT_TIMEOUT,
        }),
    }
}
