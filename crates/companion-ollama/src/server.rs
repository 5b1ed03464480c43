//! Lifecycle manager for the Ollama backend process.
//!
//! The manager prefers a backend that is already listening. Only when the
//! status probe fails does it launch `ollama serve` itself, and only a backend
//! it launched is ever terminated.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::client::OllamaClient;
use crate::config::ServiceConfig;
use crate::error::OllamaError;
use crate::paths;

/// Upper bound on captured backend stderr.
const STDERR_CAPTURE_LIMIT: usize = 16 * 1024;

/// Lifecycle state of the inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Stopped,
    Probing,
    Starting,
    /// A backend we discovered. Never terminated by us.
    RunningExternal,
    /// A backend we launched.
    RunningOwned,
    Stopping,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::RunningExternal | ServiceState::RunningOwned)
    }
}

/// Error details recorded in the status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&OllamaError> for ErrorInfo {
    fn from(err: &OllamaError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Snapshot of the backend as seen by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub is_running: bool,
    /// Set once a pre-existing backend is detected.
    pub is_external: bool,
    pub active_model: String,
    pub last_error: Option<ErrorInfo>,
}

impl ServiceStatus {
    fn new() -> Self {
        Self {
            state: ServiceState::Stopped,
            is_running: false,
            is_external: false,
            active_model: String::new(),
            last_error: None,
        }
    }
}

/// Read-only view of the manager's status, cheap to clone across tasks.
#[derive(Clone)]
pub struct StatusHandle(Arc<RwLock<ServiceStatus>>);

impl StatusHandle {
    pub fn snapshot(&self) -> ServiceStatus {
        self.0.read().clone()
    }
}

/// Manager for the inference backend.
pub struct InferenceServiceManager {
    config: ServiceConfig,
    client: OllamaClient,
    status: Arc<RwLock<ServiceStatus>>,
    process: Option<OwnedProcess>,
}

enum LaunchError {
    AddressInUse(String),
    Fatal(OllamaError),
}

impl InferenceServiceManager {
    /// Create a new manager. Nothing is probed or launched until [`start`](Self::start).
    pub fn new(config: ServiceConfig) -> Self {
        let client = OllamaClient::with_url(config.base_url());
        Self {
            config,
            client,
            status: Arc::new(RwLock::new(ServiceStatus::new())),
            process: None,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current status snapshot.
    pub fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    /// Shareable handle for reading status from other tasks.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle(self.status.clone())
    }

    /// Record the model the application settled on.
    pub fn set_active_model(&self, model: impl Into<String>) {
        self.status.write().active_model = model.into();
    }

    /// Get a client connected to the managed backend.
    pub fn client(&self) -> OllamaClient {
        self.client.clone()
    }

    /// Resolve the ollama binary, if one can be found.
    pub fn binary_path(&self) -> Option<PathBuf> {
        paths::locate_ollama(self.config.binary_path.as_deref())
    }

    /// PID of a backend launched by this manager.
    pub fn owned_pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    /// Ensure a backend is reachable.
    ///
    /// Returns once the backend is running or a definitive failure is reached.
    /// Failures are recorded in `last_error` and leave the manager stopped.
    /// An owned backend that has exited since the last call is relaunched.
    pub async fn start(&mut self) -> Result<ServiceStatus, OllamaError> {
        let state = self.status.read().state;
        if state == ServiceState::RunningOwned && !self.is_process_alive() {
            warn!("Owned inference service exited, starting it again");
        } else if state.is_running() {
            debug!("Inference service already running");
            return Ok(self.status());
        }

        self.set_state(ServiceState::Probing);

        if self.probe().await {
            info!("Found running inference service at {}", self.client.base_url());
            let mut status = self.status.write();
            status.state = ServiceState::RunningExternal;
            status.is_running = true;
            status.is_external = true;
            status.last_error = None;
            return Ok(status.clone());
        }

        self.set_state(ServiceState::Starting);

        match self.launch().await {
            Ok(process) => {
                info!("Inference service started (PID: {:?})", process.child.id());
                self.process = Some(process);
                let mut status = self.status.write();
                status.state = ServiceState::RunningOwned;
                status.is_running = true;
                status.is_external = false;
                status.last_error = None;
                Ok(status.clone())
            }
            Err(e) => {
                warn!("Inference service failed to start: {}", e);
                let mut status = self.status.write();
                status.state = ServiceState::Stopped;
                status.is_running = false;
                status.last_error = Some(ErrorInfo::from(&e));
                Err(e)
            }
        }
    }

    /// Release the backend.
    ///
    /// A discovered backend is left untouched; a launched one is terminated.
    pub async fn stop(&mut self) -> Result<(), OllamaError> {
        let state = self.status.read().state;

        match state {
            ServiceState::RunningExternal => {
                info!("Leaving external inference service running");
                let mut status = self.status.write();
                status.state = ServiceState::Stopped;
                status.is_running = false;
            }
            ServiceState::RunningOwned => {
                self.set_state(ServiceState::Stopping);
                if let Some(process) = self.process.take() {
                    process.terminate(self.config.shutdown_grace).await;
                }
                let mut status = self.status.write();
                status.state = ServiceState::Stopped;
                status.is_running = false;
            }
            _ => debug!("Inference service not running, nothing to stop"),
        }

        Ok(())
    }

    /// Check whether a launched backend is still alive.
    ///
    /// A backend found dead is forgotten and the manager drops to `Stopped`.
    pub fn is_process_alive(&mut self) -> bool {
        match self.process.as_mut().map(|p| p.child.try_wait()) {
            Some(Ok(None)) => true,
            Some(exit) => {
                debug!("Owned inference service is gone: {:?}", exit);
                self.process = None;
                let mut status = self.status.write();
                if status.state == ServiceState::RunningOwned {
                    status.state = ServiceState::Stopped;
                    status.is_running = false;
                }
                false
            }
            None => false,
        }
    }

    async fn probe(&self) -> bool {
        match self.client.check_health(self.config.probe_timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("No inference service at {}: {}", self.client.base_url(), e);
                false
            }
        }
    }

    async fn launch(&self) -> Result<OwnedProcess, OllamaError> {
        let binary = self.binary_path().ok_or_else(|| {
            let searched = match &self.config.binary_path {
                Some(path) => path.display().to_string(),
                None => format!(
                    "{} or {} on PATH",
                    paths::bundled_ollama_path().display(),
                    paths::ollama_binary_name()
                ),
            };
            OllamaError::BinaryNotFound(searched)
        })?;

        match self.spawn_and_wait(&binary).await {
            Ok(process) => Ok(process),
            Err(LaunchError::AddressInUse(output)) => {
                warn!(
                    "Port {} already in use, cleaning up stale processes and retrying once",
                    self.config.port
                );
                debug!("ollama serve output: {}", output.trim());
                cleanup_stale_processes(&binary).await;
                sleep(self.config.poll_interval).await;

                match self.spawn_and_wait(&binary).await {
                    Ok(process) => Ok(process),
                    Err(LaunchError::AddressInUse(output)) => Err(OllamaError::ServiceStartFailed(
                        format!("address still in use after cleanup: {}", output.trim()),
                    )),
                    Err(LaunchError::Fatal(e)) => Err(e),
                }
            }
            Err(LaunchError::Fatal(e)) => Err(e),
        }
    }

    /// Launch `ollama serve` and poll until it answers or gives up.
    async fn spawn_and_wait(&self, binary: &Path) -> Result<OwnedProcess, LaunchError> {
        info!(
            "Starting {} serve on {}",
            binary.display(),
            self.config.bind_address()
        );

        let mut process = OwnedProcess::spawn(binary, &self.config.bind_address())
            .map_err(LaunchError::Fatal)?;

        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let probe_timeout = self
                .config
                .probe_timeout
                .min(remaining)
                .max(Duration::from_millis(50));
            if self.client.check_health(probe_timeout).await.is_ok() {
                return Ok(process);
            }

            match process.child.try_wait() {
                Ok(Some(exit)) => {
                    let output = process.stderr_output().await;
                    if is_address_in_use(&output) {
                        return Err(LaunchError::AddressInUse(output));
                    }
                    return Err(LaunchError::Fatal(OllamaError::ServiceStartFailed(format!(
                        "ollama serve exited with {}: {}",
                        exit,
                        output.trim()
                    ))));
                }
                Ok(None) => {}
                Err(e) => {
                    process.terminate(self.config.shutdown_grace).await;
                    return Err(LaunchError::Fatal(OllamaError::Io(e)));
                }
            }

            if Instant::now() >= deadline {
                warn!("Inference service not ready after {:?}", self.config.startup_timeout);
                process.terminate(self.config.shutdown_grace).await;
                return Err(LaunchError::Fatal(OllamaError::ServiceStartTimeout));
            }

            debug!("Inference service not ready yet, PID: {:?}", process.child.id());
            sleep(self.config.poll_interval).await;
        }
    }

    fn set_state(&self, state: ServiceState) {
        self.status.write().state = state;
    }
}

impl Drop for InferenceServiceManager {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            warn!("Manager dropped with a running inference service, killing it");
            let _ = process.child.start_kill();
        }
    }
}

/// A backend process launched by the manager.
struct OwnedProcess {
    child: Child,
    stderr: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl OwnedProcess {
    fn spawn(binary: &Path, bind_address: &str) -> Result<Self, OllamaError> {
        let mut child = Command::new(binary)
            .arg("serve")
            .env("OLLAMA_HOST", bind_address)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OllamaError::ServiceStartFailed(format!("could not spawn {}: {}", binary.display(), e))
            })?;

        debug!("ollama serve process started with PID: {:?}", child.id());

        let stderr = Arc::new(Mutex::new(String::new()));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(forward_stderr(pipe, stderr.clone())));

        Ok(Self {
            child,
            stderr,
            stderr_task,
        })
    }

    /// Captured stderr, waiting briefly for the pipe to drain after exit.
    async fn stderr_output(&mut self) -> String {
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
        self.stderr.lock().clone()
    }

    /// SIGTERM, then SIGKILL once the grace period runs out.
    async fn terminate(mut self, grace: Duration) {
        info!("Stopping inference service (PID: {:?})", self.child.id());

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
        }

        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Inference service exited with status: {}", status),
            Ok(Err(e)) => {
                warn!("Error waiting for inference service: {}", e);
                let _ = self.child.kill().await;
            }
            Err(_) => {
                warn!("Inference service didn't exit gracefully, killing...");
                let _ = self.child.kill().await;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

async fn forward_stderr(pipe: ChildStderr, sink: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("ollama: {}", line);
        let mut captured = sink.lock();
        captured.push_str(&line);
        captured.push('\n');
        if captured.len() > STDERR_CAPTURE_LIMIT {
            let excess = captured.len() - STDERR_CAPTURE_LIMIT;
            let cut = (excess..=captured.len())
                .find(|i| captured.is_char_boundary(*i))
                .unwrap_or(captured.len());
            captured.drain(..cut);
        }
    }
}

fn is_address_in_use(output: &str) -> bool {
    let output = output.to_lowercase();
    output.contains("address already in use")
        || output.contains("only one usage of each socket address")
}

/// Best-effort removal of stale backends holding the port.
async fn cleanup_stale_processes(binary: &Path) {
    let Some(name) = binary.file_name().and_then(|n| n.to_str()) else {
        return;
    };

    let mut command = if cfg!(target_os = "windows") {
        let mut c = Command::new("taskkill");
        c.args(["/F", "/IM", name]);
        c
    } else {
        let mut c = Command::new("pkill");
        c.args(["-x", name]);
        c
    };

    match command
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => debug!("Stale process cleanup for {} exited with {}", name, status),
        Err(e) => warn!("Stale process cleanup for {} failed: {}", name, e),
    }
}
