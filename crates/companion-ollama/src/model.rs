//! Model provisioning through the ollama command line.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::OllamaError;
use crate::manifest::Manifest;
use crate::server::InferenceServiceManager;

/// Number of trailing stderr lines kept for error messages.
const ERROR_TAIL_LINES: usize = 8;

/// Where a missing model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// `ollama pull <name>` from the remote registry.
    Registry,
    /// `ollama create <name> -f <manifest>` from a local artifact.
    Local { manifest: PathBuf },
}

/// One progress line emitted by a running install.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallProgress {
    pub model: String,
    pub line: String,
    pub percent: Option<f32>,
}

/// Ensures named models exist on the backend.
pub struct ModelProvisioner {
    binary: PathBuf,
    bind_address: String,
}

impl ModelProvisioner {
    /// Create a provisioner driving the given ollama binary.
    pub fn new(binary: impl Into<PathBuf>, bind_address: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            bind_address: bind_address.into(),
        }
    }

    /// Create a provisioner for the backend a manager is responsible for.
    pub fn from_manager(manager: &InferenceServiceManager) -> Result<Self, OllamaError> {
        let binary = manager.binary_path().ok_or_else(|| {
            OllamaError::BinaryNotFound("no ollama binary available for provisioning".to_string())
        })?;
        Ok(Self::new(binary, manager.config().bind_address()))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Names of installed models, from `ollama list`.
    pub async fn list_installed(&self) -> Result<Vec<String>, OllamaError> {
        let output = self
            .command()
            .arg("list")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| OllamaError::ModelInstallFailed(format!("could not run ollama list: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OllamaError::ModelInstallFailed(format!(
                "ollama list exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_list_output(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Whether a model is installed. A bare name matches its `:latest` tag.
    pub async fn is_installed(&self, model: &str) -> Result<bool, OllamaError> {
        let installed = self.list_installed().await?;
        Ok(installed.iter().any(|name| model_matches(name, model)))
    }

    /// Install `model` unless it is already present.
    ///
    /// Returns `true` when an install ran. There is no client-side timeout:
    /// the call lasts as long as the install process does.
    pub async fn ensure_installed<F>(
        &self,
        model: &str,
        source: &InstallSource,
        on_progress: F,
    ) -> Result<bool, OllamaError>
    where
        F: FnMut(InstallProgress),
    {
        if self.is_installed(model).await? {
            info!("Model {} is already installed", model);
            return Ok(false);
        }

        info!("Model {} is not installed, installing...", model);
        match source {
            InstallSource::Registry => self.pull(model, on_progress).await?,
            InstallSource::Local { manifest } => self.create(model, manifest, on_progress).await?,
        }
        info!("Model {} installed", model);
        Ok(true)
    }

    /// `ollama pull <model>`.
    pub async fn pull<F>(&self, model: &str, on_progress: F) -> Result<(), OllamaError>
    where
        F: FnMut(InstallProgress),
    {
        let mut command = self.command();
        command.arg("pull").arg(model);
        self.run_install(model, command, on_progress).await
    }

    /// `ollama create <model> -f <manifest>`, after validating the manifest
    /// and the artifact it points at.
    pub async fn create<F>(&self, model: &str, manifest_path: &Path, on_progress: F) -> Result<(), OllamaError>
    where
        F: FnMut(InstallProgress),
    {
        let manifest = Manifest::load(manifest_path)?;
        let manifest_dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(artifact) = manifest.artifact_path(&manifest_dir) {
            if !artifact.is_file() {
                return Err(OllamaError::ArtifactNotFound(artifact.display().to_string()));
            }
            debug!("Building {} from {}", model, artifact.display());
        }

        let mut command = self.command();
        command
            .arg("create")
            .arg(model)
            .arg("-f")
            .arg(manifest_path)
            .current_dir(&manifest_dir);
        self.run_install(model, command, on_progress).await
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.env("OLLAMA_HOST", &self.bind_address);
        command
    }

    /// Run an install subcommand, forwarding its output as progress.
    async fn run_install<F>(&self, model: &str, mut command: Command, mut on_progress: F) -> Result<(), OllamaError>
    where
        F: FnMut(InstallProgress),
    {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OllamaError::ModelInstallFailed(format!("could not run {}: {}", self.binary.display(), e))
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<(bool, String)>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_segments(stdout, false, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_segments(stderr, true, tx.clone()));
        }
        drop(tx);

        let mut error_tail: Vec<String> = Vec::new();
        while let Some((is_stderr, line)) = rx.recv().await {
            debug!("install {}: {}", model, line);
            if is_stderr {
                error_tail.push(line.clone());
                if error_tail.len() > ERROR_TAIL_LINES {
                    error_tail.remove(0);
                }
            }
            on_progress(InstallProgress {
                model: model.to_string(),
                percent: parse_percent(&line),
                line,
            });
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            warn!("Install of {} failed with {}", model, status);
            Err(OllamaError::ModelInstallFailed(format!(
                "{} exited with {}: {}",
                model,
                status,
                error_tail.join(" | ")
            )))
        }
    }
}

/// Read a pipe and emit segments split on `\r` or `\n`, with terminal
/// escape sequences removed.
async fn read_segments<R>(mut reader: R, is_stderr: bool, tx: mpsc::UnboundedSender<(bool, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let segment: Vec<u8> = pending.drain(..=pos).collect();
            if let Some(line) = clean_segment(&segment) {
                if tx.send((is_stderr, line)).is_err() {
                    return;
                }
            }
        }
    }

    if let Some(line) = clean_segment(&pending) {
        let _ = tx.send((is_stderr, line));
    }
}

fn clean_segment(bytes: &[u8]) -> Option<String> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    let ansi = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").ok());

    let raw = String::from_utf8_lossy(bytes);
    let text = match ansi {
        Some(re) => re.replace_all(&raw, ""),
        None => Cow::Borrowed(raw.as_ref()),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Percentage from a progress line such as `pulling 8eeb52dfb3bb... 45% ▕██▏ 1.2 GB`.
pub fn parse_percent(line: &str) -> Option<f32> {
    static PERCENT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PERCENT
        .get_or_init(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").ok())
        .as_ref()?;

    re.captures(line)
        .and_then(|c| c[1].parse::<f32>().ok())
        .filter(|p| *p <= 100.0)
}

/// Model names from `ollama list` output: the header row is skipped and the
/// first column of every other row is the name.
pub fn parse_list_output(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || (!wanted.contains(':') && installed.strip_suffix(":latest") == Some(wanted))
}
