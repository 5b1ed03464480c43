//! Inference service configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Configuration for the inference service manager.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Loopback host the backend listens on
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Explicit path to the ollama binary (otherwise bundled copy, then PATH)
    pub binary_path: Option<PathBuf>,
    /// Timeout for a single status probe
    pub probe_timeout: Duration,
    /// Interval between readiness probes while starting
    pub poll_interval: Duration,
    /// Overall bound on waiting for a launched backend
    pub startup_timeout: Duration,
    /// How long an owned backend gets to exit after SIGTERM
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            binary_path: None,
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("COMPANION_OLLAMA_BIN") {
            if !path.is_empty() {
                config.binary_path = Some(PathBuf::from(path));
            }
        }

        if let Some(port) = std::env::var("COMPANION_OLLAMA_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.port = port;
        }

        if let Some(secs) = std::env::var("COMPANION_STARTUP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.startup_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Base URL of the backend HTTP interface.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Value for `OLLAMA_HOST` when launching an owned backend.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Create a builder for configuration.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }
}

/// Builder for service configuration.
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.binary_path = Some(path.into());
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:11434");
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.startup_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = ServiceConfig::builder()
            .port(9000)
            .startup_timeout(Duration::from_millis(200))
            .build();
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.startup_timeout, Duration::from_millis(200));
    }
}
