use http::Uri;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no backends configured")]
    NoBackends,
    #[error("invalid backend address {url:?}: {reason}")]
    InvalidBackend { url: String, reason: String },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub health_check: HealthCheckConfig,
    pub backends: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub forward_timeout_seconds: Option<u64>,
    pub drain_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub check_interval_seconds: u64,
    pub check_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            health_check: HealthCheckConfig::default(),
            backends: vec![
                "http://localhost:8081".to_string(),
                "http://localhost:8082".to_string(),
                "http://localhost:8083".to_string(),
            ],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            forward_timeout_seconds: None,
            drain_timeout_seconds: 30,
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            check_timeout_seconds: 2,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check.check_interval_seconds == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "health_check.check_interval_seconds",
            });
        }
        if self.health_check.check_timeout_seconds == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "health_check.check_timeout_seconds",
            });
        }
        if self.server.forward_timeout_seconds == Some(0) {
            return Err(ConfigError::ZeroDuration {
                field: "server.forward_timeout_seconds",
            });
        }
        self.backend_targets().map(|_| ())
    }

    /// Parses every backend address. One bad entry fails the whole list.
    pub fn backend_targets(&self) -> Result<Vec<Uri>, ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        self.backends.iter().map(|url| parse_backend(url)).collect()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check.check_interval_seconds)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check.check_timeout_seconds)
    }

    pub fn forward_timeout(&self) -> Option<Duration> {
        self.server.forward_timeout_seconds.map(Duration::from_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.server.drain_timeout_seconds)
    }
}

fn parse_backend(url: &str) -> Result<Uri, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBackend {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme {:?}", other))),
        None => return Err(invalid("missing scheme")),
    }
    match uri.host() {
        Some(host) if !host.is_empty() => Ok(uri),
        _ => Err(invalid("missing host")),
    }
}
