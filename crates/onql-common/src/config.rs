//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging primitives for the ONQL SDK."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Subject namespace every ONQL module lives under.
pub const DEFAULT_NAMESPACE: &str = "onql";

/// Bus endpoint used when neither configuration nor environment name one.
pub const DEFAULT_BUS_URL: &str = "nats://host.docker.internal:4222";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_bus_url() -> String {
    DEFAULT_BUS_URL.to_owned()
}

// Matches the request timeout of the upstream NATS clients.
fn default_request_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for SDK consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`SdkConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedSdkConfig {
    pub config: SdkConfig,
    /// `None` when no file was found and defaults were used.
    pub source: Option<PathBuf>,
}

impl SdkConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ONQL_CONFIG";
    pub const ENV_BUS_URL: &'static str = "ONQL_BUS_URL";

    /// Load configuration, respecting the `ONQL_CONFIG` and `ONQL_BUS_URL` overrides.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Resolution order: `ONQL_CONFIG`, then the first candidate that exists,
    /// then built-in defaults. `ONQL_BUS_URL` is applied last in every case.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedSdkConfig> {
        let mut loaded = Self::resolve(candidates)?;
        loaded.config.apply_env_overrides();
        loaded.config.validate()?;
        Ok(loaded)
    }

    /// Load an explicitly named file, skipping candidate resolution.
    /// `ONQL_BUS_URL` still applies.
    pub fn load_file(path: &Path) -> Result<LoadedSdkConfig> {
        let mut config = Self::from_path(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(LoadedSdkConfig {
            config,
            source: Some(path.to_path_buf()),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(Self::ENV_BUS_URL) {
            if !url.trim().is_empty() {
                debug!(bus_url = %url, "bus url overridden from environment");
                self.bus.url = url.trim().to_owned();
            }
        }
    }

    fn resolve<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedSdkConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedSdkConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedSdkConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found, using defaults");
        Ok(LoadedSdkConfig {
            config: Self::default(),
            source: None,
        })
    }

    /// Parse a TOML file without applying environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<SdkConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        let namespace = self.namespace.trim();
        if namespace.is_empty() {
            return Err(anyhow!("namespace must not be empty"));
        }
        if namespace.chars().any(char::is_whitespace) || namespace.ends_with('.') {
            return Err(anyhow!(
                "namespace '{}' must be a single dot-separated subject without trailing '.'",
                self.namespace
            ));
        }
        self.bus.validate()
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for SdkConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: SdkConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for the external message bus.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_url")]
    pub url: String,
    /// Client name reported to the bus server.
    #[serde(default)]
    pub connection_name: Option<String>,
    #[serde(default = "default_request_timeout", rename = "request_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            connection_name: None,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("bus url must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("bus request_timeout_ms must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("bus connect_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Directory for the rolling JSON log file. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: None,
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_docker_host_bus() {
        let config = SdkConfig::default();
        assert_eq!(config.namespace, "onql");
        assert_eq!(config.bus.url, DEFAULT_BUS_URL);
        assert_eq!(config.bus.request_timeout, Duration::from_secs(2));
        assert!(config.logging.directory.is_none());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn parses_partial_toml() {
        let config: SdkConfig = r#"
            namespace = "acme"

            [bus]
            url = "nats://127.0.0.1:4222"
            request_timeout_ms = 250

            [logging]
            format = "structured-json"
        "#
        .parse()
        .expect("parse config");

        assert_eq!(config.namespace, "acme");
        assert_eq!(config.bus.url, "nats://127.0.0.1:4222");
        assert_eq!(config.bus.request_timeout, Duration::from_millis(250));
        assert_eq!(config.bus.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!("namespace = \"\"".parse::<SdkConfig>().is_err());
        assert!("namespace = \"on ql\"".parse::<SdkConfig>().is_err());
        assert!("[bus]\nurl = \"\"".parse::<SdkConfig>().is_err());
        assert!("[bus]\nrequest_timeout_ms = 0".parse::<SdkConfig>().is_err());
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("onql.toml");
        std::fs::write(&path, "[bus]\nconnection_name = \"billing\"\n").expect("write config");

        let config = SdkConfig::from_path(&path).expect("load config");
        assert_eq!(config.bus.connection_name.as_deref(), Some("billing"));
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn from_path_reports_missing_file() {
        let err = SdkConfig::from_path(Path::new("/definitely/missing/onql.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("unable to read config file"));
    }
}
