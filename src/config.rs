//! Configuration for the sweep engine and the CLI.
//!
//! [`PingerConfig`] carries what the engine itself needs: the pinger binary
//! locations and a writable temp directory. [`AppConfig`] is the YAML file
//! format consumed by the binary, adding the target batch and request
//! knobs.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default location of the IPv4 pinger binary.
pub const DEFAULT_FPING: &str = "/usr/sbin/fping";

/// Default location of the IPv6 pinger binary.
pub const DEFAULT_FPING6: &str = "/usr/sbin/fping6";

/// Default staging directory for target files.
pub const DEFAULT_TMPDIR: &str = "/tmp";

/// Default echo requests per target host.
pub const DEFAULT_REQUESTS: u32 = 3;

fn default_requests() -> u32 {
    DEFAULT_REQUESTS
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Locations the engine needs to run sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingerConfig {
    /// IPv4 pinger binary.
    pub fping: PathBuf,

    /// IPv6 pinger binary.
    pub fping6: PathBuf,

    /// Writable directory for per-sweep target files.
    pub tmpdir: PathBuf,
}

impl Default for PingerConfig {
    fn default() -> Self {
        Self {
            fping: PathBuf::from(DEFAULT_FPING),
            fping6: PathBuf::from(DEFAULT_FPING6),
            tmpdir: PathBuf::from(DEFAULT_TMPDIR),
        }
    }
}

impl PingerConfig {
    /// Set the IPv4 binary location.
    pub fn with_fping(mut self, path: impl Into<PathBuf>) -> Self {
        self.fping = path.into();
        self
    }

    /// Set the IPv6 binary location.
    pub fn with_fping6(mut self, path: impl Into<PathBuf>) -> Self {
        self.fping6 = path.into();
        self
    }

    /// Set the staging directory.
    pub fn with_tmpdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmpdir = path.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fping.as_os_str().is_empty() || self.fping6.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "pinger binary paths must not be empty".to_string(),
            ));
        }
        if self.tmpdir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "tmpdir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level application configuration for the CLI binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine configuration.
    #[serde(default)]
    pub pinger: PingerConfig,

    /// Target addresses, probed in order.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Echo requests per target (default: 3).
    #[serde(default = "default_requests")]
    pub requests: u32,

    /// Interval between packets to one target (default: pinger decides).
    #[serde(default, with = "humantime_serde")]
    pub period: Option<Duration>,

    /// Payload size in bytes (default: pinger decides).
    #[serde(default)]
    pub size: Option<u32>,

    /// Per-target initial timeout (default: pinger decides).
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Treat redirected responses as the target being up.
    #[serde(default)]
    pub allow_redirect: bool,

    /// Explicit source address for outgoing packets.
    #[serde(default)]
    pub source_ip: Option<IpAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pinger: PingerConfig::default(),
            targets: Vec::new(),
            requests: DEFAULT_REQUESTS,
            period: None,
            size: None,
            timeout: None,
            allow_redirect: false,
            source_ip: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pinger.validate()?;

        if self.requests == 0 {
            return Err(ConfigError::ValidationError(
                "requests must be positive".to_string(),
            ));
        }

        for target in &self.targets {
            target.parse::<IpAddr>().map_err(|_| {
                ConfigError::ValidationError(format!("invalid target address: '{target}'"))
            })?;
        }

        Ok(())
    }
}
