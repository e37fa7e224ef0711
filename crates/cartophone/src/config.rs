//! Service configuration.
//!
//! Read from a JSON file, then overridden from the environment. A missing
//! file is not an error; every key has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scanner::{Modulation, ScanConfig};
use crate::service::ServiceSettings;
use crate::transport::ServerConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub max_attempts: u32,
    pub period_ms: u64,
    pub retry_delay_ms: u64,
    pub modulation: Modulation,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            period_ms: 300,
            retry_delay_ms: 1000,
            modulation: Modulation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "devicePath")]
    pub device_path: String,
    pub pocket_base_url: String,
    pub owntone_base_url: String,
    pub host: String,
    pub port: u16,
    pub handshake_timeout_secs: u64,
    pub alarm_interval_secs: u64,
    pub scan: ScanSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: "/dev/ttyUSB0".to_string(),
            pocket_base_url: "http://127.0.0.1:8090".to_string(),
            owntone_base_url: "http://127.0.0.1:3689".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            handshake_timeout_secs: 10,
            alarm_interval_secs: 60,
            scan: ScanSettings::default(),
        }
    }
}

impl Config {
    /// File, then process environment, then validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides; `lookup` is `std::env::var` outside of tests.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CARTOPHONE_DEVICE") {
            self.device_path = v;
        }
        if let Some(v) = lookup("POCKETBASE_URL") {
            self.pocket_base_url = v;
        }
        if let Some(v) = lookup("OWNTONE_URL") {
            self.owntone_base_url = v;
        }
        if let Some(v) = lookup("CARTOPHONE_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("CARTOPHONE_PORT") {
            self.port = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("CARTOPHONE_PORT={v:?} is not a port"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, url) in [
            ("pocket_base_url", &self.pocket_base_url),
            ("owntone_base_url", &self.owntone_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.device_path.is_empty() {
            return Err(ConfigError::Invalid("devicePath is empty".to_string()));
        }
        for (key, value) in [
            ("handshake_timeout_secs", self.handshake_timeout_secs),
            ("alarm_interval_secs", self.alarm_interval_secs),
            ("scan.period_ms", self.scan.period_ms),
            ("scan.retry_delay_ms", self.scan.retry_delay_ms),
            ("scan.max_attempts", u64::from(self.scan.max_attempts)),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be > 0")));
            }
        }
        Ok(())
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            modulations: vec![self.scan.modulation],
            max_attempts: self.scan.max_attempts,
            period: Duration::from_millis(self.scan.period_ms),
            retry_delay: Duration::from_millis(self.scan.retry_delay_ms),
            ..ScanConfig::default()
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            scan: self.scan_config(),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            alarm_interval: Duration::from_secs(self.alarm_interval_secs),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }
}
