//! Typed configuration from environment variables and TOML.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrets::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            relay: RelayConfig::from_env()?,
        })
    }
}

/// Settings recognized by the relay loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Transport endpoint address.
    pub host: String,
    /// Destination name on the downstream side.
    pub address: String,
    /// Maximum number of loaded-but-unsent records held in memory.
    pub buffer_capacity: usize,
    /// Delay before re-probing a store that reported no pending records.
    #[serde(rename = "recheck_delay_secs", deserialize_with = "duration_secs")]
    pub recheck_delay: Duration,
    /// Delay between failed connection attempts.
    #[serde(rename = "reconnect_delay_secs", deserialize_with = "duration_secs")]
    pub reconnect_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "localhost:5672".to_string(),
            address: "examples".to_string(),
            buffer_capacity: 50,
            recheck_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("RELAY_HOST") {
            config.host = host;
        }
        if let Ok(address) = std::env::var("RELAY_ADDRESS") {
            config.address = address;
        }
        if let Some(capacity) = parse_var::<usize>("RELAY_BUFFER_CAPACITY")? {
            config.buffer_capacity = capacity;
        }
        if let Some(secs) = parse_var::<f64>("RELAY_RECHECK_DELAY_SECS")? {
            config.recheck_delay = secs_to_duration(secs)
                .ok_or_else(|| Error::Config(format!("RELAY_RECHECK_DELAY_SECS={secs} is not a valid delay")))?;
        }
        if let Some(secs) = parse_var::<f64>("RELAY_RECONNECT_DELAY_SECS")? {
            config.reconnect_delay = secs_to_duration(secs)
                .ok_or_else(|| Error::Config(format!("RELAY_RECONNECT_DELAY_SECS={secs} is not a valid delay")))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse relay settings from a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| Error::Config(format!("invalid relay config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load relay settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(Error::Config("buffer_capacity must be at least 1".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(Error::Config("address must not be empty".to_string()));
        }
        Ok(())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn duration_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    secs_to_duration(secs)
        .ok_or_else(|| serde::de::Error::custom(format!("{secs} is not a valid delay in seconds")))
}
