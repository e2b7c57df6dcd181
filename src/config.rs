//! Configuration loading and persistence.
//!
//! Layering: defaults, then `<config_dir>/config.json`, then `STRACK_*`
//! environment overrides. The bearer token is never written to disk; it
//! comes from `STRACK_TOKEN` or the command line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MIN_DISTANCE_METERS, DEFAULT_MIN_FIX_INTERVAL,
    DEFAULT_RECONNECT_DELAY, DEFAULT_WS_URL,
};
use crate::geolocation::{Accuracy, WatchOptions};
use crate::session::{ReceiverConfig, SenderConfig};
use crate::transport::{ReconnectConfig, TransportConfig};

/// Config file name inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// Reconnection settings as stored on disk.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Retries after the initial connection attempt.
    pub max_attempts: u32,
    /// Fixed delay before each retry, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: duration_ms(DEFAULT_RECONNECT_DELAY),
        }
    }
}

/// Location watch settings as stored on disk.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct LocationSettings {
    /// Requested accuracy.
    pub accuracy: Accuracy,
    /// Minimum time between fixes, in milliseconds.
    pub min_interval_ms: u64,
    /// Minimum movement between fixes, in meters.
    pub min_distance_meters: f64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::default(),
            min_interval_ms: duration_ms(DEFAULT_MIN_FIX_INTERVAL),
            min_distance_meters: DEFAULT_MIN_DISTANCE_METERS,
        }
    }
}

/// Configuration for the strack CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base WebSocket URL of the relay.
    pub ws_url: String,
    /// Own username, used when sharing.
    pub username: String,
    /// Bearer token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reconnection policy.
    pub reconnect: ReconnectSettings,
    /// Location watch policy.
    pub location: LocationSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            username: String::new(),
            token: String::new(),
            connect_timeout_ms: duration_ms(TransportConfig::default().connect_timeout),
            reconnect: ReconnectSettings::default(),
            location: LocationSettings::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/strack-test`
    /// 2. `STRACK_CONFIG_DIR` env var: explicit override
    /// 3. `STRACK_ENV=test`: `tmp/strack-test` (integration tests)
    /// 4. Default: platform config dir + `strack`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/strack-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("STRACK_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/strack-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("strack")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`, or defaults when it does not exist.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }

    /// Persists the configuration to the config directory.
    /// The token is never saved.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the configuration to `dir/config.json`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `STRACK_*` overrides read through `lookup`. Unparseable
    /// numbers are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ws_url) = lookup("STRACK_WS_URL") {
            self.ws_url = ws_url;
        }

        if let Some(username) = lookup("STRACK_USERNAME") {
            self.username = username;
        }

        if let Some(token) = lookup("STRACK_TOKEN") {
            self.token = token;
        }

        if let Some(value) = parse_override(&lookup, "STRACK_MAX_RECONNECT_ATTEMPTS") {
            self.reconnect.max_attempts = value;
        }

        if let Some(value) = parse_override(&lookup, "STRACK_RECONNECT_DELAY_MS") {
            self.reconnect.base_delay_ms = value;
        }

        if let Some(value) = parse_override(&lookup, "STRACK_MIN_INTERVAL_MS") {
            self.location.min_interval_ms = value;
        }
    }

    /// Check if a bearer token is available.
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Transport settings derived from this config.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.ws_url.clone(),
            reconnect: ReconnectConfig {
                max_attempts: self.reconnect.max_attempts,
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            },
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    /// Geolocation watch policy derived from this config.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            accuracy: self.location.accuracy,
            min_interval: Duration::from_millis(self.location.min_interval_ms),
            min_distance_meters: self.location.min_distance_meters,
        }
    }

    /// Sender session settings.
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            transport: self.transport_config(),
            watch: self.watch_options(),
        }
    }

    /// Receiver session settings.
    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            transport: self.transport_config(),
        }
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}: not a number ({:?})", key, raw);
            None
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
