//! Configuration file for the relay CLI.

use moblink_core::{ManualSettings, RelayTimings};
use moblink_transport::Network;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relay CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay identity
    #[serde(default)]
    pub relay: RelayConfig,
    /// Uplink the tunnels are bound to
    #[serde(default)]
    pub uplink: UplinkConfig,
    /// Manual mode streamers
    #[serde(default)]
    pub manual: ManualConfig,
    /// Automatic mode settings
    #[serde(default)]
    pub automatic: AutomaticConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Stable relay id, generated on first run
    #[serde(default)]
    pub id: String,
    /// Name shown by the streamer
    #[serde(default = "default_name")]
    pub name: String,
    /// Reconnect after a wrong password even if the streamer keeps the
    /// connection open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrong_password_timeout_secs: Option<u64>,
}

/// Uplink interface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UplinkConfig {
    /// Interface name, e.g. `wwan0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Local address on the interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Pin sockets to the interface with `SO_BINDTODEVICE`
    #[serde(default)]
    pub bind_device: bool,
}

/// One manual mode streamer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Streamer URL, `ws://host:port`
    pub url: String,
    /// Streamer password
    pub password: String,
}

/// Manual mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManualConfig {
    /// Configured streamers
    #[serde(default)]
    pub streamers: Vec<StreamerConfig>,
}

/// Automatic mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AutomaticConfig {
    /// Password shared by all discovered streamers
    #[serde(default)]
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_name() -> String {
    "Relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: default_name(),
            wrong_password_timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl UplinkConfig {
    /// Network tunnels are bound to.
    ///
    /// Without an address the kernel's default route is used.
    #[must_use]
    pub fn network(&self) -> Network {
        let address = self
            .address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let name = self.interface.clone().unwrap_or_default();
        Network::new(name, address).with_bind_device(self.bind_device)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("moblink/config.toml")
    }

    /// Load config from `path`, or create a default one there.
    ///
    /// A missing relay id is generated and written back.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the config fails.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        if config.ensure_relay_id() || !path.exists() {
            config.save(path)?;
        }
        Ok(config)
    }

    /// Load config from `path`, or the defaults if it does not exist.
    ///
    /// Never writes to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default_read_only<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Generate a relay id if there is none. Returns true if one was generated.
    pub fn ensure_relay_id(&mut self) -> bool {
        if !self.relay.id.is_empty() {
            return false;
        }
        self.relay.id = uuid::Uuid::new_v4().to_string();
        tracing::info!("Generated relay id {}", self.relay.id);
        true
    }

    /// Relay timings derived from the config.
    #[must_use]
    pub fn timings(&self) -> RelayTimings {
        RelayTimings {
            wrong_password_timeout: self
                .relay
                .wrong_password_timeout_secs
                .map(Duration::from_secs),
            ..RelayTimings::default()
        }
    }

    /// Manual mode entries.
    #[must_use]
    pub fn manual_settings(&self) -> Vec<ManualSettings> {
        self.manual
            .streamers
            .iter()
            .map(|streamer| ManualSettings::new(streamer.url.clone(), streamer.password.clone()))
            .collect()
    }

    /// Validate configuration
    ///
    /// Empty URLs and passwords are not errors; they show up in the relay
    /// status instead.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relay.name.trim().is_empty() {
            anyhow::bail!("Relay name must not be empty");
        }

        if self.uplink.bind_device && self.uplink.interface.is_none() {
            anyhow::bail!("bind_device enabled but no uplink interface specified");
        }

        for streamer in &self.manual.streamers {
            if !streamer.url.is_empty()
                && !(streamer.url.starts_with("ws://") || streamer.url.starts_with("wss://"))
            {
                anyhow::bail!(
                    "Streamer URL '{}' must start with ws:// or wss://",
                    streamer.url
                );
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
