//! Configuration types for the replay stream store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReplayError, Result};
use crate::model::ReplayVersion;
use crate::session::DEFAULT_NAME_PREFIX;

/// Default configuration file looked up in the working directory
pub const CONFIG_FILE: &str = "replaykit.toml";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "REPLAYKIT_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReplayConfig {
    /// Which registry backend to use
    #[serde(default)]
    pub store: StoreConfig,

    /// Version stamped on new recordings and used as the default listing filter
    #[serde(default)]
    pub version: ReplayVersion,

    /// Recording configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Playback configuration
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Registry backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local store, lost on exit
    Memory,

    /// One directory per replay under `root_dir`
    File {
        /// Store root directory
        #[serde(default = "default_root_dir")]
        root_dir: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            root_dir: default_root_dir(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("replaykit")
        .join("demos")
}

/// Recording configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingConfig {
    /// Prefix for names generated when a recording starts without one
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_name_prefix() -> String {
    DEFAULT_NAME_PREFIX.to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// How often a follower polls a live replay for new data
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

/// Builder for ReplayConfig
pub struct ConfigBuilder {
    config: ReplayConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: ReplayConfig::default(),
        }
    }

    /// Set store configuration
    pub fn store(mut self, config: StoreConfig) -> Self {
        self.config.store = config;
        self
    }

    /// Use a file store rooted at `root_dir`
    pub fn file_store(self, root_dir: impl Into<PathBuf>) -> Self {
        self.store(StoreConfig::File {
            root_dir: root_dir.into(),
        })
    }

    /// Use an in-memory store
    pub fn memory_store(self) -> Self {
        self.store(StoreConfig::Memory)
    }

    /// Set the recording version
    pub fn version(mut self, version: ReplayVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Set the generated-name prefix
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.recording.name_prefix = prefix.into();
        self
    }

    /// Set the live-follow poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.playback.poll_interval = interval;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ReplayConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (replaykit.toml)
    /// 3. Environment variable overrides (`REPLAYKIT_STORE__ROOT_DIR=...`)
    /// 4. File named by REPLAYKIT_CONFIG_PATH, if set
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG_PATH"]).split("__"));

        if let Ok(path) = std::env::var("REPLAYKIT_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: ReplayConfig = figment.extract().map_err(|e| {
            ReplayError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(ReplayError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: ReplayConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                ReplayError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if let StoreConfig::File { root_dir } = &self.store {
            if root_dir.as_os_str().is_empty() {
                return Err(ReplayError::Configuration(
                    "store.root_dir must not be empty".to_string(),
                ));
            }
        }

        let prefix = &self.recording.name_prefix;
        if prefix.is_empty() || prefix.contains(['/', '\\']) || prefix.chars().any(char::is_control)
        {
            return Err(ReplayError::Configuration(format!(
                "recording.name_prefix '{}' is not usable in a stream name",
                prefix
            )));
        }

        if self.playback.poll_interval.is_zero() {
            return Err(ReplayError::Configuration(
                "playback.poll_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
