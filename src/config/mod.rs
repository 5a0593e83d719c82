//! Application configuration.
//!
//! Aggregates dispatcher and messaging configuration into a single Config
//! struct that can be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::delivered::DEFAULT_DUPLICATE_WINDOW;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "eventwire.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "EVENTWIRE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EVENTWIRE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "EVENTWIRE_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global event dispatcher configuration.
    pub dispatcher: DispatcherConfig,
    /// Messaging configuration.
    pub messaging: MessagingConfig,
}

/// Global event dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Application name published in `PublisherInfo`.
    pub app_name: Option<String>,
    /// Publish `CONNECT`/`DISCONNECT` status events on init/destroy.
    pub announce_status: bool,
    /// Window for suppressing repeated message ids, in milliseconds.
    /// Zero disables suppression.
    pub duplicate_window_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            app_name: None,
            announce_status: false,
            duplicate_window_ms: DEFAULT_DUPLICATE_WINDOW.as_millis() as u64,
        }
    }
}

impl DispatcherConfig {
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_announce_status(mut self, announce: bool) -> Self {
        self.announce_status = announce;
        self
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `eventwire.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            dispatcher: DispatcherConfig::default().with_app_name("test"),
            messaging: MessagingConfig::default(),
        }
    }
}
