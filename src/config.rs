//! Configuration for the multiplexer core.
//!
//! Hierarchical loading with defaults as the code base, an optional
//! configuration file, and environment variable overrides; validation is a
//! separate step so overrides can be layered first.

use std::env;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Settings for the all-watcher multiplexer loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllWatcherConfig {
    /// Buffer size of the backing change-notification channel. The backing
    /// adapter suspends when the loop falls this far behind.
    #[serde(default = "default_change_buffer_size")]
    pub change_buffer_size: usize,
}

impl Default for AllWatcherConfig {
    fn default() -> Self {
        Self {
            change_buffer_size: default_change_buffer_size(),
        }
    }
}

impl AllWatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.change_buffer_size == 0 {
            return Err(ConfigError::Message(
                "watcher.change_buffer_size must be greater than zero".into(),
            )
            .into());
        }
        Ok(())
    }
}

fn default_change_buffer_size() -> usize {
    1024
}

/// Settings for the instance-info aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// How long to gather requests into a batch before issuing the bulk
    /// call (milliseconds).
    #[serde(default = "default_gather_interval_ms")]
    pub gather_interval_ms: u64,

    /// A batch reaching this size is flushed without waiting out the
    /// gather interval.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Buffer size of the request channel.
    #[serde(default = "default_request_buffer_size")]
    pub request_buffer_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            gather_interval_ms: default_gather_interval_ms(),
            max_batch_size: default_max_batch_size(),
            request_buffer_size: default_request_buffer_size(),
        }
    }
}

impl AggregatorConfig {
    pub fn gather_interval(&self) -> Duration {
        Duration::from_millis(self.gather_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gather_interval_ms == 0 {
            return Err(ConfigError::Message(
                "aggregator.gather_interval_ms must be greater than zero".into(),
            )
            .into());
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Message(
                "aggregator.max_batch_size must be greater than zero".into(),
            )
            .into());
        }
        if self.request_buffer_size == 0 {
            return Err(ConfigError::Message(
                "aggregator.request_buffer_size must be greater than zero".into(),
            )
            .into());
        }
        Ok(())
    }
}

fn default_gather_interval_ms() -> u64 {
    3000
}

fn default_max_batch_size() -> usize {
    100
}

fn default_request_buffer_size() -> usize {
    64
}

/// Main configuration container for the multiplexer components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltamuxConfig {
    /// All-watcher loop settings
    #[serde(default)]
    pub watcher: AllWatcherConfig,

    /// Aggregator batching settings
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl DeltamuxConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in order (later overrides earlier):
    /// 1. Type defaults
    /// 2. Configuration file named by `CONFIG_PATH` (if set)
    /// 3. Environment variables with the `DELTAMUX__` prefix
    ///
    /// Validation is deferred to [`DeltamuxConfig::validate`] so callers
    /// can layer further overrides first.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("DELTAMUX")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies overrides from an additional configuration file.
    pub fn with_override_config(
        self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&self)?)
            .add_source(File::with_name(path).required(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.watcher.validate()?;
        self.aggregator.validate()?;
        Ok(())
    }
}
