//! Runtime Configuration
//!
//! Settings are layered, later sources winning:
//!
//! 1. built-in defaults ([`crate::defaults`])
//! 2. an optional TOML file
//! 3. environment variables prefixed `BUSRPC_`, nested keys joined by `__`
//!
//! ```toml
//! method_call_timeout_ms = 5000
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use crate::defaults;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Settings for connections, dispatch and workers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    pub method_call_timeout_ms: u64,
    pub async_reply_grace_ms: u64,
    pub dispatch_poll_interval_ms: u64,
    pub worker_threads: usize,
    pub worker_queue_capacity: usize,
    /// Overrides the machine id reported by the Peer interface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            method_call_timeout_ms: defaults::calls::METHOD_CALL_TIMEOUT_MS,
            async_reply_grace_ms: defaults::calls::ASYNC_REPLY_GRACE_MS,
            dispatch_poll_interval_ms: defaults::dispatch::POLL_INTERVAL_MS,
            worker_threads: defaults::dispatch::WORKER_THREADS,
            worker_queue_capacity: defaults::dispatch::WORKER_QUEUE_CAPACITY,
            machine_id: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Load defaults, then `path` if given, then `BUSRPC_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, defaults::ENV_PREFIX)
    }

    pub(crate) fn load_layered(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&RpcConfig::default()).context("Failed to encode defaults")?,
        );

        if let Some(path) = path {
            info!("Loading bus runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator(defaults::ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: RpcConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        debug!(?config, "Bus runtime config loaded");
        Ok(config)
    }

    /// Reject settings the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("method_call_timeout_ms", self.method_call_timeout_ms),
            ("async_reply_grace_ms", self.async_reply_grace_ms),
            ("dispatch_poll_interval_ms", self.dispatch_poll_interval_ms),
        ];
        for (key, value) in durations {
            if value == 0 {
                bail!("{key} must be greater than zero");
            }
        }
        if self.worker_threads == 0 {
            bail!("worker_threads must be greater than zero");
        }
        if self.worker_queue_capacity == 0 {
            bail!("worker_queue_capacity must be greater than zero");
        }
        if let Some(id) = &self.machine_id {
            if id.len() != 32 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
                bail!("machine_id must be 32 hexadecimal characters, got '{id}'");
            }
        }
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }
        Ok(())
    }

    pub fn method_call_timeout(&self) -> Duration {
        Duration::from_millis(self.method_call_timeout_ms)
    }

    pub fn async_reply_grace(&self) -> Duration {
        Duration::from_millis(self.async_reply_grace_ms)
    }

    pub fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_interval_ms)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Load from the default config path when it exists, else defaults plus environment
pub fn load_config() -> Result<RpcConfig> {
    let path = Path::new(defaults::DEFAULT_CONFIG_PATH);
    RpcConfig::load(path.exists().then_some(path))
}
