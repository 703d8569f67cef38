//! Runtime Configuration Module
//!
//! Provides configuration loading and validation for the actor runtime.
//! Supports loading from TOML files with environment variable overrides.

use crate::defaults;
use crate::policy::RecoveryPolicy;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix, e.g. `ACTOR_SYSTEM__MAX_ACTORS=128`
pub const ENV_PREFIX: &str = "ACTOR";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Actor slots, mailboxes and recovery
    pub system: SystemSettings,

    /// Worker pool that drains mailboxes
    pub pool: PoolSettings,

    /// Trace/profiling sink
    pub trace: TraceSettings,

    /// Log output used by binaries
    pub logging: LoggingSettings,
}

/// Actor system settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SystemSettings {
    pub max_actors: usize,
    pub default_mailbox_capacity: usize,
    pub max_mailbox_capacity: usize,
    pub default_recovery: RecoveryPolicy,
    /// Restarts allowed per window before a failing actor is stopped for good
    pub max_restarts: u32,
    pub restart_window_secs: u64,
}

/// Worker pool settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub workers: usize,
    /// Pending job slots; defaults to four per actor slot
    pub queue_capacity: Option<usize>,
    pub submit_timeout_ms: u64,
}

/// Output format of the trace file
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// `timestamp,actor_id,gen_id,thread_id,eventType`
    #[default]
    Csv,
    /// One JSON object per line
    Json,
}

/// Trace sink settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TraceSettings {
    pub enabled: bool,
    pub buffer_capacity: usize,
    pub ring_capacity: usize,
    /// File receiving flushed events; events stay in memory only when unset
    pub output: Option<PathBuf>,
    pub format: TraceFormat,
    pub flush_interval_ms: u64,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            max_actors: defaults::system::MAX_ACTORS,
            default_mailbox_capacity: defaults::system::MAILBOX_CAPACITY,
            max_mailbox_capacity: defaults::system::MAX_MAILBOX_CAPACITY,
            default_recovery: RecoveryPolicy::default(),
            max_restarts: defaults::system::MAX_RESTARTS,
            restart_window_secs: defaults::system::RESTART_WINDOW_SECS,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: defaults::pool::WORKERS,
            queue_capacity: None,
            submit_timeout_ms: defaults::pool::SUBMIT_TIMEOUT_MS,
        }
    }
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_capacity: defaults::trace::BUFFER_CAPACITY,
            ring_capacity: defaults::trace::RING_CAPACITY,
            output: None,
            format: TraceFormat::default(),
            flush_interval_ms: defaults::trace::FLUSH_INTERVAL_MS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl SystemSettings {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }
}

impl PoolSettings {
    /// Pool queue capacity for a system with `max_actors` slots
    pub fn effective_queue_capacity(&self, max_actors: usize) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| max_actors.saturating_mul(defaults::pool::QUEUE_SLOTS_PER_ACTOR))
            .max(1)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

impl TraceSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional TOML file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        } else {
            debug!("No config file given, using defaults");
        }

        // Override with environment variables (ACTOR_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.system.max_actors == 0 {
            bail!("system.max_actors must be at least 1");
        }
        if self.system.max_mailbox_capacity == 0 {
            bail!("system.max_mailbox_capacity must be at least 1");
        }
        if self.system.default_mailbox_capacity == 0
            || self.system.default_mailbox_capacity > self.system.max_mailbox_capacity
        {
            bail!(
                "system.default_mailbox_capacity must be between 1 and {}",
                self.system.max_mailbox_capacity
            );
        }
        if self.pool.workers == 0 {
            bail!("pool.workers must be at least 1");
        }
        if let Some(capacity) = self.pool.queue_capacity {
            // Every actor may need a drain job queued at once
            if capacity < self.system.max_actors {
                bail!(
                    "pool.queue_capacity ({}) must be at least system.max_actors ({})",
                    capacity,
                    self.system.max_actors
                );
            }
        }
        if self.trace.buffer_capacity == 0 || self.trace.ring_capacity == 0 {
            bail!("trace.buffer_capacity and trace.ring_capacity must be at least 1");
        }
        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(path)
}
