//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SwdError};
use crate::core::model::DEFAULT_REASON;
use crate::events::listeners::EventsConfig;

/// Full SWD configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub sanctions: SanctionsConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Expiry timer and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between recovery sweeps of the store.
    pub sweep_interval_secs: u64,
    /// Upper bound on how long the timer thread sleeps with nothing due.
    pub timer_idle_poll_ms: u64,
    /// Capacity of the timer → expiry dispatch channel.
    pub dispatch_channel_capacity: usize,
}

/// Defaults applied to incoming sanctions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanctionsConfig {
    /// Reason recorded when the caller supplies none.
    pub default_reason: String,
}

/// Activity log rotation and durability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Rotate `paths.activity_log` once it would pass this size.
    pub max_size_mib: u64,
    /// Rotated generations kept next to the live file.
    pub keep_rotated: u32,
    pub fsync_interval_secs: u64,
    /// Events buffered for the logger thread before new ones are dropped.
    pub channel_capacity: usize,
}

/// Filesystem paths used by swd.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub sqlite_db: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            timer_idle_poll_ms: 1_000,
            dispatch_channel_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_size_mib: 50,
            keep_rotated: 5,
            fsync_interval_secs: 30,
            channel_capacity: 1_024,
        }
    }
}

impl Default for SanctionsConfig {
    fn default() -> Self {
        Self {
            default_reason: DEFAULT_REASON.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[SWD-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("swd").join("config.toml");
        let data = home_dir.join(".local").join("share").join("swd");
        Self {
            config_file: cfg,
            sqlite_db: data.join("sanctions.sqlite3"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl SchedulerConfig {
    /// Sweep cadence as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// Idle poll cap as a `Duration`.
    #[must_use]
    pub const fn timer_idle_poll(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timer_idle_poll_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SwdError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(SwdError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scheduler
        if let Some(raw) = lookup("SWD_SCHEDULER_SWEEP_INTERVAL_SECS") {
            self.scheduler.sweep_interval_secs =
                parse_env_u64("SWD_SCHEDULER_SWEEP_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SWD_SCHEDULER_TIMER_IDLE_POLL_MS") {
            self.scheduler.timer_idle_poll_ms =
                parse_env_u64("SWD_SCHEDULER_TIMER_IDLE_POLL_MS", &raw)?;
        }
        if let Some(raw) = lookup("SWD_SCHEDULER_DISPATCH_CHANNEL_CAPACITY") {
            self.scheduler.dispatch_channel_capacity =
                parse_env_usize("SWD_SCHEDULER_DISPATCH_CHANNEL_CAPACITY", &raw)?;
        }

        // sanctions
        if let Some(raw) = lookup("SWD_SANCTIONS_DEFAULT_REASON") {
            self.sanctions.default_reason = raw;
        }

        // events
        if let Some(raw) = lookup("SWD_EVENTS_ENABLED") {
            self.events.enabled = parse_env_bool("SWD_EVENTS_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("SWD_EVENTS_FILE_PATH") {
            self.events.file.path = PathBuf::from(raw);
        }

        // logging
        if let Some(raw) = lookup("SWD_LOGGING_MAX_SIZE_MIB") {
            self.logging.max_size_mib = parse_env_u64("SWD_LOGGING_MAX_SIZE_MIB", &raw)?;
        }
        if let Some(raw) = lookup("SWD_LOGGING_KEEP_ROTATED") {
            self.logging.keep_rotated = parse_env_u32("SWD_LOGGING_KEEP_ROTATED", &raw)?;
        }
        if let Some(raw) = lookup("SWD_LOGGING_FSYNC_INTERVAL_SECS") {
            self.logging.fsync_interval_secs =
                parse_env_u64("SWD_LOGGING_FSYNC_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SWD_LOGGING_CHANNEL_CAPACITY") {
            self.logging.channel_capacity =
                parse_env_usize("SWD_LOGGING_CHANNEL_CAPACITY", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("SWD_PATHS_SQLITE_DB") {
            self.paths.sqlite_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SWD_PATHS_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(SwdError::InvalidConfig {
                details: "scheduler.sweep_interval_secs must be > 0".to_string(),
            });
        }
        if self.scheduler.timer_idle_poll_ms == 0 {
            return Err(SwdError::InvalidConfig {
                details: "scheduler.timer_idle_poll_ms must be > 0".to_string(),
            });
        }
        if self.scheduler.dispatch_channel_capacity == 0 {
            return Err(SwdError::InvalidConfig {
                details: "scheduler.dispatch_channel_capacity must be > 0".to_string(),
            });
        }
        if self.sanctions.default_reason.trim().is_empty() {
            return Err(SwdError::InvalidConfig {
                details: "sanctions.default_reason must not be blank".to_string(),
            });
        }
        for channel in &self.events.channels {
            if !EventsConfig::KNOWN_CHANNELS.contains(&channel.as_str()) {
                return Err(SwdError::InvalidConfig {
                    details: format!(
                        "events.channels: unknown channel {channel:?} (expected one of {:?})",
                        EventsConfig::KNOWN_CHANNELS
                    ),
                });
            }
        }
        if self.logging.max_size_mib == 0 {
            return Err(SwdError::InvalidConfig {
                details: "logging.max_size_mib must be > 0".to_string(),
            });
        }
        if self.logging.channel_capacity == 0 {
            return Err(SwdError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }
        if self.paths.sqlite_db.as_os_str().is_empty() {
            return Err(SwdError::InvalidConfig {
                details: "paths.sqlite_db must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| SwdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_u32(name: &str, raw: &str) -> Result<u32> {
    raw.parse::<u32>().map_err(|error| SwdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.parse::<usize>().map_err(|error| SwdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|error| SwdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
