//! Core configuration types.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working supervisor: 2 minute ticks, 5 minute heartbeat threshold, 30 second
//! bootstrap grace period.

use super::duration::duration_str;
use crate::error::{Error, Result};
use crate::signals::{SignalAction, SignalKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_APP_NAME: &str = "vigil";
pub const DEFAULT_HIDDEN_FLAG: &str = "--hidden";

/// Root configuration structure for vigil.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name used for the lock, heartbeat and autostart artifacts.
    pub app_name: String,
    pub target: TargetConfig,
    pub watchdog: WatchdogConfig,
    pub bootstrap: BootstrapConfig,
    pub paths: PathsConfig,
    /// Overrides for the watchdog signal policy. Kinds not listed keep the
    /// default action.
    pub signals: BTreeMap<SignalKind, SignalAction>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            target: TargetConfig::default(),
            watchdog: WatchdogConfig::default(),
            bootstrap: BootstrapConfig::default(),
            paths: PathsConfig::default(),
            signals: BTreeMap::new(),
        }
    }
}

/// How to find and invoke the supervised application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Explicit executable. When unset the watchdog searches the install dir.
    pub command: Option<PathBuf>,
    /// Directory passed to the target as its single positional argument.
    pub install_dir: Option<PathBuf>,
    /// Flag appended after the install dir; `null` disables it.
    pub hidden_flag: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            command: None,
            install_dir: None,
            hidden_flag: Some(DEFAULT_HIDDEN_FLAG.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    #[serde(with = "duration_str")]
    pub heartbeat_threshold: Duration,
    /// How often the stop-request file is checked.
    #[serde(with = "duration_str")]
    pub stop_poll_interval: Duration,
    /// Upper bound for any external command (shell spawn, process query).
    #[serde(with = "duration_str")]
    pub command_timeout: Duration,
    /// Maximum random delay added to each tick.
    #[serde(with = "duration_str")]
    pub tick_jitter: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2 * 60),
            heartbeat_threshold: Duration::from_secs(5 * 60),
            stop_poll_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(10),
            tick_jitter: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    #[serde(with = "duration_str")]
    pub grace_period: Duration,
    #[serde(with = "duration_str")]
    pub alive_interval: Duration,
    /// Register autostart entries on every bootstrap.
    pub autostart: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            alive_interval: Duration::from_secs(60),
            autostart: true,
        }
    }
}

/// Optional overrides for where records live. Unset fields are derived from
/// the platform's per-user directories in [`crate::context::SupervisorPaths`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub data_dir: Option<PathBuf>,
    pub lock_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    /// Home directory that autostart artifact paths are rooted at.
    pub autostart_home: Option<PathBuf>,
}

impl Config {
    /// Validate values that would make the supervisor misbehave.
    ///
    /// A tick interval that is not shorter than the heartbeat threshold is
    /// allowed but logged, since both are tunables.
    pub fn validate(&self) -> Result<()> {
        validate_app_name(&self.app_name)?;

        let non_zero = [
            ("watchdog.tick_interval", self.watchdog.tick_interval),
            ("watchdog.heartbeat_threshold", self.watchdog.heartbeat_threshold),
            ("watchdog.stop_poll_interval", self.watchdog.stop_poll_interval),
            ("watchdog.command_timeout", self.watchdog.command_timeout),
            ("bootstrap.alive_interval", self.bootstrap.alive_interval),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", field)));
            }
        }

        if let Some(flag) = &self.target.hidden_flag {
            if flag.trim().is_empty() {
                return Err(Error::Config(
                    "target.hidden_flag must not be empty (use null to disable it)".to_string(),
                ));
            }
        }

        if self.watchdog.tick_interval >= self.watchdog.heartbeat_threshold {
            tracing::warn!(
                "watchdog.tick_interval ({:?}) is not shorter than watchdog.heartbeat_threshold ({:?}); \
                 a frozen target may go unnoticed for longer than one threshold",
                self.watchdog.tick_interval,
                self.watchdog.heartbeat_threshold
            );
        }

        Ok(())
    }
}

/// App names end up in file names, so keep them to a portable character set.
pub fn validate_app_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("app_name cannot be empty".to_string()));
    }
    if name.len() > 64 {
        return Err(Error::Config(format!(
            "app_name '{}' is too long (max 64 characters)",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::Config(format!(
            "app_name '{}' contains invalid characters. Only alphanumeric, '-', '_' and '.' allowed.",
            name
        )));
    }
    if name.starts_with('.') {
        return Err(Error::Config(format!(
            "app_name '{}' must not start with '.'",
            name
        )));
    }
    Ok(())
}
