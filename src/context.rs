//! Supervisor context: configuration, resolved paths and the host handle.
//!
//! Built once per process and passed to every component explicitly.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::{self, HostOs};
use crate::spawn::SpawnSettings;
use crate::state::{PidFile, StopRequest, TimestampFile};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const HEARTBEAT_FILE: &str = "heartbeat.txt";
pub const TARGET_PID_FILE: &str = "target.pid";
pub const BOOTSTRAP_ALIVE_FILE: &str = "bootstrap.alive";

/// Every location the supervisor reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorPaths {
    pub data_dir: PathBuf,
    pub lock_file: PathBuf,
    pub stop_file: PathBuf,
    pub heartbeat_file: PathBuf,
    pub target_pid_file: PathBuf,
    pub bootstrap_alive_file: PathBuf,
    pub log_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub autostart_home: PathBuf,
}

impl SupervisorPaths {
    /// Derive paths from config overrides and the platform's user dirs.
    ///
    /// Defaults: data in `<config_dir>/<app>`, lock and stop files in the
    /// temp dir, logs in `<data_dir>/logs`.
    pub fn resolve(config: &Config) -> Result<Self> {
        let app = config.app_name.as_str();

        let data_dir = match &config.paths.data_dir {
            Some(dir) => expand_home(dir),
            None => dirs::config_dir()
                .map(|dir| dir.join(app))
                .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{}", app))))
                .ok_or_else(|| {
                    Error::Config("Could not determine a per-user data directory".to_string())
                })?,
        };
        let lock_dir = config
            .paths
            .lock_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(std::env::temp_dir);
        let log_dir = config
            .paths
            .log_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| data_dir.join("logs"));
        let scratch_dir = config
            .paths
            .scratch_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(std::env::temp_dir);
        let autostart_home = match &config.paths.autostart_home {
            Some(dir) => expand_home(dir),
            None => dirs::home_dir().ok_or_else(|| {
                Error::Config("Could not determine the home directory".to_string())
            })?,
        };

        Ok(Self {
            lock_file: lock_dir.join(format!("{}-watchdog.lock", app)),
            stop_file: lock_dir.join(format!("{}-watchdog.stop", app)),
            heartbeat_file: data_dir.join(HEARTBEAT_FILE),
            target_pid_file: data_dir.join(TARGET_PID_FILE),
            bootstrap_alive_file: data_dir.join(BOOTSTRAP_ALIVE_FILE),
            data_dir,
            log_dir,
            scratch_dir,
            autostart_home,
        })
    }

    pub fn heartbeat(&self) -> TimestampFile {
        TimestampFile::new(&self.heartbeat_file)
    }

    pub fn target_pid(&self) -> PidFile {
        PidFile::new(&self.target_pid_file)
    }

    pub fn bootstrap_alive(&self) -> TimestampFile {
        TimestampFile::new(&self.bootstrap_alive_file)
    }

    pub fn stop_request(&self) -> StopRequest {
        StopRequest::new(&self.stop_file)
    }

    /// Log file for a role, e.g. `<log_dir>/watchdog.log`.
    pub fn log_file(&self, role: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", role))
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[derive(Clone)]
pub struct SupervisorContext {
    pub config: Arc<Config>,
    /// File the config was loaded from, forwarded to spawned roles.
    pub config_path: Option<PathBuf>,
    pub paths: SupervisorPaths,
    pub host: Arc<dyn HostOs>,
}

impl SupervisorContext {
    pub fn new(config: Config, config_path: Option<PathBuf>, host: Arc<dyn HostOs>) -> Result<Self> {
        let paths = SupervisorPaths::resolve(&config)?;
        Ok(Self {
            config: Arc::new(config),
            config_path,
            paths,
            host,
        })
    }

    /// Context backed by the native host for this OS.
    pub fn native(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let paths = SupervisorPaths::resolve(&config)?;
        let host = platform::detect(&SpawnSettings::new(
            &paths.scratch_dir,
            config.watchdog.command_timeout,
        ));
        Ok(Self {
            config: Arc::new(config),
            config_path,
            paths,
            host,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }
}

impl std::fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorContext")
            .field("app_name", &self.config.app_name)
            .field("config_path", &self.config_path)
            .field("paths", &self.paths)
            .field("platform", &self.host.platform())
            .finish()
    }
}
