//! Host operating system abstraction.
//!
//! Everything OS-specific the supervisor does goes through [`HostOs`]:
//! probing a pid, spawning detached, and activating autostart entries. One
//! implementation exists per target OS and [`detect`] picks it once at
//! startup, so the rest of the crate has no `cfg` branches of its own.

pub mod command;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixHost;
#[cfg(windows)]
pub use windows::WindowsHost;

use crate::autostart::AutostartEntry;
use crate::error::Result;
use crate::spawn::{LaunchRequest, ProcessHandle, SpawnSettings};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Linux,
    MacOs,
    Windows,
}

impl PlatformKind {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(windows) {
            PlatformKind::Windows
        } else if cfg!(target_os = "macos") {
            PlatformKind::MacOs
        } else {
            PlatformKind::Linux
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Linux => write!(f, "linux"),
            PlatformKind::MacOs => write!(f, "macos"),
            PlatformKind::Windows => write!(f, "windows"),
        }
    }
}

#[async_trait]
pub trait HostOs: Send + Sync {
    fn platform(&self) -> PlatformKind;

    /// Whether `pid` names a running (not zombie) process.
    ///
    /// Invalid pids are never alive. Probe failures count as "not alive".
    async fn probe_process_alive(&self, pid: u32) -> bool;

    /// Start a process detached from the caller through the spawn chain.
    async fn spawn_detached(&self, request: &LaunchRequest) -> Result<ProcessHandle>;

    /// Write the entry's artifact (if any) and run its activation command.
    async fn install_autostart(&self, entry: &AutostartEntry) -> Result<()>;
}

/// Select the host implementation for this OS.
pub fn detect(settings: &SpawnSettings) -> Arc<dyn HostOs> {
    #[cfg(unix)]
    {
        Arc::new(UnixHost::new(PlatformKind::current(), settings))
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsHost::new(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_platform_matches_target() {
        let kind = PlatformKind::current();
        #[cfg(target_os = "linux")]
        assert_eq!(kind, PlatformKind::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(kind, PlatformKind::MacOs);
        #[cfg(windows)]
        assert_eq!(kind, PlatformKind::Windows);
        assert!(!kind.to_string().is_empty());
    }

    #[tokio::test]
    async fn detected_host_treats_invalid_pids_as_dead() {
        let settings = SpawnSettings::new(std::env::temp_dir(), std::time::Duration::from_secs(5));
        let host = detect(&settings);
        assert_eq!(host.platform(), PlatformKind::current());
        assert!(!host.probe_process_alive(0).await);
        assert!(!host.probe_process_alive(u32::MAX).await);
    }

    #[tokio::test]
    async fn detected_host_sees_itself() {
        let settings = SpawnSettings::new(std::env::temp_dir(), std::time::Duration::from_secs(5));
        let host = detect(&settings);
        assert!(host.probe_process_alive(std::process::id()).await);
    }
}
