use super::command::run_checked;
use super::{HostOs, PlatformKind};
use crate::autostart::{self, AutostartEntry, AutostartKind};
use crate::error::{validate_pid_for_check, Error, Result};
use crate::spawn::{LaunchRequest, ProcessHandle, SpawnSettings, SpawnStrategyChain};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::time::Duration;

/// Linux and macOS host.
#[derive(Debug)]
pub struct UnixHost {
    platform: PlatformKind,
    chain: SpawnStrategyChain,
    command_timeout: Duration,
}

impl UnixHost {
    pub fn new(platform: PlatformKind, settings: &SpawnSettings) -> Self {
        Self {
            platform,
            chain: SpawnStrategyChain::standard(platform, settings),
            command_timeout: settings.command_timeout,
        }
    }

    /// Signal 0 probe: `Ok` or `EPERM` means the pid exists.
    fn signal_probe(pid: u32) -> bool {
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    /// A pid that answers signal 0 may still be a zombie or dead task.
    async fn is_defunct(&self, pid: u32) -> bool {
        if self.platform == PlatformKind::Linux {
            return match std::fs::read_to_string(format!("/proc/{}/status", pid)) {
                Ok(status) => status_is_defunct(&status),
                Err(_) => false,
            };
        }

        let pid_arg = pid.to_string();
        match run_checked("ps", ["-o", "stat=", "-p", pid_arg.as_str()], self.command_timeout).await
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim().starts_with('Z'),
            Err(_) => false,
        }
    }

    /// Register an artifact with its service manager. `changed` is whether
    /// the artifact file was just (re)written.
    async fn activate(&self, entry: &AutostartEntry, changed: bool) -> Result<()> {
        let timeout = self.command_timeout;
        match entry.kind {
            AutostartKind::DesktopEntry => Ok(()),
            AutostartKind::UserServiceUnit => {
                let unit = entry.artifact_file_name().ok_or_else(|| Error::Autostart {
                    kind: entry.kind.to_string(),
                    reason: "service unit has no file name".to_string(),
                })?;
                if !changed
                    && run_checked("systemctl", ["--user", "is-enabled", unit.as_str()], timeout)
                        .await
                        .is_ok()
                {
                    tracing::debug!("Unit {} unchanged and enabled", unit);
                    return Ok(());
                }
                if changed {
                    run_checked("systemctl", ["--user", "daemon-reload"], timeout).await?;
                }
                run_checked("systemctl", ["--user", "enable", unit.as_str()], timeout).await?;
                Ok(())
            }
            AutostartKind::LaunchAgent => {
                let plist = entry.artifact_path_string().ok_or_else(|| Error::Autostart {
                    kind: entry.kind.to_string(),
                    reason: "launch agent has no plist path".to_string(),
                })?;
                if !changed {
                    // Unloading would stop the agent's job, which may be this process.
                    if let Err(e) = run_checked("launchctl", ["load", "-w", plist.as_str()], timeout).await {
                        tracing::debug!("Launch agent {} unchanged, load: {}", plist, e);
                    }
                    return Ok(());
                }
                // Reloading picks up a rewritten plist; unloading an unknown agent fails harmlessly.
                if let Err(e) = run_checked("launchctl", ["unload", plist.as_str()], timeout).await {
                    tracing::debug!("launchctl unload before reload: {}", e);
                }
                run_checked("launchctl", ["load", "-w", plist.as_str()], timeout).await?;
                Ok(())
            }
            AutostartKind::LoginItem => {
                let (remove, add) = autostart::login_item_scripts(&entry.name, &entry.command);
                if let Err(e) = run_checked("osascript", ["-e", remove.as_str()], timeout).await {
                    tracing::debug!("No previous login item to remove: {}", e);
                }
                run_checked("osascript", ["-e", add.as_str()], timeout).await?;
                Ok(())
            }
            AutostartKind::RegistryRunKey | AutostartKind::StartupFolderScript => {
                Err(Error::Autostart {
                    kind: entry.kind.to_string(),
                    reason: format!("not supported on {}", self.platform),
                })
            }
        }
    }
}

/// `State:` line of `/proc/<pid>/status` reports Z (zombie) or X (dead).
fn status_is_defunct(status: &str) -> bool {
    status
        .lines()
        .find_map(|line| line.strip_prefix("State:"))
        .and_then(|rest| rest.trim().chars().next())
        .map(|state| matches!(state, 'Z' | 'X'))
        .unwrap_or(false)
}

#[async_trait]
impl HostOs for UnixHost {
    fn platform(&self) -> PlatformKind {
        self.platform
    }

    async fn probe_process_alive(&self, pid: u32) -> bool {
        let Some(pid) = validate_pid_for_check(pid) else {
            return false;
        };
        if !Self::signal_probe(pid) {
            return false;
        }
        !self.is_defunct(pid).await
    }

    async fn spawn_detached(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        self.chain.launch(request).await
    }

    async fn install_autostart(&self, entry: &AutostartEntry) -> Result<()> {
        let changed = match &entry.artifact {
            Some(artifact) => autostart::write_artifact(artifact)?,
            None => true,
        };
        self.activate(entry, changed).await
    }
}
