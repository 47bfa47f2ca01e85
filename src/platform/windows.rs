use super::command::run_checked;
use super::{HostOs, PlatformKind};
use crate::autostart::{self, AutostartEntry, AutostartKind};
use crate::error::{validate_pid_for_check, Error, Result};
use crate::spawn::{LaunchRequest, ProcessHandle, SpawnSettings, SpawnStrategyChain};
use async_trait::async_trait;
use std::time::Duration;

const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

#[derive(Debug)]
pub struct WindowsHost {
    chain: SpawnStrategyChain,
    command_timeout: Duration,
}

impl WindowsHost {
    pub fn new(settings: &SpawnSettings) -> Self {
        Self {
            chain: SpawnStrategyChain::standard(PlatformKind::Windows, settings),
            command_timeout: settings.command_timeout,
        }
    }
}

/// `tasklist /FO CSV` rows quote every field, so the pid appears as `"1234"`.
fn tasklist_lists_pid(stdout: &str, pid: u32) -> bool {
    let needle = format!("\"{}\"", pid);
    stdout.lines().any(|line| line.contains(&needle))
}

#[async_trait]
impl HostOs for WindowsHost {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    async fn probe_process_alive(&self, pid: u32) -> bool {
        let Some(pid) = validate_pid_for_check(pid) else {
            return false;
        };
        let filter = format!("PID eq {}", pid);
        match run_checked(
            "tasklist",
            ["/FI", filter.as_str(), "/NH", "/FO", "CSV"],
            self.command_timeout,
        )
        .await
        {
            Ok(output) => tasklist_lists_pid(&String::from_utf8_lossy(&output.stdout), pid),
            Err(e) => {
                tracing::debug!("tasklist probe for PID {} failed: {}", pid, e);
                false
            }
        }
    }

    async fn spawn_detached(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        self.chain.launch(request).await
    }

    async fn install_autostart(&self, entry: &AutostartEntry) -> Result<()> {
        if let Some(artifact) = &entry.artifact {
            autostart::write_artifact(artifact)?;
        }

        match entry.kind {
            AutostartKind::StartupFolderScript => Ok(()),
            AutostartKind::RegistryRunKey => {
                let value = autostart::registry_value(&entry.command);
                run_checked(
                    "reg",
                    [
                        "add",
                        RUN_KEY,
                        "/v",
                        entry.name.as_str(),
                        "/t",
                        "REG_SZ",
                        "/d",
                        value.as_str(),
                        "/f",
                    ],
                    self.command_timeout,
                )
                .await?;
                Ok(())
            }
            other => Err(Error::Autostart {
                kind: other.to_string(),
                reason: "not supported on windows".to_string(),
            }),
        }
    }
}
