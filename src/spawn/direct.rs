use super::{LaunchRequest, ProcessHandle, SpawnStrategy};
use crate::error::{Error, Result};
use crate::platform::PlatformKind;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Spawn the executable directly, detached into its own process group.
///
/// The child handle is moved into a background task that waits on it, so a
/// target that exits is reaped instead of lingering as a zombie under the
/// watchdog.
#[derive(Debug, Default)]
pub struct DirectSpawn;

impl DirectSpawn {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpawnStrategy for DirectSpawn {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn applies_to(&self, _platform: PlatformKind) -> bool {
        true
    }

    async fn spawn(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);

        let mut child = cmd.spawn().map_err(|e| Error::SpawnFailed {
            strategy: self.name(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let program = request.program.display().to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("'{}' exited with {}", program, status),
                Err(e) => tracing::debug!("Failed to wait for '{}': {}", program, e),
            }
        });

        Ok(ProcessHandle {
            pid,
            strategy: self.name(),
        })
    }
}
