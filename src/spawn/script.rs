use super::{LaunchRequest, ProcessHandle, ShellSpawn, SpawnStrategy};
use crate::error::{Error, Result};
use crate::platform::command::{output_with_timeout, pid_from_stdout};
use crate::platform::PlatformKind;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Write a throwaway launcher script to the scratch dir and execute it.
///
/// Last resort for parents that cannot exec the target or a shell inline.
/// The script is deleted once it has run.
#[derive(Debug)]
pub struct ScriptSpawn {
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl ScriptSpawn {
    pub fn new(scratch_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            scratch_dir,
            timeout,
        }
    }

    /// Script body for the current platform.
    pub fn render(request: &LaunchRequest) -> String {
        if cfg!(windows) {
            render_batch(request)
        } else {
            format!("#!/bin/sh\n{}", ShellSpawn::unix_script(request))
        }
    }

    fn write_script(&self, request: &LaunchRequest) -> Result<tempfile::TempPath> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let suffix = if cfg!(windows) { ".bat" } else { ".sh" };
        let mut file = tempfile::Builder::new()
            .prefix("vigil-launch-")
            .suffix(suffix)
            .tempfile_in(&self.scratch_dir)?;
        file.write_all(Self::render(request).as_bytes())?;
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755))?;
        }

        // Close the handle before exec; an open writer makes exec fail with ETXTBSY.
        Ok(file.into_temp_path())
    }

    fn command(script: &Path) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd.exe");
            cmd.arg("/C").arg(script);
            cmd
        } else {
            Command::new(script)
        }
    }
}

fn render_batch(request: &LaunchRequest) -> String {
    let mut script = String::from("@echo off\r\n");
    if let Some(cwd) = &request.cwd {
        script.push_str(&format!("cd /d \"{}\"\r\n", cwd.display()));
    }
    script.push_str(&format!("start \"\" /B {}\r\n", request.batch_line()));
    script.push_str("exit /b 0\r\n");
    script
}

#[async_trait]
impl SpawnStrategy for ScriptSpawn {
    fn name(&self) -> &'static str {
        "script"
    }

    fn applies_to(&self, _platform: PlatformKind) -> bool {
        true
    }

    async fn spawn(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let script = self.write_script(request).map_err(|e| Error::SpawnFailed {
            strategy: self.name(),
            reason: format!(
                "cannot write launcher script in '{}': {}",
                self.scratch_dir.display(),
                e
            ),
        })?;
        tracing::debug!("Generated launcher script {}", script.display());

        let mut cmd = Self::command(&script);
        let result = output_with_timeout(&mut cmd, "launcher script", self.timeout).await;

        if let Err(e) = script.close() {
            tracing::debug!("Failed to remove launcher script: {}", e);
        }

        let output = match result {
            Ok(output) => output,
            Err(Error::Timeout { .. }) => {
                tracing::warn!(
                    "Launcher script for '{}' timed out; assuming it was started",
                    request.program.display()
                );
                return Ok(ProcessHandle {
                    pid: None,
                    strategy: self.name(),
                });
            }
            Err(e) => {
                return Err(Error::SpawnFailed {
                    strategy: self.name(),
                    reason: e.to_string(),
                })
            }
        };

        if !output.status.success() {
            return Err(Error::SpawnFailed {
                strategy: self.name(),
                reason: format!(
                    "launcher script exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(ProcessHandle {
            pid: pid_from_stdout(&output),
            strategy: self.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_script_uses_start() {
        let request = LaunchRequest::new(r"C:\Apps\demo.exe")
            .arg(r"C:\Apps")
            .cwd(r"C:\Apps");
        let script = render_batch(&request);
        assert!(script.starts_with("@echo off\r\n"));
        assert!(script.contains("cd /d \"C:\\Apps\"\r\n"));
        assert!(script.contains("start \"\" /B "));
        assert!(script.ends_with("exit /b 0\r\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_script_and_cleans_up() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let target = bin.path().join("target.sh");
        std::fs::write(&target, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).unwrap();

        let strategy = ScriptSpawn::new(scratch.path().to_path_buf(), Duration::from_secs(5));
        let handle = strategy.spawn(&LaunchRequest::new(&target)).await.unwrap();

        assert_eq!(handle.strategy, "script");
        assert!(handle.pid.is_some());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unwritable_scratch_dir_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let blocker = scratch.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        // A regular file where the directory should be.
        let strategy = ScriptSpawn::new(blocker.join("sub"), Duration::from_secs(5));
        let err = strategy
            .spawn(&LaunchRequest::new("/bin/true"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { strategy: "script", .. }));
    }
}
