use super::{LaunchRequest, ProcessHandle, SpawnStrategy};
use crate::error::{Error, Result};
use crate::platform::command::{output_with_timeout, pid_from_stdout};
use crate::platform::PlatformKind;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Exit status the wrapper uses when the program cannot be resolved.
const NOT_FOUND: i32 = 127;

/// Launch through the platform shell.
///
/// Handles programs that need shell resolution (PATH lookups, scripts without
/// a shebang). On unix the background pid is read back from `echo $!`.
#[derive(Debug)]
pub struct ShellSpawn {
    timeout: Duration,
}

impl ShellSpawn {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The `/bin/sh -c` body for a request.
    pub fn unix_script(request: &LaunchRequest) -> String {
        let program = shell_escape::unix::escape(request.program.to_string_lossy()).into_owned();
        let mut script = String::new();
        if let Some(cwd) = &request.cwd {
            script.push_str(&format!(
                "cd {} || exit 1\n",
                shell_escape::unix::escape(cwd.to_string_lossy())
            ));
        }
        script.push_str(&format!(
            "command -v {} >/dev/null 2>&1 || exit {}\n",
            program, NOT_FOUND
        ));
        script.push_str(&format!(
            "nohup {} >/dev/null 2>&1 &\necho $!\n",
            request.shell_line()
        ));
        script
    }

    fn command(request: &LaunchRequest) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd.exe");
            cmd.args(["/C", "start", "", "/B"])
                .arg(&request.program)
                .args(&request.args);
            if let Some(cwd) = &request.cwd {
                cmd.current_dir(cwd);
            }
            cmd
        } else {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(Self::unix_script(request));
            cmd
        }
    }
}

#[async_trait]
impl SpawnStrategy for ShellSpawn {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn applies_to(&self, _platform: PlatformKind) -> bool {
        true
    }

    async fn spawn(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let mut cmd = Self::command(request);
        let output = match output_with_timeout(&mut cmd, "shell spawn", self.timeout).await {
            Ok(output) => output,
            Err(Error::Timeout { .. }) => {
                // The wrapper hung after backgrounding; treat as started.
                tracing::warn!(
                    "Shell wrapper for '{}' timed out; assuming it was started",
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
            let reason = if output.status.code() == Some(NOT_FOUND) {
                format!("'{}' not found", request.program.display())
            } else {
                format!(
                    "shell exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )
            };
            return Err(Error::SpawnFailed {
                strategy: self.name(),
                reason,
            });
        }

        Ok(ProcessHandle {
            pid: pid_from_stdout(&output),
            strategy: self.name(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn script_checks_then_backgrounds() {
        let request = LaunchRequest::new("/opt/app/app").arg("/opt/app").cwd("/opt/app");
        let script = ShellSpawn::unix_script(&request);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "cd /opt/app || exit 1");
        assert_eq!(lines[1], "command -v /opt/app/app >/dev/null 2>&1 || exit 127");
        assert_eq!(lines[2], "nohup /opt/app/app /opt/app >/dev/null 2>&1 &");
        assert_eq!(lines[3], "echo $!");
    }

    #[tokio::test]
    async fn reads_background_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.sh");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let handle = ShellSpawn::new(Duration::from_secs(5))
            .spawn(&LaunchRequest::new(&path))
            .await
            .unwrap();
        assert_eq!(handle.strategy, "shell");
        assert!(handle.pid.is_some());
    }

    #[tokio::test]
    async fn unresolvable_program_fails() {
        let err = ShellSpawn::new(Duration::from_secs(5))
            .spawn(&LaunchRequest::new("/nonexistent/vigil-target"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"), "{}", err);
    }
}
