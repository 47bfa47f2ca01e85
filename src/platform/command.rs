//! Timeout-bounded external commands.
//!
//! Every shell-out the supervisor makes goes through here: a hung `systemctl`,
//! `tasklist` or launcher script is killed after the timeout instead of
//! stalling the watchdog tick.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Run a prepared command to completion, capturing its output.
///
/// Stdin is closed and the child is killed if the timeout elapses.
pub async fn output_with_timeout(
    cmd: &mut Command,
    label: &str,
    timeout: Duration,
) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::CommandFailed {
            command: label.to_string(),
            status: "spawn error".to_string(),
            stderr: e.to_string(),
        }),
        Err(_) => Err(Error::Timeout {
            command: label.to_string(),
            timeout,
        }),
    }
}

/// Run `program args...` and require a zero exit status.
pub async fn run_checked<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = output_with_timeout(&mut cmd, program, timeout).await?;
    ensure_success(program, output)
}

/// Turn a non-zero exit into [`Error::CommandFailed`].
pub fn ensure_success(label: &str, output: Output) -> Result<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: label.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// First line of stdout parsed as a pid, if any.
pub fn pid_from_stdout(output: &Output) -> Option<u32> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<u32>().ok())
        .and_then(crate::error::validate_pid_for_check)
}
