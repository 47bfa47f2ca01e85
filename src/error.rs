// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(vigil::config::error),
        help("Check the YAML file passed with --config or VIGIL_CONFIG")
    )]
    Config(String),

    #[error("Filesystem error: {0}")]
    #[diagnostic(code(vigil::filesystem::error))]
    Filesystem(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Spawn strategy '{strategy}' failed: {reason}")]
    #[diagnostic(
        code(vigil::spawn::strategy_failed),
        help("Check that the command exists and is executable")
    )]
    SpawnFailed {
        strategy: &'static str,
        reason: String,
    },

    #[error("All spawn strategies failed for '{program}':\n{}", .attempts.iter().map(|a| format!("  - {}", a)).collect::<Vec<_>>().join("\n"))]
    #[diagnostic(
        code(vigil::spawn::exhausted),
        help("Verify the target path in the config and that the scratch directory is writable")
    )]
    SpawnExhausted {
        program: String,
        attempts: Vec<String>,
    },

    #[error("Autostart '{kind}' failed: {reason}")]
    #[diagnostic(code(vigil::autostart::failed))]
    Autostart { kind: String, reason: String },

    #[error("Command '{command}' timed out after {}s", .timeout.as_secs())]
    #[diagnostic(
        code(vigil::command::timeout),
        help("The external command is hung; it was killed and will be retried")
    )]
    Timeout { command: String, timeout: Duration },

    #[error("Command '{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Signal handling error: {0}")]
    Signal(String),

    #[error("Watchdog did not stop within {}s", .0.as_secs())]
    #[diagnostic(
        code(vigil::stop::timeout),
        help("Check `vigil status`; the watchdog polls for stop requests once per poll interval")
    )]
    StopTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Config(_) | Error::Yaml(_) => Some(
                "Fix the config file or remove it to run with defaults".to_string(),
            ),
            Error::SpawnExhausted { program, .. } => Some(format!(
                "Check that '{}' exists and is executable. The watchdog retries on its next tick.",
                program
            )),
            Error::StopTimeout(_) => Some(
                "Run `vigil status` to see whether the watchdog is still alive".to_string(),
            ),
            Error::Timeout { command, .. } => Some(format!(
                "'{}' did not answer in time; make sure it is not waiting for input",
                command
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Checks that a PID can be probed safely.
///
/// Returns `None` for PID 0 (process group) and for values above `i32::MAX`,
/// which cannot be converted to a platform pid without wrapping.
pub fn validate_pid_for_check(pid: u32) -> Option<u32> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(pid)
}

/// Parses the contents of a single-integer pid file.
pub fn parse_pid(contents: &str) -> Result<u32> {
    let trimmed = contents.trim();
    let pid = trimmed
        .parse::<u32>()
        .map_err(|e| Error::Filesystem(format!("not a pid: '{}' ({})", trimmed, e)))?;
    validate_pid_for_check(pid).ok_or_else(|| Error::InvalidPid {
        pid,
        reason: "PID must be between 1 and i32::MAX".to_string(),
    })
}
