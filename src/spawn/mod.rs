//! Ordered fallback chain of spawn strategies.
//!
//! Launching a detached process fails in different ways on different hosts
//! (missing exec bit, scripts without a shebang, PATH-only commands,
//! restrictive parents). [`SpawnStrategyChain`] tries a fixed list of
//! [`SpawnStrategy`] implementations strictly in order and stops at the first
//! success.
//!
//! A strategy that may already have started a process must report success
//! (with `pid: None` if it cannot tell) rather than an error, so that the chain
//! never starts a second copy.

mod direct;
mod script;
mod shell;

pub use direct::DirectSpawn;
pub use script::ScriptSpawn;
pub use shell::ShellSpawn;

use crate::error::{Error, Result};
use crate::platform::PlatformKind;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program followed by its arguments, as plain strings.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// The command line quoted for `/bin/sh`.
    pub fn shell_line(&self) -> String {
        self.argv()
            .into_iter()
            .map(|part| shell_escape::unix::escape(part.into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The command line quoted for `cmd.exe`.
    pub fn batch_line(&self) -> String {
        self.argv()
            .into_iter()
            .map(|part| shell_escape::windows::escape(part.into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LaunchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shell_line())
    }
}

/// Result of a successful spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    /// `None` when the strategy started something but could not learn its pid.
    pub pid: Option<u32>,
    /// Name of the strategy that succeeded.
    pub strategy: &'static str,
}

#[async_trait]
pub trait SpawnStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy is usable on the given platform.
    fn applies_to(&self, platform: PlatformKind) -> bool;

    /// Start the process detached from the caller.
    async fn spawn(&self, request: &LaunchRequest) -> Result<ProcessHandle>;
}

/// Settings shared by the built-in strategies.
#[derive(Debug, Clone)]
pub struct SpawnSettings {
    pub scratch_dir: PathBuf,
    pub command_timeout: Duration,
}

impl SpawnSettings {
    pub fn new(scratch_dir: impl AsRef<Path>, command_timeout: Duration) -> Self {
        Self {
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
            command_timeout,
        }
    }
}

/// Ordered list of strategies, immutable once built.
#[derive(Clone)]
pub struct SpawnStrategyChain {
    platform: PlatformKind,
    strategies: Vec<Arc<dyn SpawnStrategy>>,
}

impl SpawnStrategyChain {
    pub fn new(platform: PlatformKind) -> Self {
        Self {
            platform,
            strategies: Vec::new(),
        }
    }

    /// Direct, then shell-wrapped, then generated script.
    pub fn standard(platform: PlatformKind, settings: &SpawnSettings) -> Self {
        Self::new(platform)
            .with(DirectSpawn::new())
            .with(ShellSpawn::new(settings.command_timeout))
            .with(ScriptSpawn::new(
                settings.scratch_dir.clone(),
                settings.command_timeout,
            ))
    }

    /// Append a strategy at the lowest priority.
    pub fn with(mut self, strategy: impl SpawnStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn platform(&self) -> PlatformKind {
        self.platform
    }

    /// Names of the strategies that will be tried, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.applicable().map(|s| s.name()).collect()
    }

    fn applicable(&self) -> impl Iterator<Item = &Arc<dyn SpawnStrategy>> + '_ {
        let platform = self.platform;
        self.strategies
            .iter()
            .filter(move |s| s.applies_to(platform))
    }

    /// Try each applicable strategy in order; the first success wins.
    ///
    /// When every strategy fails the error lists each attempt.
    pub async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let mut attempts = Vec::new();

        for strategy in self.applicable() {
            let span = tracing::info_span!("spawn", strategy = strategy.name());
            match strategy.spawn(request).instrument(span).await {
                Ok(handle) => {
                    match handle.pid {
                        Some(pid) => tracing::info!(
                            "Launched '{}' via {} strategy (PID {})",
                            request.program.display(),
                            handle.strategy,
                            pid
                        ),
                        None => tracing::info!(
                            "Launched '{}' via {} strategy (PID unknown)",
                            request.program.display(),
                            handle.strategy
                        ),
                    }
                    return Ok(handle);
                }
                Err(e) => {
                    tracing::warn!(
                        "Spawn strategy '{}' failed for '{}': {}",
                        strategy.name(),
                        request.program.display(),
                        e
                    );
                    attempts.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        if attempts.is_empty() {
            attempts.push(format!("no spawn strategy applies to {}", self.platform));
        }

        Err(Error::SpawnExhausted {
            program: request.program.display().to_string(),
            attempts,
        })
    }
}

impl fmt::Debug for SpawnStrategyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnStrategyChain")
            .field("platform", &self.platform)
            .field("strategies", &self.names())
            .finish()
    }
}
