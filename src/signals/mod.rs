//! Signal handling policy.
//!
//! The supervisor does not rely on platform default dispositions. At startup
//! each role installs a [`SignalPolicy`]: a table mapping every signal kind it
//! cares about to either [`SignalAction::Ignore`] or
//! [`SignalAction::Shutdown`]. Installing a handler replaces the default
//! disposition, so an ignored `SIGTERM` no longer terminates the process.
//!
//! Shutdown is signalled through a [`CancellationToken`]; the owner of the
//! token decides what a graceful shutdown means (for the watchdog: release
//! the lock and exit 0).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM / console close
    Terminate,
    /// SIGHUP / system shutdown
    Hangup,
    /// SIGQUIT / Ctrl+Break
    Quit,
    /// SIGUSR1 (unix only)
    User1,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Hangup => "SIGHUP",
            SignalKind::Quit => "SIGQUIT",
            SignalKind::User1 => "SIGUSR1",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    /// Log and keep running.
    Ignore,
    /// Begin the graceful shutdown path.
    Shutdown,
}

/// Table of `{signal kind -> action}` installed once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalPolicy {
    table: BTreeMap<SignalKind, SignalAction>,
}

impl SignalPolicy {
    /// Empty policy: every signal keeps its platform default.
    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Watchdog policy: termination signals are ignored. The only way down is
    /// an explicit stop request.
    pub fn watchdog_default() -> Self {
        Self::empty()
            .with(SignalKind::Interrupt, SignalAction::Ignore)
            .with(SignalKind::Terminate, SignalAction::Ignore)
            .with(SignalKind::Hangup, SignalAction::Ignore)
            .with(SignalKind::Quit, SignalAction::Ignore)
    }

    /// Bootstrap policy: survive the grace period so the watchdog is
    /// established before this process goes away.
    pub fn bootstrap_default() -> Self {
        Self::empty()
            .with(SignalKind::Interrupt, SignalAction::Ignore)
            .with(SignalKind::Terminate, SignalAction::Ignore)
            .with(SignalKind::Hangup, SignalAction::Ignore)
    }

    pub fn with(mut self, kind: SignalKind, action: SignalAction) -> Self {
        self.table.insert(kind, action);
        self
    }

    /// Apply config overrides on top of this policy.
    pub fn with_overrides(mut self, overrides: &BTreeMap<SignalKind, SignalAction>) -> Self {
        for (kind, action) in overrides {
            self.table.insert(*kind, *action);
        }
        self
    }

    pub fn action(&self, kind: SignalKind) -> Option<SignalAction> {
        self.table.get(&kind).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (SignalKind, SignalAction)> + '_ {
        self.table.iter().map(|(k, a)| (*k, *a))
    }

    /// Apply the configured action for one delivered signal.
    ///
    /// Returns the action taken, or `None` when the kind is not in the table.
    pub fn dispatch(&self, kind: SignalKind, shutdown: &CancellationToken) -> Option<SignalAction> {
        let action = self.action(kind)?;
        match action {
            SignalAction::Ignore => {
                tracing::warn!("Ignoring {} - supervisor keeps running", kind);
            }
            SignalAction::Shutdown => {
                tracing::info!("Received {} - starting graceful shutdown", kind);
                shutdown.cancel();
            }
        }
        Some(action)
    }

    /// Register OS handlers for every entry and spawn a listener task per
    /// signal. Handlers are registered before this returns.
    pub fn install(&self, shutdown: CancellationToken) -> Result<SignalGuard> {
        let mut handles = Vec::new();
        for (kind, _) in self.entries() {
            match platform::listen(kind) {
                Ok(mut listener) => {
                    let policy = self.clone();
                    let token = shutdown.clone();
                    handles.push(tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                received = listener.recv() => {
                                    if received.is_none() {
                                        break;
                                    }
                                    policy.dispatch(kind, &token);
                                }
                            }
                        }
                    }));
                }
                Err(e) => {
                    tracing::warn!("Failed to install {} handler: {}", kind, e);
                }
            }
        }
        tracing::debug!(
            "Installed signal policy: {:?}",
            self.entries().collect::<Vec<_>>()
        );
        Ok(SignalGuard { handles })
    }
}

/// Keeps the listener tasks alive; aborts them on drop.
pub struct SignalGuard {
    handles: Vec<JoinHandle<()>>,
}

impl SignalGuard {
    pub fn listener_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(unix)]
mod platform {
    use super::{Error, Result, SignalKind};
    use tokio::signal::unix::{signal, Signal};

    pub struct Listener(Signal);

    impl Listener {
        pub async fn recv(&mut self) -> Option<()> {
            self.0.recv().await
        }
    }

    pub fn listen(kind: SignalKind) -> Result<Listener> {
        use tokio::signal::unix::SignalKind as Os;
        let os_kind = match kind {
            SignalKind::Interrupt => Os::interrupt(),
            SignalKind::Terminate => Os::terminate(),
            SignalKind::Hangup => Os::hangup(),
            SignalKind::Quit => Os::quit(),
            SignalKind::User1 => Os::user_defined1(),
        };
        signal(os_kind)
            .map(Listener)
            .map_err(|e| Error::Signal(format!("{}: {}", kind, e)))
    }
}

#[cfg(windows)]
mod platform {
    use super::{Error, Result, SignalKind};
    use tokio::signal::windows;

    pub enum Listener {
        CtrlC(windows::CtrlC),
        CtrlBreak(windows::CtrlBreak),
        CtrlClose(windows::CtrlClose),
        CtrlShutdown(windows::CtrlShutdown),
    }

    impl Listener {
        pub async fn recv(&mut self) -> Option<()> {
            match self {
                Listener::CtrlC(s) => s.recv().await,
                Listener::CtrlBreak(s) => s.recv().await,
                Listener::CtrlClose(s) => s.recv().await,
                Listener::CtrlShutdown(s) => s.recv().await,
            }
        }
    }

    pub fn listen(kind: SignalKind) -> Result<Listener> {
        let listener = match kind {
            SignalKind::Interrupt => windows::ctrl_c().map(Listener::CtrlC),
            SignalKind::Quit => windows::ctrl_break().map(Listener::CtrlBreak),
            SignalKind::Terminate => windows::ctrl_close().map(Listener::CtrlClose),
            SignalKind::Hangup => windows::ctrl_shutdown().map(Listener::CtrlShutdown),
            SignalKind::User1 => {
                return Err(Error::Signal(format!("{} is not available on Windows", kind)))
            }
        };
        listener.map_err(|e| Error::Signal(format!("{}: {}", kind, e)))
    }
}
