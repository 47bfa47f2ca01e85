//! The watchdog: keeps the target running.
//!
//! Lifecycle is `Starting -> Running -> ShuttingDown -> Exited`. While
//! running, every tick probes the target and relaunches it through the host's
//! spawn chain when it is judged dead. Ticks are bounded by a timeout and
//! isolated with `catch_unwind`, so neither a hung command nor a panic ends
//! the loop. The ways out are an operator stop request, a signal the policy
//! maps to shutdown, and losing the lock file to another process.

use crate::config::Config;
use crate::context::SupervisorContext;
use crate::error::Result;
use crate::layout::{self, Layout};
use crate::liveness::{Liveness, LivenessProbe};
use crate::lock::LockGuard;
use crate::signals::{SignalGuard, SignalPolicy};
use crate::state::{PidFile, Reading, StopRequest};
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Starting,
    Running,
    ShuttingDown,
    Exited,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Alive(Liveness),
    Relaunched {
        pid: Option<u32>,
        strategy: &'static str,
    },
    /// Nothing was started; the pid record is untouched.
    LaunchFailed { error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogStats {
    pub ticks: u64,
    pub relaunches: u64,
    pub consecutive_failures: u32,
}

/// Why the run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    StopRequested { requester: Option<u32> },
    Signal,
    /// The lock file was replaced or rewritten by someone else.
    LockLost { owner: Option<u32> },
}

/// Watchdog signal policy with the config's overrides applied.
pub fn signal_policy(config: &Config) -> SignalPolicy {
    SignalPolicy::watchdog_default().with_overrides(&config.signals)
}

pub struct Watchdog {
    ctx: SupervisorContext,
    layout: Layout,
    probe: LivenessProbe,
    pid_file: PidFile,
    stop: StopRequest,
    signal_policy: SignalPolicy,
    state: Mutex<WatchdogState>,
    stats: Mutex<WatchdogStats>,
}

impl Watchdog {
    pub fn new(ctx: SupervisorContext, layout: Layout) -> Self {
        let probe = LivenessProbe::new(
            ctx.host.clone(),
            ctx.paths.target_pid(),
            ctx.paths.heartbeat(),
            ctx.config.watchdog.heartbeat_threshold,
        );
        let signal_policy = signal_policy(&ctx.config);
        Self {
            pid_file: ctx.paths.target_pid(),
            stop: ctx.paths.stop_request(),
            probe,
            layout,
            signal_policy,
            ctx,
            state: Mutex::new(WatchdogState::Starting),
            stats: Mutex::new(WatchdogStats::default()),
        }
    }

    /// Replace the signal policy installed by [`Watchdog::run`].
    pub fn with_signal_policy(mut self, policy: SignalPolicy) -> Self {
        self.signal_policy = policy;
        self
    }

    pub fn state(&self) -> WatchdogState {
        *self.state.lock()
    }

    pub fn stats(&self) -> WatchdogStats {
        self.stats.lock().clone()
    }

    fn set_state(&self, state: WatchdogState) {
        let mut current = self.state.lock();
        tracing::debug!("Watchdog state {:?} -> {:?}", *current, state);
        *current = state;
    }

    /// Upper bound for one tick: a probe plus every spawn strategy.
    fn tick_timeout(&self) -> Duration {
        self.ctx.config.watchdog.command_timeout * 4
    }

    /// Probe the target and relaunch it if dead.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        self.stats.lock().ticks += 1;

        let liveness = self.probe.check().await;
        if liveness.is_alive() {
            tracing::debug!("Target is {}", liveness);
            return TickOutcome::Alive(liveness);
        }

        tracing::warn!("Target is {}; relaunching", liveness);
        self.relaunch().await
    }

    /// Launch the target once.
    ///
    /// A known pid replaces the record. An unknown pid removes it, so a
    /// recycled old pid cannot make a dead target look alive. A failure
    /// leaves the record alone.
    #[tracing::instrument(skip(self))]
    pub async fn relaunch(&self) -> TickOutcome {
        let launched = match layout::target_request(&self.ctx.config, &self.layout) {
            Ok(request) => self.ctx.host.spawn_detached(&request).await,
            Err(e) => Err(e),
        };

        match launched {
            Ok(handle) => {
                let record = match handle.pid {
                    Some(pid) => self.pid_file.write(pid),
                    None => self.pid_file.remove().map(|_| ()),
                };
                if let Err(e) = record {
                    tracing::error!(
                        "Failed to update {}: {}",
                        self.pid_file.path().display(),
                        e
                    );
                }

                let relaunches = {
                    let mut stats = self.stats.lock();
                    stats.relaunches += 1;
                    stats.consecutive_failures = 0;
                    stats.relaunches
                };
                tracing::info!(
                    "Target relaunched via {} (relaunch #{})",
                    handle.strategy,
                    relaunches
                );
                TickOutcome::Relaunched {
                    pid: handle.pid,
                    strategy: handle.strategy,
                }
            }
            Err(e) => {
                let failures = {
                    let mut stats = self.stats.lock();
                    stats.consecutive_failures += 1;
                    stats.consecutive_failures
                };
                tracing::error!(
                    "Relaunch failed ({} in a row), retrying next tick: {}",
                    failures,
                    e
                );
                TickOutcome::LaunchFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// One tick under a timeout and panic guard. `None` when the tick did
    /// not complete.
    async fn guarded_tick(&self) -> Option<TickOutcome> {
        let limit = self.tick_timeout();
        let result = AssertUnwindSafe(tokio::time::timeout(limit, self.tick()))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => {
                tracing::error!("Watchdog tick timed out after {:?}. Continuing...", limit);
                None
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!("Watchdog tick panicked: {}. Continuing...", panic_msg);
                None
            }
        }
    }

    fn take_stop_request(&self) -> Option<ShutdownReason> {
        let reading = self.stop.take()?;
        let requester = match reading {
            Reading::Value(pid) => Some(pid),
            Reading::Missing | Reading::Corrupt(_) => None,
        };
        Some(ShutdownReason::StopRequested { requester })
    }

    /// Install the signal policy, then [`supervise`](Self::supervise).
    pub async fn run(&self, lock: LockGuard, shutdown: CancellationToken) -> Result<ShutdownReason> {
        let _signals = self.install_signals(&shutdown)?;
        self.supervise(lock, shutdown).await
    }

    pub fn install_signals(&self, shutdown: &CancellationToken) -> Result<SignalGuard> {
        self.signal_policy.install(shutdown.clone())
    }

    /// Run until a stop request, a shutdown signal or loss of the lock.
    /// Signal handling must already be in place.
    ///
    /// `lock` is released on the way out. Always returns `Ok`; tick errors
    /// are logged, not propagated.
    pub async fn supervise(&self, mut lock: LockGuard, shutdown: CancellationToken) -> Result<ShutdownReason> {
        self.set_state(WatchdogState::Starting);

        match self.stop.clear() {
            Ok(true) => tracing::info!("Cleared stale stop request"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to clear stale stop request: {}", e),
        }

        tracing::info!(
            "Watchdog started (PID {}, tick {:?}, heartbeat threshold {:?})",
            std::process::id(),
            self.ctx.config.watchdog.tick_interval,
            self.ctx.config.watchdog.heartbeat_threshold
        );
        self.guarded_tick().await;
        self.set_state(WatchdogState::Running);

        let tick = self.ctx.config.watchdog.tick_interval;
        let poll = self.ctx.config.watchdog.stop_poll_interval;
        let max_jitter_ms = self.ctx.config.watchdog.tick_jitter.as_millis() as u64;

        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_poll = tokio::time::interval_at(Instant::now() + poll, poll);
        stop_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break ShutdownReason::Signal;
                }
                _ = stop_poll.tick() => {
                    if let Some(reason) = self.take_stop_request() {
                        break reason;
                    }
                    if !lock.still_owned() {
                        break ShutdownReason::LockLost { owner: lock.recorded_owner() };
                    }
                }
                _ = ticker.tick() => {
                    if max_jitter_ms > 0 {
                        let jitter_ms = {
                            let mut rng = rand::thread_rng();
                            rng.gen_range(0..=max_jitter_ms)
                        };
                        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    }
                    self.guarded_tick().await;
                }
            }
        };

        self.set_state(WatchdogState::ShuttingDown);
        match &reason {
            ShutdownReason::StopRequested {
                requester: Some(pid),
            } => tracing::info!("Stop requested by PID {}, shutting down", pid),
            ShutdownReason::StopRequested { requester: None } => {
                tracing::info!("Stop requested, shutting down")
            }
            ShutdownReason::Signal => tracing::info!("Shutdown signal received, shutting down"),
            ShutdownReason::LockLost { owner } => tracing::warn!(
                "Lock {} no longer names this watchdog (owner {:?}), shutting down",
                lock.path().display(),
                owner
            ),
        }

        lock.release();
        let stats = self.stats();
        tracing::info!(
            "Watchdog exiting after {} ticks and {} relaunches",
            stats.ticks,
            stats.relaunches
        );
        self.set_state(WatchdogState::Exited);
        Ok(reason)
    }
}
