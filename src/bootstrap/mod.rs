//! Bootstrap stage: runs once per login.
//!
//! Resolves the layout, re-registers autostart, starts the watchdog detached
//! and then lingers for a grace period, touching its alive file, so the
//! watchdog has time to take the lock. It always exits 0.

use crate::autostart::{AutostartRegistrar, AutostartReport, AutostartSpec};
use crate::context::SupervisorContext;
use crate::error::Result;
use crate::layout::{self, Layout, WatchdogLauncher};
use crate::signals::SignalPolicy;
use crate::spawn::{LaunchRequest, ProcessHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What a bootstrap run did.
#[derive(Debug)]
pub struct BootstrapReport {
    pub layout: Layout,
    /// `None` when autostart registration is disabled.
    pub autostart: Option<AutostartReport>,
    pub launcher: Option<WatchdogLauncher>,
    pub watchdog: std::result::Result<ProcessHandle, String>,
}

pub struct Bootstrap {
    ctx: SupervisorContext,
    signal_policy: SignalPolicy,
}

impl Bootstrap {
    pub fn new(ctx: SupervisorContext) -> Self {
        Self {
            ctx,
            signal_policy: SignalPolicy::bootstrap_default(),
        }
    }

    pub fn with_signal_policy(mut self, policy: SignalPolicy) -> Self {
        self.signal_policy = policy;
        self
    }

    /// `vigil bootstrap --hidden`, plus `--config` when one was given.
    pub fn autostart_command(&self, layout: &Layout) -> LaunchRequest {
        let mut command = LaunchRequest::new(&layout.exe).args(["bootstrap", "--hidden"]);
        if let Some(path) = &self.ctx.config_path {
            command = command
                .arg("--config")
                .arg(path.to_string_lossy().into_owned());
        }
        command
    }

    pub fn autostart_spec(&self, layout: &Layout) -> AutostartSpec {
        AutostartSpec::new(
            self.ctx.app_name(),
            &self.ctx.paths.autostart_home,
            &self.ctx.paths.log_dir,
            self.autostart_command(layout),
        )
    }

    /// The vigil binary if it can be found, else a synthesized fallback
    /// script that relaunches the target on its own.
    pub fn resolve_launcher(&self, layout: &Layout) -> Result<WatchdogLauncher> {
        if let Some(binary) = layout::find_watchdog_binary(layout) {
            return Ok(WatchdogLauncher::Binary(binary));
        }

        tracing::warn!(
            "No vigil binary found near {}; falling back to a generated watchdog",
            layout.install_dir.display()
        );
        let target = layout::target_request(&self.ctx.config, layout)?;
        let script = layout::synthesize_watchdog(
            &self.ctx.paths.scratch_dir,
            self.ctx.app_name(),
            &target,
            &self.ctx.paths.target_pid_file,
            self.ctx.config.watchdog.tick_interval,
        )?;
        Ok(WatchdogLauncher::Synthesized(script))
    }

    /// Steps before the grace period: autostart and watchdog launch.
    ///
    /// Every step is attempted; failures end up in the report.
    pub async fn launch(&self, layout: Layout) -> BootstrapReport {
        tracing::info!(
            "Bootstrapping {} ({:?} layout, install dir {})",
            self.ctx.app_name(),
            layout.kind,
            layout.install_dir.display()
        );

        let autostart = if self.ctx.config.bootstrap.autostart {
            let registrar =
                AutostartRegistrar::for_host(self.ctx.host.clone(), &self.autostart_spec(&layout));
            Some(registrar.install().await)
        } else {
            tracing::info!("Autostart registration disabled");
            None
        };

        let (launcher, watchdog) = match self.resolve_launcher(&layout) {
            Ok(launcher) => {
                let request = launcher.request(self.ctx.config_path.as_deref());
                let result = self
                    .ctx
                    .host
                    .spawn_detached(&request)
                    .await
                    .map_err(|e| e.to_string());
                (Some(launcher), result)
            }
            Err(e) => (None, Err(e.to_string())),
        };

        match &watchdog {
            Ok(handle) => tracing::info!(
                "Watchdog launched via {} strategy{}",
                handle.strategy,
                handle
                    .pid
                    .map(|pid| format!(" (PID {})", pid))
                    .unwrap_or_default()
            ),
            Err(e) => tracing::error!("Failed to launch watchdog: {}", e),
        }

        BootstrapReport {
            layout,
            autostart,
            launcher,
            watchdog,
        }
    }

    /// Touch the alive file now and every `alive_interval` until the grace
    /// period ends or `shutdown` fires.
    pub async fn linger(&self, shutdown: &CancellationToken) {
        let alive = self.ctx.paths.bootstrap_alive();
        let grace = self.ctx.config.bootstrap.grace_period;
        let every = self.ctx.config.bootstrap.alive_interval;
        let deadline = Instant::now() + grace;

        let touch = || {
            if let Err(e) = alive.touch() {
                tracing::warn!("Failed to touch {}: {}", alive.path().display(), e);
            }
        };
        touch();

        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = shutdown.cancelled() => {
                    tracing::info!("Bootstrap interrupted before the grace period ended");
                    break;
                }
                _ = ticker.tick() => touch(),
            }
        }
    }

    /// Full bootstrap: launch, then linger for the grace period.
    pub async fn run(&self, layout: Layout, shutdown: CancellationToken) -> BootstrapReport {
        let _signals = match self.signal_policy.install(shutdown.clone()) {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("Signal policy not installed: {}", e);
                None
            }
        };

        let report = self.launch(layout).await;
        self.linger(&shutdown).await;
        tracing::info!(
            "Bootstrap finished after {:?} grace period",
            self.ctx.config.bootstrap.grace_period
        );
        report
    }
}
