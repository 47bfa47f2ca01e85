use crate::output::UserOutput;
use tokio_util::sync::CancellationToken;
use vigil::{watchdog, Layout, LockManager, ShutdownReason, SupervisorContext, Watchdog};

/// Run the watchdog in the foreground. Exits the process with code 0 when
/// another watchdog already owns the lock.
pub async fn run_watchdog(ctx: SupervisorContext, out: &dyn UserOutput) -> anyhow::Result<()> {
    // Signals first: a SIGTERM during layout detection or lock acquisition
    // must not take the default action.
    let shutdown = CancellationToken::new();
    let _signals = watchdog::signal_policy(&ctx.config).install(shutdown.clone())?;

    let layout = Layout::detect(&ctx.config);
    let lock = LockManager::new(&ctx.paths.lock_file, ctx.host.clone());
    let guard = lock.acquire_or_exit().await?;

    out.status(&format!(
        "Watchdog for {} running as PID {} (lock {})",
        ctx.app_name(),
        std::process::id(),
        guard.path().display()
    ));

    let watchdog = Watchdog::new(ctx, layout);
    let reason = watchdog.supervise(guard, shutdown).await?;
    let stats = watchdog.stats();

    match reason {
        ShutdownReason::StopRequested { .. } => out.success(&format!(
            "Watchdog stopped on request ({} relaunches)",
            stats.relaunches
        )),
        ShutdownReason::Signal => out.success(&format!(
            "Watchdog stopped by signal ({} relaunches)",
            stats.relaunches
        )),
        ShutdownReason::LockLost { owner } => out.warning(&format!(
            "Watchdog stopped: lock taken over by {} ({} relaunches)",
            owner.map_or_else(|| "an unknown process".to_string(), |pid| format!("PID {}", pid)),
            stats.relaunches
        )),
    }
    Ok(())
}
