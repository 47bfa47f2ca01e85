use crate::output::UserOutput;
use tokio_util::sync::CancellationToken;
use vigil::{Bootstrap, Layout, SupervisorContext};

pub async fn run_bootstrap(ctx: SupervisorContext, out: &dyn UserOutput) -> anyhow::Result<()> {
    let layout = Layout::detect(&ctx.config);
    let grace = ctx.config.bootstrap.grace_period;

    out.status(&format!(
        "Bootstrapping {} from {}",
        ctx.app_name(),
        layout.install_dir.display()
    ));

    let report = Bootstrap::new(ctx).run(layout, CancellationToken::new()).await;

    if let Some(autostart) = &report.autostart {
        for kind in autostart.installed() {
            out.success(&format!("  + autostart {}", kind));
        }
        for failure in autostart.failures() {
            out.warning(&format!(
                "  x autostart {}: {}",
                failure.kind,
                failure.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    match &report.watchdog {
        Ok(handle) => out.success(&format!(
            "Watchdog launched via {} strategy{}",
            handle.strategy,
            handle
                .pid
                .map(|pid| format!(" (PID {})", pid))
                .unwrap_or_default()
        )),
        Err(e) => out.error(&format!("Watchdog launch failed: {}", e)),
    }
    out.status(&format!("Bootstrap done after {:?} grace period", grace));

    Ok(())
}
