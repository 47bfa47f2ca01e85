use crate::output::UserOutput;
use serde::Serialize;
use vigil::liveness::{Liveness, LivenessProbe};
use vigil::state::now_millis;
use vigil::{PlatformKind, SupervisorContext, SupervisorPaths};

#[derive(Debug, Serialize)]
struct StatusReport {
    app_name: String,
    platform: PlatformKind,
    watchdog_pid: Option<u32>,
    watchdog_running: bool,
    target_pid: Option<u32>,
    target_running: bool,
    heartbeat_age_secs: Option<i64>,
    bootstrap_alive_age_secs: Option<i64>,
    liveness: Liveness,
    paths: SupervisorPaths,
}

fn age_secs(stamp: Option<i64>, now: i64) -> Option<i64> {
    stamp.map(|millis| now.saturating_sub(millis) / 1000)
}

async fn collect_status(ctx: &SupervisorContext) -> StatusReport {
    let host = &ctx.host;
    let now = now_millis();

    let watchdog_pid = vigil::state::PidFile::new(&ctx.paths.lock_file).read().value();
    let watchdog_running = match watchdog_pid {
        Some(pid) => host.probe_process_alive(pid).await,
        None => false,
    };

    let target_pid = ctx.paths.target_pid().read().value();
    let target_running = match target_pid {
        Some(pid) => host.probe_process_alive(pid).await,
        None => false,
    };

    let probe = LivenessProbe::new(
        host.clone(),
        ctx.paths.target_pid(),
        ctx.paths.heartbeat(),
        ctx.config.watchdog.heartbeat_threshold,
    );

    StatusReport {
        app_name: ctx.app_name().to_string(),
        platform: host.platform(),
        watchdog_pid,
        watchdog_running,
        target_pid,
        target_running,
        heartbeat_age_secs: age_secs(ctx.paths.heartbeat().read().value(), now),
        bootstrap_alive_age_secs: age_secs(ctx.paths.bootstrap_alive().read().value(), now),
        liveness: probe.check_at(now).await,
        paths: ctx.paths.clone(),
    }
}

fn describe_pid(pid: Option<u32>, running: bool) -> String {
    match (pid, running) {
        (Some(pid), true) => format!("PID {} (running)", pid),
        (Some(pid), false) => format!("PID {} (not running)", pid),
        (None, _) => "none".to_string(),
    }
}

fn describe_age(age: Option<i64>) -> String {
    match age {
        Some(secs) => format!("{}s ago", secs),
        None => "never".to_string(),
    }
}

pub async fn run_status(ctx: &SupervisorContext, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let report = collect_status(ctx).await;

    if json {
        out.status(&serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    out.status(&format!("{} status ({})", report.app_name, report.platform));
    out.status(&format!("{:-<50}", ""));
    out.status(&format!(
        "  Watchdog:   {}",
        describe_pid(report.watchdog_pid, report.watchdog_running)
    ));
    out.status(&format!(
        "  Target:     {}",
        describe_pid(report.target_pid, report.target_running)
    ));
    out.status(&format!("  Heartbeat:  {}", describe_age(report.heartbeat_age_secs)));
    out.status(&format!(
        "  Bootstrap:  {}",
        describe_age(report.bootstrap_alive_age_secs)
    ));

    if report.liveness.is_alive() {
        out.success(&format!("  Verdict:    {}", report.liveness));
    } else {
        out.warning(&format!("  Verdict:    {}", report.liveness));
    }
    if !report.watchdog_running {
        out.warning("  No watchdog is running. Start one with `vigil bootstrap`.");
    }
    Ok(())
}
