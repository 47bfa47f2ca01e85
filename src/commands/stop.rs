use crate::output::UserOutput;
use std::time::Duration;
use tokio::time::Instant;
use vigil::{Error, LockManager, SupervisorContext};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Write a stop request and wait for the watchdog to release its lock.
pub async fn run_stop(
    ctx: &SupervisorContext,
    timeout: Duration,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let lock = LockManager::new(&ctx.paths.lock_file, ctx.host.clone());

    let owner = match lock.recorded_owner() {
        Some(pid) if ctx.host.probe_process_alive(pid).await => pid,
        Some(pid) => {
            out.status(&format!(
                "No watchdog is running (stale lock names PID {})",
                pid
            ));
            return Ok(());
        }
        None => {
            out.status("No watchdog is running");
            return Ok(());
        }
    };

    ctx.paths.stop_request().request(std::process::id())?;
    tracing::debug!(
        "Stop request written to {}",
        ctx.paths.stop_file.display()
    );
    out.begin_wait(&format!("Stopping watchdog (PID {})...", owner));

    let deadline = Instant::now() + timeout;
    loop {
        let released = lock.recorded_owner() != Some(owner);
        if released || !ctx.host.probe_process_alive(owner).await {
            out.end_wait(" done");
            return Ok(());
        }
        if Instant::now() >= deadline {
            out.end_wait(" timed out");
            return Err(Error::StopTimeout(timeout).into());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
