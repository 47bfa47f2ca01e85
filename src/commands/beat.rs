use crate::output::UserOutput;
use vigil::SupervisorContext;

/// Write the heartbeat on behalf of a target that cannot do it itself.
pub fn run_beat(ctx: &SupervisorContext, out: &dyn UserOutput) -> anyhow::Result<()> {
    let heartbeat = ctx.paths.heartbeat();
    let millis = heartbeat.touch()?;
    tracing::debug!("Heartbeat {} written to {}", millis, heartbeat.path().display());
    out.success(&format!("Heartbeat written to {}", heartbeat.path().display()));
    Ok(())
}
