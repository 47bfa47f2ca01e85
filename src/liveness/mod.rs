//! Target liveness: pid probe first, heartbeat freshness second.
//!
//! A live target-pid record is authoritative; a stale heartbeat never causes a
//! relaunch while the recorded pid is still running. Corrupt records count as
//! missing.

use crate::platform::HostOs;
use crate::state::{now_millis, PidFile, Reading, TimestampFile};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Why the target was judged dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DeadReason {
    /// No pid record and no heartbeat.
    NoRecords,
    /// Heartbeat present but older than the threshold.
    StaleHeartbeat {
        #[serde(with = "crate::config::duration_str")]
        age: Duration,
    },
    /// Heartbeat unreadable, non-numeric, or implausibly far in the future.
    CorruptHeartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Liveness {
    AliveByPid { pid: u32 },
    AliveByHeartbeat {
        #[serde(with = "crate::config::duration_str")]
        age: Duration,
    },
    Dead { cause: DeadReason },
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        !matches!(self, Liveness::Dead { .. })
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::AliveByPid { pid } => write!(f, "alive (PID {} running)", pid),
            Liveness::AliveByHeartbeat { age } => {
                write!(f, "alive (heartbeat {}s old)", age.as_secs())
            }
            Liveness::Dead { cause } => match cause {
                DeadReason::NoRecords => write!(f, "dead (no pid and no heartbeat)"),
                DeadReason::StaleHeartbeat { age } => {
                    write!(f, "dead (heartbeat {}s old)", age.as_secs())
                }
                DeadReason::CorruptHeartbeat => write!(f, "dead (heartbeat corrupt)"),
            },
        }
    }
}

/// Heartbeat freshness at `now_millis`.
///
/// `Ok(age)` when fresh, `Err(reason)` otherwise. A timestamp more than one
/// threshold ahead of `now` is treated as corrupt rather than fresh forever.
pub fn classify_heartbeat(
    reading: Reading<i64>,
    now_millis: i64,
    threshold: Duration,
) -> Result<Duration, DeadReason> {
    let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
    match reading {
        Reading::Missing => Err(DeadReason::NoRecords),
        Reading::Corrupt(_) => Err(DeadReason::CorruptHeartbeat),
        Reading::Value(stamp) => {
            let age_ms = now_millis.saturating_sub(stamp);
            if age_ms < 0 {
                if age_ms.saturating_neg() > threshold_ms {
                    return Err(DeadReason::CorruptHeartbeat);
                }
                return Ok(Duration::ZERO);
            }
            let age = Duration::from_millis(age_ms as u64);
            if age_ms <= threshold_ms {
                Ok(age)
            } else {
                Err(DeadReason::StaleHeartbeat { age })
            }
        }
    }
}

pub struct LivenessProbe {
    host: Arc<dyn HostOs>,
    pid_file: PidFile,
    heartbeat: TimestampFile,
    threshold: Duration,
}

impl LivenessProbe {
    pub fn new(
        host: Arc<dyn HostOs>,
        pid_file: PidFile,
        heartbeat: TimestampFile,
        threshold: Duration,
    ) -> Self {
        Self {
            host,
            pid_file,
            heartbeat,
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub async fn check(&self) -> Liveness {
        self.check_at(now_millis()).await
    }

    /// Liveness as of `now_millis`.
    pub async fn check_at(&self, now_millis: i64) -> Liveness {
        match self.pid_file.read() {
            Reading::Value(pid) => {
                if self.host.probe_process_alive(pid).await {
                    return Liveness::AliveByPid { pid };
                }
                tracing::debug!("Recorded target PID {} is not running", pid);
            }
            Reading::Corrupt(reason) => {
                tracing::debug!(
                    "Ignoring corrupt pid record {}: {}",
                    self.pid_file.path().display(),
                    reason
                );
            }
            Reading::Missing => {}
        }

        match classify_heartbeat(self.heartbeat.read(), now_millis, self.threshold) {
            Ok(age) => Liveness::AliveByHeartbeat { age },
            Err(cause) => Liveness::Dead { cause },
        }
    }

    pub async fn is_alive(&self) -> bool {
        self.check().await.is_alive()
    }
}
