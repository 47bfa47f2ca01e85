//! On-disk records shared between the supervisor roles and the target.
//!
//! Every record is a tiny text file holding a single integer:
//!
//! - heartbeat: epoch millis, written by the target
//! - target pid: written by the watchdog after each launch
//! - bootstrap alive: epoch millis, touched by the bootstrap stage
//! - stop request: pid of the `vigil stop` caller
//!
//! The lock file uses the same format as the pid record (see [`crate::lock`]).
//!
//! Contents that do not parse are reported as [`Reading::Corrupt`]; callers
//! treat that the same as a missing file.

mod records;

pub use records::{now_millis, PidFile, Reading, StopRequest, TimestampFile};
