#![allow(unused_assignments)]

//! # vigil
//!
//! A self-healing process supervisor for a single desktop or background
//! application.
//!
//! ## Stages
//!
//! - **Bootstrap** ([`bootstrap`]): started at login by an autostart entry.
//!   Re-registers autostart, launches the watchdog detached through a chain of
//!   spawn strategies, then exits after a grace period.
//! - **Watchdog** ([`watchdog`]): single instance per host (see [`lock`]).
//!   Every tick it probes the target ([`liveness`]) and relaunches it when the
//!   recorded pid is gone and the heartbeat is stale.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vigil::{Layout, LockManager, LockOutcome, Parser, SupervisorContext, Watchdog};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), vigil::Error> {
//! let (config, path) = Parser::new().load(None)?;
//! let layout = Layout::resolve(&config)?;
//! let ctx = SupervisorContext::native(config, path)?;
//!
//! let lock = LockManager::new(&ctx.paths.lock_file, ctx.host.clone());
//! if let LockOutcome::Acquired(guard) = lock.try_acquire().await? {
//!     Watchdog::new(ctx, layout)
//!         .run(guard, CancellationToken::new())
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Target contract
//!
//! The target is launched as `<target> <install_dir> [--hidden]`. It should
//! write the current epoch millis to the heartbeat file regularly; the
//! watchdog records the pid of every process it launches.

pub mod autostart;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod layout;
pub mod liveness;
pub mod lock;
pub mod platform;
pub mod signals;
pub mod spawn;
pub mod state;
pub mod watchdog;

// Re-export commonly used types
pub use autostart::{AutostartKind, AutostartRegistrar, AutostartReport};
pub use bootstrap::{Bootstrap, BootstrapReport};
pub use config::{Config, Parser};
pub use context::{SupervisorContext, SupervisorPaths};
pub use error::{Error, Result};
pub use layout::{Layout, LayoutKind};
pub use liveness::{Liveness, LivenessProbe};
pub use lock::{LockGuard, LockManager, LockOutcome};
pub use platform::{HostOs, PlatformKind};
pub use signals::{SignalAction, SignalKind, SignalPolicy};
pub use spawn::{LaunchRequest, ProcessHandle, SpawnStrategy, SpawnStrategyChain};
pub use watchdog::{ShutdownReason, TickOutcome, Watchdog, WatchdogState};
