//! Configuration parsing and types.
//!
//! - `types` - Core config structure (`Config`, `TargetConfig`, `WatchdogConfig`, ...)
//! - `duration` - Human-readable duration strings ("30s", "2m")
//! - `parser` - YAML config discovery and loading

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;
