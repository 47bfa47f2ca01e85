mod beat;
mod bootstrap;
mod status;
mod stop;
mod watchdog;

pub use beat::run_beat;
pub use bootstrap::run_bootstrap;
pub use status::run_status;
pub use stop::run_stop;
pub use watchdog::run_watchdog;
