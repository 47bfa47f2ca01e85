use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "vigil - keep one application running across crashes, freezes and reboots")]
pub struct Cli {
    /// Config file path (defaults to <config dir>/vigil/vigil.yaml)
    #[arg(short, long, global = true, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log only to the role's log file (used by autostart entries)
    #[arg(long, global = true)]
    pub hidden: bool,

    /// Defaults to `bootstrap` so login items without arguments still work
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register autostart, launch the watchdog, then exit after the grace period
    Bootstrap,
    /// Run the watchdog loop (exits quietly if one is already running)
    Watchdog,
    /// Ask the running watchdog to shut down
    Stop {
        /// How long to wait for the watchdog to release its lock
        #[arg(long, default_value = "10s", value_parser = parse_timeout)]
        timeout: std::time::Duration,
    },
    /// Show lock owner, target pid, heartbeat age and liveness
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the heartbeat file now (for script targets)
    Beat,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Role name used for the log file.
    pub fn role(&self) -> &'static str {
        match self {
            Commands::Bootstrap => "bootstrap",
            Commands::Watchdog => "watchdog",
            Commands::Stop { .. } => "stop",
            Commands::Status { .. } => "status",
            Commands::Beat => "beat",
            Commands::Completions { .. } => "completions",
        }
    }
}

fn parse_timeout(value: &str) -> Result<std::time::Duration, String> {
    vigil::config::parse_duration_string(value)
        .ok_or_else(|| format!("invalid duration '{}' (try \"10s\" or \"1m\")", value))
}
