mod cli;
mod commands;
mod output;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use std::path::Path;
use vigil::{Config, Error as VigilError, Parser as ConfigParser, SupervisorContext};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(vigil_error) = e.downcast_ref::<VigilError>() {
            eprintln!("Error: {}", vigil_error);
            if let Some(suggestion) = vigil_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Bootstrap);

    // ── Commands that need no config ─────────────────────────────────
    if let Commands::Completions { shell } = command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    // ── Load config ─────────────────────────────────────────────────
    // The long-running roles must come up even with a broken config file;
    // the error is logged once tracing is up.
    let long_running = matches!(command, Commands::Bootstrap | Commands::Watchdog);
    let (config, config_path, config_error) = match ConfigParser::new().load(cli.config.as_deref()) {
        Ok((config, path)) => (config, path, None),
        Err(e) if long_running => (Config::default(), cli.config.clone(), Some(e)),
        Err(e) => return Err(e.into()),
    };

    let ctx = match SupervisorContext::native(config, config_path) {
        Ok(ctx) => ctx,
        Err(e) if matches!(command, Commands::Bootstrap) => {
            // Bootstrap always exits 0; the autostart entry will run it again.
            eprintln!("Error: {}", e.with_suggestion());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let role = command.role();
    let log_file = cli.hidden.then(|| ctx.paths.log_file(role));
    init_tracing(log_file.as_deref(), long_running);

    if let Some(e) = config_error {
        tracing::warn!("Config invalid ({}), continuing with defaults", e);
    }
    tracing::debug!("Starting {} with {:?}", role, ctx);

    let sink = output::for_role(cli.hidden);
    let out = &*sink;

    // ── Dispatch ────────────────────────────────────────────────────
    match command {
        Commands::Bootstrap => {
            if let Err(e) = commands::run_bootstrap(ctx, out).await {
                tracing::error!("Bootstrap failed: {:#}", e);
            }
            Ok(())
        }
        Commands::Watchdog => commands::run_watchdog(ctx, out).await,
        Commands::Stop { timeout } => commands::run_stop(&ctx, timeout, out).await,
        Commands::Status { json } => commands::run_status(&ctx, json, out).await,
        Commands::Beat => commands::run_beat(&ctx, out),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Hidden roles log to their file; everything else logs to stderr. Short
/// interactive commands default to `warn` so their output stays readable.
fn init_tracing(log_file: Option<&Path>, long_running: bool) {
    let default_level = if long_running || log_file.is_some() {
        "info"
    } else {
        "warn"
    };
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
    };

    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!(
                    "Warning: cannot open log file {} ({}), logging to stderr",
                    path.display(),
                    e
                );
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}
