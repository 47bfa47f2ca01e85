use std::io::{IsTerminal, Write};

/// Where command results go.
///
/// Commands report through this instead of printing. The roles started by
/// autostart or by another stage (`--hidden`) have no terminal, so they get
/// [`QuietOutput`] and only write to their log file.
pub trait UserOutput: Send + Sync {
    fn status(&self, message: &str);

    fn success(&self, message: &str);

    /// Something the operator should look at, e.g. a stale heartbeat.
    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Start a line that waits on the watchdog. End it with `end_wait`.
    fn begin_wait(&self, message: &str);

    fn end_wait(&self, result: &str);
}

/// Output for the operator-facing commands (`status`, `stop`, `beat`).
pub struct CliOutput {
    color: bool,
}

impl CliOutput {
    /// Color warnings and errors only when stderr is a terminal.
    pub fn detect() -> Self {
        Self {
            color: std::io::stderr().is_terminal(),
        }
    }

    fn paint(&self, ansi: &str, message: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", ansi, message)
        } else {
            message.to_string()
        }
    }
}

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", self.paint("33", message));
    }

    fn error(&self, message: &str) {
        eprintln!("{}", self.paint("31", message));
    }

    fn begin_wait(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn end_wait(&self, result: &str) {
        println!("{}", result);
    }
}

/// Output for hidden roles: nothing reaches a terminal.
pub struct QuietOutput;

impl UserOutput for QuietOutput {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn begin_wait(&self, _message: &str) {}
    fn end_wait(&self, _result: &str) {}
}

/// Output for a role started with or without `--hidden`.
pub fn for_role(hidden: bool) -> Box<dyn UserOutput> {
    if hidden {
        Box::new(QuietOutput)
    } else {
        Box::new(CliOutput::detect())
    }
}
