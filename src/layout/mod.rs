//! Where things are installed.
//!
//! The supervisor runs either from an installed layout (the binary sits next
//! to the target) or from a development build (`target/debug` or
//! `target/release` inside a project). The layout decides where the target
//! and the watchdog executable are searched for.

use crate::config::{format_duration, Config};
use crate::error::{Error, Result};
use crate::spawn::LaunchRequest;
use serde::Serialize;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Name of the supervisor binary.
pub const SUPERVISOR_BIN: &str = "vigil";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Installed,
    Development,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub kind: LayoutKind,
    /// The running executable.
    pub exe: PathBuf,
    /// Directory the target and its siblings are searched in.
    pub install_dir: PathBuf,
}

impl Layout {
    /// Resolve from the running executable, honouring `target.install_dir`.
    pub fn resolve(config: &Config) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            Error::Filesystem(format!("Cannot determine the current executable: {}", e))
        })?;
        Ok(Self::from_exe(&exe, config.target.install_dir.as_deref()))
    }

    /// Like [`Layout::resolve`], but an unknown executable degrades to an
    /// installed layout rooted at `target.install_dir` or the working dir.
    /// The watchdog search then falls through to the candidates and, failing
    /// those, the synthesized script.
    pub fn detect(config: &Config) -> Self {
        match Self::resolve(config) {
            Ok(layout) => layout,
            Err(e) => {
                tracing::warn!("{}; using a fallback layout", e);
                let install_dir = config
                    .target
                    .install_dir
                    .clone()
                    .or_else(|| std::env::current_dir().ok())
                    .unwrap_or_else(|| PathBuf::from("."));
                Self {
                    kind: LayoutKind::Installed,
                    exe: PathBuf::new(),
                    install_dir,
                }
            }
        }
    }

    /// Classify an executable path.
    ///
    /// A binary under `<project>/target/{debug,release}` is a development
    /// build whose install dir is `<project>`; anything else is installed
    /// next to the binary.
    pub fn from_exe(exe: &Path, install_override: Option<&Path>) -> Self {
        let parent = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        let project_root = development_root(&parent);

        let kind = if project_root.is_some() {
            LayoutKind::Development
        } else {
            LayoutKind::Installed
        };
        let install_dir = install_override
            .map(Path::to_path_buf)
            .or(project_root)
            .unwrap_or(parent);

        Self {
            kind,
            exe: exe.to_path_buf(),
            install_dir,
        }
    }

    /// Places an executable called `name` may live, most specific first.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let file = format!("{}{}", name, std::env::consts::EXE_SUFFIX);
        let dir = &self.install_dir;
        let mut candidates = vec![
            dir.join(&file),
            dir.join("bin").join(&file),
            dir.join("..").join(&file),
            dir.join("resources").join(&file),
            dir.join("Resources").join(&file),
            dir.join("MacOS").join(&file),
        ];
        if self.kind == LayoutKind::Development {
            candidates.push(dir.join("target").join("release").join(&file));
            candidates.push(dir.join("target").join("debug").join(&file));
        }
        candidates
    }

    /// First existing candidate for `name`.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.candidates(name).into_iter().find(|p| p.is_file())
    }
}

/// `<project>` when `dir` is `<project>/target/{debug,release}`.
fn development_root(dir: &Path) -> Option<PathBuf> {
    let mut components: Vec<Component<'_>> = dir.components().collect();
    let profile = components.pop()?;
    let target = components.pop()?;
    let is_profile = matches!(profile.as_os_str().to_str(), Some("debug") | Some("release"));
    if is_profile && target.as_os_str() == "target" {
        Some(components.iter().collect())
    } else {
        None
    }
}

/// `<target> <install_dir> [hidden_flag]`.
pub fn target_request(config: &Config, layout: &Layout) -> Result<LaunchRequest> {
    let program = match &config.target.command {
        Some(command) => command.clone(),
        None => layout.find(&config.app_name).ok_or_else(|| {
            Error::Config(format!(
                "Target '{}' not found under {} (set target.command)",
                config.app_name,
                layout.install_dir.display()
            ))
        })?,
    };

    let mut request = LaunchRequest::new(program)
        .arg(layout.install_dir.to_string_lossy().into_owned())
        .cwd(&layout.install_dir);
    if let Some(flag) = &config.target.hidden_flag {
        request = request.arg(flag.clone());
    }
    Ok(request)
}

/// How the bootstrap will start the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogLauncher {
    /// A vigil binary, run as `vigil watchdog --hidden`.
    Binary(PathBuf),
    /// A generated fallback script.
    Synthesized(PathBuf),
}

impl WatchdogLauncher {
    pub fn request(&self, config_path: Option<&Path>) -> LaunchRequest {
        match self {
            WatchdogLauncher::Binary(exe) => {
                let mut request = LaunchRequest::new(exe).args(["watchdog", "--hidden"]);
                if let Some(path) = config_path {
                    request = request
                        .arg("--config")
                        .arg(path.to_string_lossy().into_owned());
                }
                request
            }
            WatchdogLauncher::Synthesized(script) => {
                if cfg!(windows) {
                    LaunchRequest::new("cmd.exe")
                        .arg("/C")
                        .arg(script.to_string_lossy().into_owned())
                } else {
                    LaunchRequest::new("/bin/sh").arg(script.to_string_lossy().into_owned())
                }
            }
        }
    }
}

/// The running executable if it still exists, else a vigil binary next to
/// the install dir.
pub fn find_watchdog_binary(layout: &Layout) -> Option<PathBuf> {
    if layout.exe.is_file() {
        return Some(layout.exe.clone());
    }
    layout.find(SUPERVISOR_BIN)
}

/// Shell loop that relaunches the target whenever its recorded pid is gone.
pub fn render_fallback_watchdog(target: &LaunchRequest, pid_file: &Path, tick: Duration) -> String {
    if cfg!(windows) {
        render_fallback_batch(target, tick)
    } else {
        render_fallback_shell(target, pid_file, tick)
    }
}

fn render_fallback_shell(target: &LaunchRequest, pid_file: &Path, tick: Duration) -> String {
    let pid_file = shell_escape::unix::escape(pid_file.to_string_lossy());
    let cd = match &target.cwd {
        Some(dir) => format!("cd {} || exit 1\n", shell_escape::unix::escape(dir.to_string_lossy())),
        None => String::new(),
    };
    format!(
        "#!/bin/sh\n\
         # vigil fallback watchdog, tick {tick_label}\n\
         {cd}\
         PID_FILE={pid_file}\n\
         while :; do\n\
         \x20 pid=$(cat \"$PID_FILE\" 2>/dev/null)\n\
         \x20 if [ -z \"$pid\" ] || ! kill -0 \"$pid\" 2>/dev/null; then\n\
         \x20   nohup {command} >/dev/null 2>&1 &\n\
         \x20   echo $! > \"$PID_FILE\"\n\
         \x20 fi\n\
         \x20 sleep {secs}\n\
         done\n",
        tick_label = format_duration(tick),
        cd = cd,
        pid_file = pid_file,
        command = target.shell_line(),
        secs = tick.as_secs().max(1),
    )
}

fn render_fallback_batch(target: &LaunchRequest, tick: Duration) -> String {
    let program = target.program.to_string_lossy();
    let image = program
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    format!(
        "@echo off\r\n\
         rem vigil fallback watchdog\r\n\
         :loop\r\n\
         tasklist /FI \"IMAGENAME eq {image}\" /NH | find /I \"{image}\" >nul\r\n\
         if errorlevel 1 start \"\" /B {command}\r\n\
         timeout /t {secs} /nobreak >nul\r\n\
         goto loop\r\n",
        image = image,
        command = target.batch_line(),
        secs = tick.as_secs().max(1),
    )
}

/// Write the fallback watchdog into `scratch_dir` and return its path.
///
/// The file is kept: it runs for as long as the session.
pub fn synthesize_watchdog(
    scratch_dir: &Path,
    app_name: &str,
    target: &LaunchRequest,
    pid_file: &Path,
    tick: Duration,
) -> Result<PathBuf> {
    std::fs::create_dir_all(scratch_dir)?;
    let suffix = if cfg!(windows) { ".bat" } else { ".sh" };
    let path = scratch_dir.join(format!("{}-fallback-watchdog{}", app_name, suffix));

    let mut file = std::fs::File::create(&path)?;
    file.write_all(render_fallback_watchdog(target, pid_file, tick).as_bytes())?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    tracing::warn!("Synthesized fallback watchdog at {}", path.display());
    Ok(path)
}
