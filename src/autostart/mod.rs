//! Autostart registration.
//!
//! Every bootstrap re-registers the supervisor with the host OS so it comes
//! back after a reboot or logout. Several mechanisms are installed per
//! platform for redundancy; each one is independent and a failure in one
//! never blocks the others. Artifacts are overwritten in place, so running
//! the registrar twice leaves exactly one copy of each.

mod render;

pub use render::{
    desktop_entry, launch_agent, login_item_scripts, quote_exec_arg, registry_value,
    service_unit, startup_script, xml_escape,
};

use crate::error::Result;
use crate::platform::{HostOs, PlatformKind};
use crate::spawn::LaunchRequest;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutostartKind {
    RegistryRunKey,
    StartupFolderScript,
    LaunchAgent,
    LoginItem,
    DesktopEntry,
    UserServiceUnit,
}

impl AutostartKind {
    /// Mechanisms installed on each platform, in installation order.
    pub fn for_platform(platform: PlatformKind) -> &'static [AutostartKind] {
        match platform {
            PlatformKind::Linux => &[AutostartKind::DesktopEntry, AutostartKind::UserServiceUnit],
            PlatformKind::MacOs => &[AutostartKind::LaunchAgent, AutostartKind::LoginItem],
            PlatformKind::Windows => &[
                AutostartKind::RegistryRunKey,
                AutostartKind::StartupFolderScript,
            ],
        }
    }
}

impl fmt::Display for AutostartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AutostartKind::RegistryRunKey => "registry-run-key",
            AutostartKind::StartupFolderScript => "startup-folder-script",
            AutostartKind::LaunchAgent => "launch-agent",
            AutostartKind::LoginItem => "login-item",
            AutostartKind::DesktopEntry => "desktop-entry",
            AutostartKind::UserServiceUnit => "user-service-unit",
        };
        f.write_str(name)
    }
}

/// A file the entry needs on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutostartEntry {
    pub kind: AutostartKind,
    /// Registry value / login item name.
    pub name: String,
    /// What the entry launches at login.
    pub command: LaunchRequest,
    pub artifact: Option<Artifact>,
}

impl AutostartEntry {
    pub fn artifact_file_name(&self) -> Option<String> {
        self.artifact
            .as_ref()
            .and_then(|a| a.path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn artifact_path_string(&self) -> Option<String> {
        self.artifact
            .as_ref()
            .map(|a| a.path.to_string_lossy().into_owned())
    }
}

/// Inputs for building the platform's entries.
#[derive(Debug, Clone)]
pub struct AutostartSpec {
    pub app_name: String,
    /// Reverse-DNS label for the launch agent.
    pub label: String,
    /// Root for per-user artifact paths.
    pub home: PathBuf,
    pub log_dir: PathBuf,
    /// Bootstrap invocation, normally `vigil bootstrap --hidden`.
    pub command: LaunchRequest,
}

impl AutostartSpec {
    pub fn new(app_name: &str, home: &Path, log_dir: &Path, command: LaunchRequest) -> Self {
        Self {
            app_name: app_name.to_string(),
            label: format!("io.vigil.{}", app_name),
            home: home.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
            command,
        }
    }

    pub fn entry(&self, kind: AutostartKind) -> AutostartEntry {
        let artifact = match kind {
            AutostartKind::DesktopEntry => Some(Artifact {
                path: self
                    .home
                    .join(".config/autostart")
                    .join(format!("{}.desktop", self.app_name)),
                contents: desktop_entry(&self.app_name, &self.command),
            }),
            AutostartKind::UserServiceUnit => Some(Artifact {
                path: self
                    .home
                    .join(".config/systemd/user")
                    .join(format!("{}.service", self.app_name)),
                contents: service_unit(&self.app_name, &self.command),
            }),
            AutostartKind::LaunchAgent => {
                let stdout = self.log_dir.join("launchd.out.log");
                let stderr = self.log_dir.join("launchd.err.log");
                Some(Artifact {
                    path: self
                        .home
                        .join("Library/LaunchAgents")
                        .join(format!("{}.plist", self.label)),
                    contents: launch_agent(
                        &self.label,
                        &self.command,
                        &stdout.to_string_lossy(),
                        &stderr.to_string_lossy(),
                    ),
                })
            }
            AutostartKind::StartupFolderScript => Some(Artifact {
                path: self
                    .home
                    .join(r"AppData\Roaming\Microsoft\Windows\Start Menu\Programs\Startup")
                    .join(format!("{}.bat", self.app_name)),
                contents: startup_script(&self.command),
            }),
            AutostartKind::LoginItem | AutostartKind::RegistryRunKey => None,
        };

        AutostartEntry {
            kind,
            name: self.app_name.clone(),
            command: self.command.clone(),
            artifact,
        }
    }

    pub fn entries_for(&self, platform: PlatformKind) -> Vec<AutostartEntry> {
        AutostartKind::for_platform(platform)
            .iter()
            .map(|kind| self.entry(*kind))
            .collect()
    }
}

/// Write an artifact, creating parent directories. Returns `false` when the
/// file already had exactly this content.
pub fn write_artifact(artifact: &Artifact) -> Result<bool> {
    if let Ok(existing) = fs::read_to_string(&artifact.path) {
        if existing == artifact.contents {
            return Ok(false);
        }
    }
    if let Some(parent) = artifact.path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&artifact.path, &artifact.contents)?;
    Ok(true)
}

#[derive(Debug, Clone, Serialize)]
pub struct AutostartOutcome {
    pub kind: AutostartKind,
    pub error: Option<String>,
}

/// Per-mechanism results of one registration pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutostartReport {
    pub outcomes: Vec<AutostartOutcome>,
}

impl AutostartReport {
    pub fn installed(&self) -> impl Iterator<Item = AutostartKind> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AutostartOutcome> + '_ {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct AutostartRegistrar {
    host: Arc<dyn HostOs>,
    entries: Vec<AutostartEntry>,
}

impl AutostartRegistrar {
    pub fn new(host: Arc<dyn HostOs>, entries: Vec<AutostartEntry>) -> Self {
        Self { host, entries }
    }

    /// Registrar with the standard entries for the host's platform.
    pub fn for_host(host: Arc<dyn HostOs>, spec: &AutostartSpec) -> Self {
        let entries = spec.entries_for(host.platform());
        Self::new(host, entries)
    }

    pub fn entries(&self) -> &[AutostartEntry] {
        &self.entries
    }

    /// Install every entry. Failures are logged and reported, never raised.
    pub async fn install(&self) -> AutostartReport {
        let mut report = AutostartReport::default();
        for entry in &self.entries {
            let error = match self.host.install_autostart(entry).await {
                Ok(()) => {
                    tracing::info!("Registered autostart entry: {}", entry.kind);
                    None
                }
                Err(e) => {
                    tracing::error!("Failed to register autostart entry {}: {}", entry.kind, e);
                    Some(e.to_string())
                }
            };
            report.outcomes.push(AutostartOutcome {
                kind: entry.kind,
                error,
            });
        }
        report
    }
}
