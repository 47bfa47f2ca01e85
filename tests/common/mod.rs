//! Shared fixtures: an in-memory host and a context rooted in a temp dir.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil::autostart::{self, AutostartEntry, AutostartKind};
use vigil::{
    Config, Error, HostOs, LaunchRequest, Layout, PlatformKind, ProcessHandle, Result,
    SupervisorContext,
};

/// Host whose process table is a set of pids.
pub struct FakeHost {
    alive: Mutex<HashSet<u32>>,
    next_pid: AtomicU32,
    spawns: Mutex<Vec<LaunchRequest>>,
    fail_spawns: AtomicBool,
    report_pid: AtomicBool,
    panic_next_probe: AtomicBool,
    installed: Mutex<Vec<AutostartKind>>,
    failing_autostart: Mutex<HashSet<AutostartKind>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: Mutex::new(HashSet::new()),
            next_pid: AtomicU32::new(10_000),
            spawns: Mutex::new(Vec::new()),
            fail_spawns: AtomicBool::new(false),
            report_pid: AtomicBool::new(true),
            panic_next_probe: AtomicBool::new(false),
            installed: Mutex::new(Vec::new()),
            failing_autostart: Mutex::new(HashSet::new()),
        })
    }

    pub fn mark_alive(&self, pid: u32) {
        self.alive.lock().insert(pid);
    }

    pub fn kill(&self, pid: u32) {
        self.alive.lock().remove(&pid);
    }

    pub fn alive_pids(&self) -> HashSet<u32> {
        self.alive.lock().clone()
    }

    pub fn spawns(&self) -> Vec<LaunchRequest> {
        self.spawns.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_spawns.store(failing, Ordering::SeqCst);
    }

    pub fn set_report_pid(&self, report: bool) {
        self.report_pid.store(report, Ordering::SeqCst);
    }

    pub fn panic_on_next_probe(&self) {
        self.panic_next_probe.store(true, Ordering::SeqCst);
    }

    pub fn installed(&self) -> Vec<AutostartKind> {
        self.installed.lock().clone()
    }

    pub fn fail_autostart(&self, kind: AutostartKind) {
        self.failing_autostart.lock().insert(kind);
    }
}

#[async_trait]
impl HostOs for FakeHost {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Linux
    }

    async fn probe_process_alive(&self, pid: u32) -> bool {
        if self.panic_next_probe.swap(false, Ordering::SeqCst) {
            panic!("probe exploded");
        }
        self.alive.lock().contains(&pid)
    }

    async fn spawn_detached(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(Error::SpawnExhausted {
                program: request.program.display().to_string(),
                attempts: vec![
                    "direct: refused".to_string(),
                    "shell: refused".to_string(),
                    "script: refused".to_string(),
                ],
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.alive.lock().insert(pid);
        self.spawns.lock().push(request.clone());
        let reported = self.report_pid.load(Ordering::SeqCst).then_some(pid);
        Ok(ProcessHandle {
            pid: reported,
            strategy: "fake",
        })
    }

    async fn install_autostart(&self, entry: &AutostartEntry) -> Result<()> {
        if self.failing_autostart.lock().contains(&entry.kind) {
            return Err(Error::Autostart {
                kind: entry.kind.to_string(),
                reason: "refused by test".to_string(),
            });
        }
        if let Some(artifact) = &entry.artifact {
            autostart::write_artifact(artifact)?;
        }
        self.installed.lock().push(entry.kind);
        Ok(())
    }
}

/// Config whose every path lives under `root`.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.app_name = "demo".to_string();
    config.target.command = Some(root.join("demo-app"));
    config.target.install_dir = Some(root.to_path_buf());
    config.paths.data_dir = Some(root.join("data"));
    config.paths.lock_dir = Some(root.join("lock"));
    config.paths.scratch_dir = Some(root.join("scratch"));
    config.paths.autostart_home = Some(root.join("home"));
    config.watchdog.tick_interval = Duration::from_millis(50);
    config.watchdog.stop_poll_interval = Duration::from_millis(10);
    config.watchdog.tick_jitter = Duration::ZERO;
    config.watchdog.command_timeout = Duration::from_secs(2);
    config.bootstrap.grace_period = Duration::from_millis(100);
    config.bootstrap.alive_interval = Duration::from_millis(20);
    config
}

pub fn test_context(root: &Path, host: Arc<FakeHost>) -> SupervisorContext {
    SupervisorContext::new(test_config(root), None, host).expect("context")
}

pub fn test_layout(root: &Path) -> Layout {
    Layout::from_exe(&root.join("vigil"), Some(root))
}

/// Every file below `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(files_under(&path));
            } else {
                files.push(path);
            }
        }
    }
    files
}
