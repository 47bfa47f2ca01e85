//! Single-instance lock for the watchdog.
//!
//! The lock file holds the owner's pid. Exclusion comes from an advisory
//! `flock`/`LockFileEx` lock held on the open file for the watchdog's whole
//! lifetime, so two watchdogs starting at the same moment cannot both win.
//! The recorded pid is still probed: a file naming a live foreign process is
//! respected even when no advisory lock is held on it.

use crate::error::{parse_pid, Error, Result};
use crate::platform::HostOs;
use crate::state::{PidFile, Reading};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Attempts before giving up on a lock file that keeps being replaced.
const MAX_OPEN_ATTEMPTS: usize = 5;

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(LockGuard),
    /// Another live process owns the lock. Nothing was written. `pid` is
    /// `None` when the owner has not recorded itself yet.
    HeldBy { pid: Option<u32> },
}

pub struct LockManager {
    file: PidFile,
    host: Arc<dyn HostOs>,
    own_pid: u32,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>, host: Arc<dyn HostOs>) -> Self {
        Self {
            file: PidFile::new(path),
            host,
            own_pid: std::process::id(),
        }
    }

    /// Act as if the current process had `pid`.
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Current owner recorded in the lock file, if the file parses.
    pub fn recorded_owner(&self) -> Option<u32> {
        self.file.read().value()
    }

    fn open(&self) -> Result<File> {
        if let Some(dir) = self.path().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path())
            .map_err(|e| {
                Error::Filesystem(format!(
                    "Failed to open lock file '{}': {}",
                    self.path().display(),
                    e
                ))
            })
    }

    /// Live process other than us named by the lock file.
    async fn live_foreign_owner(&self, handle: &File) -> Option<u32> {
        match read_owner(handle) {
            Reading::Value(pid) if pid == self.own_pid => {
                tracing::debug!("Lock {} already names this process", self.path().display());
                None
            }
            Reading::Value(pid) => {
                if self.host.probe_process_alive(pid).await {
                    return Some(pid);
                }
                tracing::info!("Taking over stale lock (PID {} is not running)", pid);
                None
            }
            Reading::Corrupt(reason) => {
                tracing::warn!(
                    "Lock file {} is corrupt ({}); taking it over",
                    self.path().display(),
                    reason
                );
                None
            }
            Reading::Missing => None,
        }
    }

    /// Take the lock unless another process holds it.
    pub async fn try_acquire(&self) -> Result<LockOutcome> {
        for _ in 0..MAX_OPEN_ATTEMPTS {
            let handle = self.open()?;
            if let Err(e) = FileExt::try_lock_exclusive(&handle) {
                let pid = self.recorded_owner();
                tracing::debug!(
                    "Lock {} is held by another process (recorded PID {:?}): {}",
                    self.path().display(),
                    pid,
                    e
                );
                return Ok(LockOutcome::HeldBy { pid });
            }

            // A releasing owner deletes the file; a lock on the unlinked inode excludes nobody.
            if !is_same_file(&handle, self.path()) {
                tracing::debug!("Lock file {} was replaced while locking", self.path().display());
                continue;
            }

            if let Some(pid) = self.live_foreign_owner(&handle).await {
                return Ok(LockOutcome::HeldBy { pid: Some(pid) });
            }

            write_owner(&handle, self.own_pid).map_err(|e| {
                Error::Filesystem(format!(
                    "Failed to record owner in '{}': {}",
                    self.path().display(),
                    e
                ))
            })?;
            tracing::debug!("Acquired lock {} as PID {}", self.path().display(), self.own_pid);
            return Ok(LockOutcome::Acquired(LockGuard {
                file: self.file.clone(),
                handle: Some(handle),
                own_pid: self.own_pid,
                released: false,
            }));
        }

        Err(Error::Filesystem(format!(
            "Lock file '{}' kept changing while locking",
            self.path().display()
        )))
    }

    /// Take the lock or end the process with exit code 0.
    ///
    /// A second watchdog is not an error: it leaves quietly and writes nothing.
    pub async fn acquire_or_exit(&self) -> Result<LockGuard> {
        match self.try_acquire().await? {
            LockOutcome::Acquired(guard) => Ok(guard),
            LockOutcome::HeldBy { pid } => {
                match pid {
                    Some(pid) => tracing::info!("Another watchdog is running (PID {}), exiting", pid),
                    None => tracing::info!("Another watchdog is starting, exiting"),
                }
                std::process::exit(0);
            }
        }
    }
}

/// Read the pid through the locked handle. Windows locks are mandatory, so a
/// second handle on the same file cannot read it.
fn read_owner(handle: &File) -> Reading<u32> {
    let mut reader = handle;
    let mut contents = String::new();
    if let Err(e) = reader
        .seek(SeekFrom::Start(0))
        .and_then(|_| reader.read_to_string(&mut contents))
    {
        return Reading::Corrupt(format!("unreadable: {}", e));
    }
    if contents.trim().is_empty() {
        return Reading::Missing;
    }
    match parse_pid(&contents) {
        Ok(pid) => Reading::Value(pid),
        Err(e) => Reading::Corrupt(e.to_string()),
    }
}

/// Overwrite the locked file in place. Replacing it would drop the advisory lock.
fn write_owner(handle: &File, pid: u32) -> std::io::Result<()> {
    let mut writer = handle;
    writer.set_len(0)?;
    writer.seek(SeekFrom::Start(0))?;
    write!(writer, "{}", pid)?;
    writer.flush()?;
    handle.sync_data()
}

#[cfg(unix)]
fn is_same_file(handle: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (handle.metadata(), std::fs::metadata(path)) {
        (Ok(open), Ok(named)) => open.dev() == named.dev() && open.ino() == named.ino(),
        _ => false,
    }
}

// No stable file identity on Windows; a deleted path is the replacement we can detect.
#[cfg(not(unix))]
fn is_same_file(_handle: &File, path: &Path) -> bool {
    path.exists()
}

/// Held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    file: PidFile,
    /// Open handle carrying the advisory lock.
    handle: Option<File>,
    own_pid: u32,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Owner currently recorded in the lock file.
    pub fn recorded_owner(&self) -> Option<u32> {
        match &self.handle {
            Some(handle) if is_same_file(handle, self.path()) => read_owner(handle).value(),
            _ => self.file.read().value(),
        }
    }

    /// Whether the lock file at our path is still the one we locked and
    /// still names us.
    pub fn still_owned(&self) -> bool {
        match &self.handle {
            Some(handle) if !self.released => {
                is_same_file(handle, self.path())
                    && read_owner(handle).value() == Some(self.own_pid)
            }
            _ => false,
        }
    }

    /// Delete the lock file if it still names us, then drop the advisory
    /// lock. Best effort: errors are logged.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let reading = match &self.handle {
            Some(handle) if is_same_file(handle, self.path()) => read_owner(handle),
            _ => self.file.read(),
        };
        match reading {
            Reading::Value(pid) if pid == self.own_pid => match self.file.remove() {
                Ok(_) => tracing::debug!("Released lock {}", self.path().display()),
                Err(e) => tracing::warn!("Failed to remove lock {}: {}", self.path().display(), e),
            },
            Reading::Value(pid) => {
                tracing::warn!(
                    "Lock {} now belongs to PID {}; leaving it in place",
                    self.path().display(),
                    pid
                );
            }
            Reading::Missing => {}
            Reading::Corrupt(reason) => {
                tracing::warn!(
                    "Lock {} is corrupt ({}); leaving it in place",
                    self.path().display(),
                    reason
                );
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = FileExt::unlock(&handle) {
                tracing::debug!("Failed to unlock {}: {}", self.path().display(), e);
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::platform::{self, HostOs};
    use crate::spawn::SpawnSettings;
    use std::time::Duration;

    fn host() -> Arc<dyn HostOs> {
        platform::detect(&SpawnSettings::new(std::env::temp_dir(), Duration::from_secs(5)))
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[tokio::test]
    async fn acquires_fresh_lock_and_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-watchdog.lock");
        let manager = LockManager::new(&path, host());

        let outcome = manager.try_acquire().await.unwrap();
        let guard = match outcome {
            LockOutcome::Acquired(guard) => guard,
            LockOutcome::HeldBy { pid } => panic!("unexpectedly held by {:?}", pid),
        };
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim(),
            std::process::id().to_string()
        );

        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn live_owner_is_respected_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-watchdog.lock");
        // PID 1 always exists.
        std::fs::write(&path, "1").unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        let outcome = LockManager::new(&path, host()).try_acquire().await.unwrap();
        assert!(matches!(outcome, LockOutcome::HeldBy { pid: Some(1) }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[tokio::test]
    async fn stale_and_corrupt_locks_are_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-watchdog.lock");

        for contents in [dead_pid().to_string(), "garbage".to_string(), String::new()] {
            std::fs::write(&path, &contents).unwrap();
            let manager = LockManager::new(&path, host());
            let outcome = manager.try_acquire().await.unwrap();
            assert!(matches!(outcome, LockOutcome::Acquired(_)), "{:?}", contents);
        }
    }

    #[tokio::test]
    async fn release_leaves_foreign_lock_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-watchdog.lock");
        let manager = LockManager::new(&path, host());

        let LockOutcome::Acquired(mut guard) = manager.try_acquire().await.unwrap() else {
            panic!("lock should be free");
        };
        std::fs::write(&path, "1").unwrap();
        guard.release();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");
    }

    #[tokio::test]
    async fn second_manager_is_refused_while_guard_lives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-watchdog.lock");

        let first = LockManager::new(&path, host()).with_own_pid(100);
        let LockOutcome::Acquired(guard) = first.try_acquire().await.unwrap() else {
            panic!("lock should be free");
        };

        // PID 100 need not exist: the advisory lock alone keeps the second manager out.
        let second = LockManager::new(&path, host()).with_own_pid(200);
        let outcome = second.try_acquire().await.unwrap();
        assert!(matches!(outcome, LockOutcome::HeldBy { pid: Some(100) }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "100");
        assert!(guard.still_owned());

        drop(guard);
        assert!(matches!(
            second.try_acquire().await.unwrap(),
            LockOutcome::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn overwritten_lock_is_no_longer_owned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-watchdog.lock");
        let manager = LockManager::new(&path, host()).with_own_pid(100);

        let LockOutcome::Acquired(guard) = manager.try_acquire().await.unwrap() else {
            panic!("lock should be free");
        };
        std::fs::write(&path, "300").unwrap();
        assert!(!guard.still_owned());
        assert_eq!(guard.recorded_owner(), Some(300));
    }
}
