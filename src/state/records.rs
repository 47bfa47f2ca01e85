use crate::error::{parse_pid, Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Result of reading a single-value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading<T> {
    Missing,
    Corrupt(String),
    Value(T),
}

impl<T> Reading<T> {
    /// The value, with corrupt contents folded into `None`.
    pub fn value(self) -> Option<T> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Missing | Reading::Corrupt(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Reading::Missing)
    }
}

fn read_record(path: &Path) -> Reading<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Reading::Value(contents),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Reading::Missing,
        Err(e) => Reading::Corrupt(format!("unreadable: {}", e)),
    }
}

/// Replace `path` atomically so readers never see a half-written value.
fn write_record(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| {
        Error::Filesystem(format!("Failed to create '{}': {}", dir.display(), e))
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| {
        Error::Filesystem(format!("Failed to write '{}': {}", path.display(), e.error))
    })?;
    Ok(())
}

fn remove_record(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Single-line epoch-millis record (heartbeat, bootstrap alive file).
#[derive(Debug, Clone)]
pub struct TimestampFile {
    path: PathBuf,
}

impl TimestampFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Reading<i64> {
        match read_record(&self.path) {
            Reading::Value(contents) => match contents.trim().parse::<i64>() {
                Ok(millis) => Reading::Value(millis),
                Err(_) => Reading::Corrupt(format!("not a timestamp: {:?}", contents.trim())),
            },
            Reading::Missing => Reading::Missing,
            Reading::Corrupt(reason) => Reading::Corrupt(reason),
        }
    }

    pub fn write_at(&self, millis: i64) -> Result<()> {
        write_record(&self.path, &millis.to_string())
    }

    /// Write the current time and return it.
    pub fn touch(&self) -> Result<i64> {
        let now = now_millis();
        self.write_at(now)?;
        Ok(now)
    }
}

/// Single-integer pid record.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the pid. Zero, negative and non-numeric contents are corrupt.
    pub fn read(&self) -> Reading<u32> {
        match read_record(&self.path) {
            Reading::Value(contents) => match parse_pid(&contents) {
                Ok(pid) => Reading::Value(pid),
                Err(e) => Reading::Corrupt(e.to_string()),
            },
            Reading::Missing => Reading::Missing,
            Reading::Corrupt(reason) => Reading::Corrupt(reason),
        }
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        write_record(&self.path, &pid.to_string())
    }

    /// Delete the record. Returns whether a file was removed.
    pub fn remove(&self) -> Result<bool> {
        remove_record(&self.path)
    }
}

/// Operator request for the watchdog to shut down.
#[derive(Debug, Clone)]
pub struct StopRequest {
    file: PidFile,
}

impl StopRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: PidFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Record a stop request made by `requester`.
    pub fn request(&self, requester: u32) -> Result<()> {
        self.file.write(requester)
    }

    pub fn is_pending(&self) -> bool {
        self.file.path().exists()
    }

    /// Consume a pending request. Returns the requester pid if one was recorded.
    pub fn take(&self) -> Option<Reading<u32>> {
        if !self.is_pending() {
            return None;
        }
        let reading = self.file.read();
        if let Err(e) = self.file.remove() {
            tracing::warn!("Failed to remove stop request {}: {}", self.path().display(), e);
        }
        Some(reading)
    }

    pub fn clear(&self) -> Result<bool> {
        self.file.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let file = TimestampFile::new(dir.path().join("nested/heartbeat.txt"));

        assert_eq!(file.read(), Reading::Missing);

        file.write_at(1_700_000_000_000).unwrap();
        assert_eq!(file.read(), Reading::Value(1_700_000_000_000));

        fs::write(file.path(), "not-a-number").unwrap();
        assert!(matches!(file.read(), Reading::Corrupt(_)));
        assert_eq!(file.read().value(), None);
    }

    #[test]
    fn timestamp_tolerates_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let file = TimestampFile::new(dir.path().join("heartbeat.txt"));
        fs::write(file.path(), "1700000000000\n").unwrap();
        assert_eq!(file.read(), Reading::Value(1_700_000_000_000));
    }

    #[test]
    fn touch_writes_now() {
        let dir = tempfile::tempdir().unwrap();
        let file = TimestampFile::new(dir.path().join("alive"));
        let before = now_millis();
        let written = file.touch().unwrap();
        assert!(written >= before);
        assert_eq!(file.read(), Reading::Value(written));
    }

    #[test]
    fn pid_file_rejects_zero_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let file = PidFile::new(dir.path().join("target.pid"));

        file.write(4242).unwrap();
        assert_eq!(file.read(), Reading::Value(4242));

        fs::write(file.path(), "0").unwrap();
        assert!(matches!(file.read(), Reading::Corrupt(_)));

        fs::write(file.path(), "-12").unwrap();
        assert!(matches!(file.read(), Reading::Corrupt(_)));

        fs::write(file.path(), "").unwrap();
        assert!(matches!(file.read(), Reading::Corrupt(_)));
    }

    #[test]
    fn pid_file_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = PidFile::new(dir.path().join("target.pid"));
        file.write(7).unwrap();
        assert!(file.remove().unwrap());
        assert!(!file.remove().unwrap());
        assert_eq!(file.read(), Reading::Missing);
    }

    #[test]
    fn stop_request_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopRequest::new(dir.path().join("vigil-watchdog.stop"));

        assert!(stop.take().is_none());
        stop.request(99).unwrap();
        assert!(stop.is_pending());
        assert_eq!(stop.take(), Some(Reading::Value(99)));
        assert!(!stop.is_pending());
        assert!(stop.take().is_none());
    }
}
