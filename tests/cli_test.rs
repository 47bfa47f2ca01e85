//! CLI smoke tests against the built binary.
//!
//! Every test writes a config that points all records into a temp dir, so
//! nothing touches the real per-user directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn vigil_binary() -> String {
    env!("CARGO_BIN_EXE_vigil").to_string()
}

fn write_config(temp: &TempDir, target: &Path) -> PathBuf {
    let root = temp.path();
    let config = format!(
        r#"
app_name: clidemo
target:
  command: "{target}"
  install_dir: "{root}"
watchdog:
  tick_interval: 1s
  heartbeat_threshold: 5m
  stop_poll_interval: 100ms
  tick_jitter: 0s
bootstrap:
  grace_period: 200ms
  alive_interval: 50ms
  autostart: false
paths:
  data_dir: "{root}/data"
  lock_dir: "{root}/lock"
  log_dir: "{root}/logs"
  scratch_dir: "{root}/scratch"
  autostart_home: "{root}/home"
"#,
        target = target.display(),
        root = root.display()
    );
    let path = root.join("vigil.yaml");
    fs::write(&path, config).expect("Failed to write config");
    path
}

fn vigil(config: &Path, args: &[&str]) -> Output {
    Command::new(vigil_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("VIGIL_CONFIG")
        .output()
        .expect("Failed to run vigil")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ============================================================================
// Help and completions
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    let output = Command::new(vigil_binary())
        .arg("--help")
        .output()
        .expect("Failed to run vigil");
    assert!(output.status.success());
    let text = stdout(&output);
    for sub in ["bootstrap", "watchdog", "stop", "status", "beat", "completions"] {
        assert!(text.contains(sub), "missing {} in help:\n{}", sub, text);
    }
}

#[test]
fn test_completions_bash() {
    let output = Command::new(vigil_binary())
        .args(["completions", "bash"])
        .output()
        .expect("Failed to run vigil");
    assert!(output.status.success());
    assert!(stdout(&output).contains("vigil"));
}

// ============================================================================
// Status, beat, stop
// ============================================================================

#[test]
fn test_status_json_on_fresh_machine() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, &temp.path().join("app"));

    let output = vigil(&config, &["status", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["app_name"], "clidemo");
    assert_eq!(report["watchdog_running"], false);
    assert_eq!(report["target_pid"], serde_json::Value::Null);
    assert_eq!(report["liveness"]["state"], "dead");
    assert_eq!(report["liveness"]["cause"]["reason"], "no_records");
}

#[test]
fn test_beat_makes_target_alive_by_heartbeat() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, &temp.path().join("app"));

    let output = vigil(&config, &["beat"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(temp.path().join("data/heartbeat.txt").exists());

    let output = vigil(&config, &["status", "--json"]);
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["liveness"]["state"], "alive_by_heartbeat");
}

#[test]
fn test_stop_without_watchdog() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, &temp.path().join("app"));

    let output = vigil(&config, &["stop"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("No watchdog is running"));
    assert!(!temp.path().join("lock/clidemo-watchdog.stop").exists());
}

#[test]
fn test_invalid_config_fails_for_short_commands() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("vigil.yaml");
    fs::write(&config, "watchdog:\n  tick_interval: soon\n").unwrap();

    let output = vigil(&config, &["status"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Error:"), "stderr: {}", stderr(&output));
}

#[test]
fn test_missing_explicit_config_fails() {
    let temp = TempDir::new().unwrap();
    let output = vigil(&temp.path().join("nope.yaml"), &["status"]);
    assert!(!output.status.success());
}

// ============================================================================
// Real processes
// ============================================================================

#[cfg(unix)]
fn write_target_script(temp: &TempDir) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = temp.path().join("app.sh");
    fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(unix)]
fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    check()
}

#[cfg(unix)]
#[test]
fn test_watchdog_launches_target_and_stops_on_request() {
    let temp = TempDir::new().unwrap();
    let target = write_target_script(&temp);
    let config = write_config(&temp, &target);
    let pid_file = temp.path().join("data/target.pid");
    let lock_file = temp.path().join("lock/clidemo-watchdog.lock");

    let mut watchdog = Command::new(vigil_binary())
        .arg("--config")
        .arg(&config)
        .arg("watchdog")
        .env_remove("VIGIL_CONFIG")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("Failed to start watchdog");

    let launched = wait_for(Duration::from_secs(10), || pid_file.exists());
    let target_pid = fs::read_to_string(&pid_file)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());

    let stop = vigil(&config, &["stop", "--timeout", "10s"]);
    let exited = wait_for(Duration::from_secs(10), || {
        matches!(watchdog.try_wait(), Ok(Some(_)))
    });
    if !exited {
        let _ = watchdog.kill();
    }
    if let Some(pid) = target_pid {
        kill_pid(pid);
    }

    assert!(launched, "target pid record never appeared");
    assert!(target_pid.is_some());
    assert!(stop.status.success(), "stderr: {}", stderr(&stop));
    assert!(exited, "watchdog did not exit after stop");
    assert!(!lock_file.exists());
}

#[cfg(unix)]
#[test]
fn test_second_watchdog_exits_quietly_when_lock_is_held() {
    let temp = TempDir::new().unwrap();
    let target = write_target_script(&temp);
    let config = write_config(&temp, &target);

    // This test process is alive, so its pid is a live lock owner.
    let lock_file = temp.path().join("lock/clidemo-watchdog.lock");
    fs::create_dir_all(lock_file.parent().unwrap()).unwrap();
    fs::write(&lock_file, std::process::id().to_string()).unwrap();

    let output = vigil(&config, &["watchdog"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(
        fs::read_to_string(&lock_file).unwrap(),
        std::process::id().to_string()
    );
    assert!(!temp.path().join("data/target.pid").exists());
}

#[cfg(unix)]
#[test]
fn test_watchdog_ignores_sigterm_from_its_first_tick() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let temp = TempDir::new().unwrap();
    let target = write_target_script(&temp);
    let config = write_config(&temp, &target);
    let lock_file = temp.path().join("lock/clidemo-watchdog.lock");
    let pid_file = temp.path().join("data/target.pid");

    let mut watchdog = Command::new(vigil_binary())
        .arg("--config")
        .arg(&config)
        .arg("watchdog")
        .env_remove("VIGIL_CONFIG")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("Failed to start watchdog");

    // The lock exists before the first tick, so the policy must already be active.
    let locked = wait_for(Duration::from_secs(10), || lock_file.exists());
    let _ = kill(Pid::from_raw(watchdog.id() as i32), Signal::SIGTERM);
    std::thread::sleep(Duration::from_millis(300));
    let survived = matches!(watchdog.try_wait(), Ok(None));

    let stop = vigil(&config, &["stop", "--timeout", "10s"]);
    let exited = wait_for(Duration::from_secs(10), || {
        matches!(watchdog.try_wait(), Ok(Some(_)))
    });
    if !exited {
        let _ = watchdog.kill();
    }
    if let Some(pid) = fs::read_to_string(&pid_file)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
    {
        kill_pid(pid);
    }

    assert!(locked, "lock file never appeared");
    assert!(survived, "watchdog died on SIGTERM");
    assert!(stop.status.success(), "stderr: {}", stderr(&stop));
    assert!(exited, "watchdog did not exit after stop");
}
