//! Service-unit registration against a stand-in `systemctl` on PATH.
//!
//! The supervisor re-runs its bootstrap stage every time the service manager
//! restarts it, so registration has to be quiet when nothing changed.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use vigil::autostart::{Artifact, AutostartEntry, AutostartKind};
use vigil::platform::UnixHost;
use vigil::spawn::SpawnSettings;
use vigil::{HostOs, LaunchRequest, PlatformKind};

fn install_fake_systemctl(bin: &Path, log: &Path, enabled_marker: &Path) {
    std::fs::create_dir_all(bin).unwrap();
    let script = format!(
        "#!/bin/sh\n\
         echo \"$*\" >> '{log}'\n\
         case \"$1 $2\" in\n\
         \"--user is-enabled\") [ -f '{mark}' ] ;;\n\
         \"--user enable\") touch '{mark}' ;;\n\
         esac\n",
        log = log.display(),
        mark = enabled_marker.display()
    );
    let path = bin.join("systemctl");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn take_calls(log: &Path) -> Vec<String> {
    let calls = std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect();
    let _ = std::fs::remove_file(log);
    calls
}

#[tokio::test]
async fn test_unchanged_service_unit_is_not_reloaded() {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    let log = temp.path().join("systemctl.log");
    let marker = temp.path().join("enabled");
    install_fake_systemctl(&bin, &log, &marker);

    // Only this test runs in this binary, so PATH can be changed in place.
    let path = std::env::var("PATH").unwrap_or_default();
    std::env::set_var("PATH", format!("{}:{}", bin.display(), path));

    let host = UnixHost::new(
        PlatformKind::current(),
        &SpawnSettings::new(temp.path(), Duration::from_secs(5)),
    );
    let unit_path = temp.path().join("systemd/user/demo.service");
    let mut entry = AutostartEntry {
        kind: AutostartKind::UserServiceUnit,
        name: "demo".to_string(),
        command: LaunchRequest::new("/opt/demo/vigil").arg("bootstrap"),
        artifact: Some(Artifact {
            path: unit_path.clone(),
            contents: "[Service]\nExecStart=/opt/demo/vigil bootstrap\n".to_string(),
        }),
    };

    host.install_autostart(&entry).await.unwrap();
    assert_eq!(
        take_calls(&log),
        ["--user daemon-reload", "--user enable demo.service"]
    );

    // Bootstrap restarted by the service manager: nothing to do.
    host.install_autostart(&entry).await.unwrap();
    assert_eq!(take_calls(&log), ["--user is-enabled demo.service"]);

    // Unit disabled behind our back: enable again without a reload.
    std::fs::remove_file(&marker).unwrap();
    host.install_autostart(&entry).await.unwrap();
    assert_eq!(
        take_calls(&log),
        ["--user is-enabled demo.service", "--user enable demo.service"]
    );

    // New contents need a reload.
    if let Some(artifact) = entry.artifact.as_mut() {
        artifact.contents.push_str("RestartSec=10\n");
    }
    host.install_autostart(&entry).await.unwrap();
    assert_eq!(
        take_calls(&log),
        ["--user daemon-reload", "--user enable demo.service"]
    );
    assert!(std::fs::read_to_string(&unit_path).unwrap().contains("RestartSec=10"));
}
