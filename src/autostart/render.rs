//! Text of the autostart artifacts.
//!
//! Pure functions so the exact output can be checked without touching the
//! host.

use crate::spawn::LaunchRequest;

/// Quote one argument for a desktop-entry `Exec=` or systemd `ExecStart=`
/// line. Both accept double quotes with backslash escapes.
pub fn quote_exec_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '\'' | '$' | '`' | '%'));
    if !needs_quotes {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' | '\\' | '$' | '`' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '%' => quoted.push_str("%%"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn exec_line(command: &LaunchRequest) -> String {
    command
        .argv()
        .iter()
        .map(|a| quote_exec_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn desktop_entry(app_name: &str, command: &LaunchRequest) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={app}\n\
         Comment=Keeps {app} running\n\
         Exec={exec}\n\
         Hidden=false\n\
         NoDisplay=true\n\
         X-GNOME-Autostart-enabled=true\n",
        app = app_name,
        exec = exec_line(command)
    )
}

/// User unit that restarts the bootstrap stage. `KillMode=process` keeps the
/// detached watchdog alive when the bootstrap exits after its grace period.
///
/// With `Restart=always` the bootstrap runs again every `RestartSec` plus the
/// grace period. Each run re-registers autostart, so an unchanged unit must
/// not trigger `daemon-reload` (see `UnixHost::install_autostart`).
pub fn service_unit(app_name: &str, command: &LaunchRequest) -> String {
    format!(
        "[Unit]\n\
         Description={app} supervisor\n\
         After=default.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={exec}\n\
         Restart=always\n\
         RestartSec=10\n\
         KillMode=process\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        app = app_name,
        exec = exec_line(command)
    )
}

pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `KeepAlive` relaunches the bootstrap whenever it exits, the same cycle as
/// the service unit's `Restart=always`.
pub fn launch_agent(label: &str, command: &LaunchRequest, stdout: &str, stderr: &str) -> String {
    let args = command
        .argv()
        .iter()
        .map(|a| format!("        <string>{}</string>\n", xml_escape(a)))
        .collect::<String>();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{args}    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>AbandonProcessGroup</key>
    <true/>
    <key>StandardOutPath</key>
    <string>{stdout}</string>
    <key>StandardErrorPath</key>
    <string>{stderr}</string>
</dict>
</plist>
"#,
        label = xml_escape(label),
        args = args,
        stdout = xml_escape(stdout),
        stderr = xml_escape(stderr),
    )
}

/// Command line stored in the registry Run value. The program is always
/// quoted so install paths with spaces survive.
pub fn registry_value(command: &LaunchRequest) -> String {
    let mut value = format!("\"{}\"", command.program.display());
    for arg in &command.args {
        value.push(' ');
        value.push_str(&shell_escape::windows::escape(arg.as_str().into()));
    }
    value
}

pub fn startup_script(command: &LaunchRequest) -> String {
    format!(
        "@echo off\r\nstart \"\" /B {}\r\n",
        registry_value(command)
    )
}

fn applescript_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// AppleScript pair: remove any login item with this name, then add one.
/// Login items cannot carry arguments, so only the program path is used.
pub fn login_item_scripts(name: &str, command: &LaunchRequest) -> (String, String) {
    let name = applescript_string(name);
    let path = applescript_string(&command.program.to_string_lossy());
    let remove = format!(
        "tell application \"System Events\" to delete (every login item whose name is {})",
        name
    );
    let add = format!(
        "tell application \"System Events\" to make login item at end with properties {{path:{}, hidden:true, name:{}}}",
        path, name
    );
    (remove, add)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap_command() -> LaunchRequest {
        LaunchRequest::new("/opt/my app/vigil").args(["bootstrap", "--hidden"])
    }

    #[test]
    fn exec_arg_quoting() {
        assert_eq!(quote_exec_arg("--hidden"), "--hidden");
        assert_eq!(quote_exec_arg("/opt/my app"), "\"/opt/my app\"");
        assert_eq!(quote_exec_arg("50%"), "\"50%%\"");
        assert_eq!(quote_exec_arg("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote_exec_arg(""), "\"\"");
    }

    #[test]
    fn desktop_entry_points_at_bootstrap() {
        let text = desktop_entry("demo", &bootstrap_command());
        assert!(text.starts_with("[Desktop Entry]\n"));
        assert!(text.contains("Exec=\"/opt/my app/vigil\" bootstrap --hidden\n"));
        assert!(text.contains("X-GNOME-Autostart-enabled=true"));
    }

    #[test]
    fn service_unit_restarts_always() {
        let text = service_unit("demo", &bootstrap_command());
        assert!(text.contains("Restart=always\n"));
        assert!(text.contains("RestartSec=10\n"));
        assert!(text.contains("KillMode=process\n"));
        assert!(text.contains("WantedBy=default.target\n"));
    }

    #[test]
    fn launch_agent_escapes_and_keeps_alive() {
        let command = LaunchRequest::new("/Apps/R&D/vigil").args(["bootstrap", "--hidden"]);
        let text = launch_agent("io.vigil.demo", &command, "/tmp/out.log", "/tmp/err.log");
        assert!(text.contains("<string>/Apps/R&amp;D/vigil</string>"));
        assert!(text.contains("<key>RunAtLoad</key>\n    <true/>"));
        assert!(text.contains("<key>KeepAlive</key>\n    <true/>"));
        assert!(text.contains("<string>/tmp/err.log</string>"));
    }

    #[test]
    fn registry_value_quotes_program() {
        let command = LaunchRequest::new(r"C:\Program Files\Demo\vigil.exe")
            .args(["bootstrap", "--hidden"]);
        assert_eq!(
            registry_value(&command),
            r#""C:\Program Files\Demo\vigil.exe" bootstrap --hidden"#
        );
        assert!(startup_script(&command).contains("start \"\" /B \"C:\\Program Files"));
    }

    #[test]
    fn login_item_scripts_replace_by_name() {
        let (remove, add) = login_item_scripts("demo", &bootstrap_command());
        assert!(remove.contains("delete (every login item whose name is \"demo\")"));
        assert!(add.contains("path:\"/opt/my app/vigil\""));
        assert!(add.contains("hidden:true"));
    }
}
