//! Running external tools.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::MediaError;

/// Captured result of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Whether `binary` resolves to an executable.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .args(["-c", "command -v \"$1\" >/dev/null 2>&1", "sh", binary])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Spawn `cmd`, mapping a missing executable to [`MediaError::ToolNotFound`].
pub(crate) fn spawn(cmd: &mut Command, tool: &str) -> Result<Child, MediaError> {
    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::ToolNotFound {
                tool: tool.to_string(),
            }
        } else {
            MediaError::Io(e)
        }
    })
}

/// Drain a child's stderr on its own thread so the child never blocks on a
/// full pipe.
pub(crate) fn drain_stderr(child: &mut Child, tool: &str) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    let tool = tool.to_string();
    Some(std::thread::spawn(move || {
        let mut buf = String::new();
        match stderr.read_to_string(&mut buf) {
            Ok(_) => buf,
            Err(err) => format!("<failed to read {tool} stderr: {err}>"),
        }
    }))
}

pub(crate) fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|h| {
            h.join()
                .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
        })
        .unwrap_or_default()
}

/// Build the error for a tool that exited unsuccessfully.
pub(crate) fn failure(tool: &str, status: ExitStatus, stderr: &str) -> MediaError {
    MediaError::ProcessFailed {
        tool: tool.to_string(),
        status: status.to_string(),
        stderr: stderr.trim().to_string(),
    }
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
pub fn run_with_timeout(
    mut cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<ToolOutput, MediaError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn(&mut cmd, tool)?;

    let stdout_task = child.stdout.take().map(|mut stdout| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_task = drain_stderr(&mut child, tool);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(tool, timeout_secs = timeout.as_secs_f64(), "Tool timed out");
            return Err(MediaError::Timeout {
                tool: tool.to_string(),
                secs: timeout.as_secs_f64(),
            });
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stdout = stdout_task
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = join_stderr(stderr_task);

    Ok(ToolOutput {
        status,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists_for_shell() {
        assert!(command_exists("sh"));
        assert!(!command_exists("tickcap-definitely-not-a-command"));
    }

    #[test]
    fn test_command_exists_takes_path_literally() {
        // Shell syntax in a configured path is not interpreted.
        assert!(!command_exists("tickcap-definitely-not-a-command || true"));
        assert!(!command_exists("sh; true"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exists_with_spaces_in_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join("tickcap test tools dir");
        std::fs::create_dir_all(&dir).unwrap();
        let tool = dir.join("fake ffprobe");
        std::fs::write(&tool, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(command_exists(&tool.to_string_lossy()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let cmd = Command::new("tickcap-definitely-not-a-command");
        let err = run_with_timeout(cmd, "tickcap-definitely-not-a-command", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, MediaError::ToolNotFound { .. }));
    }

    #[test]
    fn test_captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'a\\nb\\n'");
        let out = run_with_timeout(cmd, "sh", Duration::from_secs(5)).unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout, b"a\nb\n");
    }

    #[test]
    fn test_slow_tool_times_out() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let err = run_with_timeout(cmd, "sh", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, MediaError::Timeout { .. }));
    }
}
