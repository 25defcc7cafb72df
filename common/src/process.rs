// External process supervision with bounded run time

use crate::errors::ProcessError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exit code and captured output of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run a command to completion and capture its output.
///
/// The child is killed when `limit` elapses.
pub async fn run_captured(
    mut cmd: Command,
    program: &str,
    limit: Duration,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| ProcessError::Timeout {
            program: program.to_string(),
            seconds: limit.as_secs(),
        })?
        .map_err(|e| ProcessError::Io {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    let code = output.status.code().unwrap_or(-1);
    debug!(program = %program, exit_code = code, "Process finished");

    Ok(ProcessOutput {
        code,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command while forwarding every stdout/stderr line to the log.
///
/// Returns the exit code; a process killed by a signal reports -1.
pub async fn run_streaming(
    mut cmd: Command,
    program: &str,
    limit: Duration,
) -> Result<i32, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, program.to_string(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, program.to_string(), "stderr"));
    }

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status.map_err(|e| ProcessError::Io {
            program: program.to_string(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            warn!(program = %program, seconds = limit.as_secs(), "Process timed out, killing it");
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill timed out process");
            }
            for reader in readers {
                reader.abort();
            }
            return Err(ProcessError::Timeout {
                program: program.to_string(),
                seconds: limit.as_secs(),
            });
        }
    };

    for reader in readers {
        let _ = reader.await;
    }

    let code = status.code().unwrap_or(-1);
    info!(program = %program, exit_code = code, success = status.success(), "Process exited");
    Ok(code)
}

fn forward_lines<R>(stream: R, program: String, stream_name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stream_name == "stderr" {
                warn!(program = %program, stream = stream_name, "{}", line);
            } else {
                info!(program = %program, stream = stream_name, "{}", line);
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_run_captured_collects_output() {
        let output = run_captured(sh("echo hello; echo oops >&2"), "sh", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_streaming_reports_exit_code() {
        let code = run_streaming(sh("echo working; exit 3"), "sh", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_run_streaming_times_out() {
        let err = run_streaming(sh("sleep 5"), "sh", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let cmd = Command::new("/definitely/not/a/binary");
        let err = run_captured(cmd, "missing", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
