// Init script execution inside a fresh clone

use crate::errors::{PipelineError, ProcessError};
use crate::process::run_streaming;
use std::path::{Component, Path};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// No script configured or the file does not exist in the clone
    Skipped,
    Executed,
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `script` (relative to `clone_root`) with the clone root as working directory
    #[instrument(skip(self, clone_root), fields(clone_root = %clone_root.display()))]
    pub async fn run(&self, clone_root: &Path, script: &str) -> Result<ScriptOutcome, PipelineError> {
        if script.trim().is_empty() {
            return Ok(ScriptOutcome::Skipped);
        }

        let relative = Path::new(script);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(PipelineError::Filesystem {
                path: script.to_string(),
                reason: "init script must be a relative path inside the clone".to_string(),
            });
        }

        let root = tokio::fs::canonicalize(clone_root)
            .await
            .map_err(|e| fs_error(clone_root, e))?;
        let script_path = root.join(relative);

        match tokio::fs::metadata(&script_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(PipelineError::Filesystem {
                    path: script_path.display().to_string(),
                    reason: "init script is not a regular file".to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(script = %script, "Init script not present, skipping");
                return Ok(ScriptOutcome::Skipped);
            }
            Err(e) => return Err(fs_error(&script_path, e)),
        }

        make_executable(&script_path).await?;

        let mut cmd = Command::new(&script_path);
        cmd.current_dir(&root);

        let code = run_streaming(cmd, script, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Timeout { seconds, .. } => PipelineError::Timeout {
                    step: format!("init script {}", script),
                    seconds,
                },
                other => PipelineError::Transport {
                    program: script.to_string(),
                    reason: other.to_string(),
                },
            })?;

        if code != 0 {
            return Err(PipelineError::ScriptExecution {
                script: script.to_string(),
                code,
            });
        }

        info!(script = %script, "Init script completed");
        Ok(ScriptOutcome::Executed)
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), PipelineError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750))
        .await
        .map_err(|e| fs_error(path, e))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), PipelineError> {
    Ok(())
}

fn fs_error(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::Filesystem {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
