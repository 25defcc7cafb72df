// Shallow branch clones through the git command line

use crate::auth::SecretToken;
use crate::errors::{PipelineError, ProcessError};
use crate::process::run_streaming;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

/// One clone of a single branch at depth 1
#[derive(Debug, Clone, Copy)]
pub struct CloneRequest<'a> {
    pub url: &'a str,
    pub branch: &'a str,
    pub destination: &'a Path,
    pub credential: Option<&'a SecretToken>,
}

/// Version control operations used by the action pipeline
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `request.branch` of `request.url` into an empty `request.destination`
    async fn shallow_clone(&self, request: CloneRequest<'_>) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, request: &CloneRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(request.branch)
            .arg("--")
            .arg(request.url)
            .arg(request.destination)
            .env("GIT_TERMINAL_PROMPT", "0");

        if let Some(token) = request.credential {
            for (key, value) in credential_env(token) {
                cmd.env(key, value);
            }
        }
        cmd
    }
}

#[async_trait]
impl SourceControl for GitCli {
    #[instrument(skip(self, request), fields(url = %request.url, branch = %request.branch))]
    async fn shallow_clone(&self, request: CloneRequest<'_>) -> Result<(), PipelineError> {
        let code = run_streaming(self.command(&request), &self.binary, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Timeout { seconds, .. } => PipelineError::Timeout {
                    step: "clone".to_string(),
                    seconds,
                },
                other => PipelineError::Transport {
                    program: self.binary.clone(),
                    reason: other.to_string(),
                },
            })?;

        if code != 0 {
            return Err(PipelineError::CloneFailed {
                url: request.url.to_string(),
                branch: request.branch.to_string(),
                code,
            });
        }
        Ok(())
    }
}

/// Environment that makes git send the token as an HTTP header, keeping it
/// out of the URL, the command line and the clone's `.git/config`
pub fn credential_env(token: &SecretToken) -> [(&'static str, String); 3] {
    let basic = STANDARD.encode(format!("x-access-token:{}", token.expose()));
    [
        ("GIT_CONFIG_COUNT", "1".to_string()),
        ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()),
        ("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {}", basic)),
    ]
}
