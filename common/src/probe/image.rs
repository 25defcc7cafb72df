// Container image digest probe backed by a container CLI

use crate::errors::{ProbeError, ProcessError};
use crate::process::run_captured;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

/// The two container CLI operations the image probe relies on
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Repository digest of an image in the local store, `None` when the
    /// image is absent or has never been pulled from a registry
    async fn inspect_repo_digest(&self, image: &str) -> Result<Option<String>, ProbeError>;

    /// Force a pull of `image` from its registry
    async fn pull(&self, image: &str) -> Result<(), ProbeError>;
}

/// `docker` command line implementation
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    #[instrument(skip(self))]
    async fn inspect_repo_digest(&self, image: &str) -> Result<Option<String>, ProbeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["image", "inspect", "--format", "{{index .RepoDigests 0}}", image]);

        let output = run_captured(cmd, &self.binary, self.timeout)
            .await
            .map_err(|e| process_error(image, e))?;

        if !output.success() {
            let stderr = output.stderr.trim();
            if stderr.contains("No such image")
                || stderr.contains("No such object")
                || stderr.contains("index out of range")
            {
                debug!(image = %image, "Image not present locally");
                return Ok(None);
            }
            return Err(ProbeError::Transport {
                target: image.to_string(),
                reason: format!("inspect exited with {}: {}", output.code, stderr),
            });
        }

        parse_repo_digest(image, output.stdout.trim()).map(Some)
    }

    #[instrument(skip(self))]
    async fn pull(&self, image: &str) -> Result<(), ProbeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["pull", "--quiet", image]);

        let output = run_captured(cmd, &self.binary, self.timeout)
            .await
            .map_err(|e| process_error(image, e))?;

        if !output.success() {
            return Err(ProbeError::Transport {
                target: image.to_string(),
                reason: format!("pull exited with {}: {}", output.code, output.stderr.trim()),
            });
        }

        debug!(image = %image, "Image pulled");
        Ok(())
    }
}

fn process_error(image: &str, err: ProcessError) -> ProbeError {
    match err {
        ProcessError::Timeout { seconds, .. } => ProbeError::Timeout {
            target: image.to_string(),
            seconds,
        },
        other => ProbeError::Transport {
            target: image.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Digest part of a `name@sha256:...` repository digest
pub fn parse_repo_digest(image: &str, repo_digest: &str) -> Result<String, ProbeError> {
    match repo_digest.split_once('@') {
        Some((_, digest)) if !digest.is_empty() => Ok(digest.to_string()),
        _ => Err(ProbeError::Decode {
            target: image.to_string(),
            reason: format!("unexpected repository digest '{}'", repo_digest),
        }),
    }
}

/// Local and remote digest reads for one image reference
#[derive(Clone)]
pub struct ImageDigestProbe {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageDigestProbe {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Digest already present in the local image store, without contacting a registry
    pub async fn local_digest(&self, image: &str) -> Result<Option<String>, ProbeError> {
        self.runtime.inspect_repo_digest(image).await
    }

    /// Digest after a forced pull
    pub async fn remote_digest(&self, image: &str) -> Result<String, ProbeError> {
        self.runtime.pull(image).await?;
        self.runtime
            .inspect_repo_digest(image)
            .await?
            .ok_or_else(|| ProbeError::Decode {
                target: image.to_string(),
                reason: "no repository digest after pull".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Local store whose content is replaced by the registry's on pull
    struct FakeRuntime {
        local: Mutex<HashMap<String, String>>,
        registry: HashMap<String, String>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn inspect_repo_digest(&self, image: &str) -> Result<Option<String>, ProbeError> {
            Ok(self.local.lock().unwrap().get(image).cloned())
        }

        async fn pull(&self, image: &str) -> Result<(), ProbeError> {
            let digest = self.registry.get(image).cloned().ok_or_else(|| ProbeError::Transport {
                target: image.to_string(),
                reason: "manifest unknown".to_string(),
            })?;
            self.local.lock().unwrap().insert(image.to_string(), digest);
            Ok(())
        }
    }

    #[test]
    fn test_parse_repo_digest() {
        assert_eq!(
            parse_repo_digest("nginx", "nginx@sha256:abc").unwrap(),
            "sha256:abc"
        );
        assert!(parse_repo_digest("nginx", "sha256:abc").is_err());
        assert!(parse_repo_digest("nginx", "nginx@").is_err());
    }

    #[tokio::test]
    async fn test_local_then_remote_digest() {
        let runtime = Arc::new(FakeRuntime {
            local: Mutex::new(HashMap::from([("app:latest".to_string(), "sha256:AAA".to_string())])),
            registry: HashMap::from([("app:latest".to_string(), "sha256:BBB".to_string())]),
        });
        let probe = ImageDigestProbe::new(runtime);

        assert_eq!(probe.local_digest("app:latest").await.unwrap().as_deref(), Some("sha256:AAA"));
        assert_eq!(probe.remote_digest("app:latest").await.unwrap(), "sha256:BBB");
        assert_eq!(probe.local_digest("app:latest").await.unwrap().as_deref(), Some("sha256:BBB"));
    }

    #[tokio::test]
    async fn test_absent_image_has_no_local_digest() {
        let probe = ImageDigestProbe::new(Arc::new(FakeRuntime {
            local: Mutex::new(HashMap::new()),
            registry: HashMap::new(),
        }));
        assert!(probe.local_digest("ghost:1").await.unwrap().is_none());
        assert!(probe.remote_digest("ghost:1").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_docker_cli_reports_missing_binary_as_transport() {
        let cli = DockerCli::new("/definitely/not/docker", Duration::from_secs(1));
        let err = cli.inspect_repo_digest("app:latest").await.unwrap_err();
        assert!(matches!(err, ProbeError::Transport { .. }));
    }
}
