// Action pipeline: fresh shallow clone followed by an optional init script

pub mod git;
pub mod script;

pub use git::{CloneRequest, GitCli, SourceControl};
pub use script::{ScriptOutcome, ScriptRunner};

use crate::auth::SecretToken;
use crate::errors::PipelineError;
use crate::models::ActionPlan;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

/// Runs the clone + init script sequence for a detected change.
///
/// Steps run strictly in order and the first failure aborts the sequence.
/// Runs targeting the same destination are serialized.
#[derive(Clone)]
pub struct ActionPipeline {
    vcs: Arc<dyn SourceControl>,
    scripts: ScriptRunner,
    credential: Option<SecretToken>,
    destinations: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ActionPipeline {
    pub fn new(
        vcs: Arc<dyn SourceControl>,
        scripts: ScriptRunner,
        credential: Option<SecretToken>,
    ) -> Self {
        Self {
            vcs,
            scripts,
            credential,
            destinations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_destination(&self, destination: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.destinations.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(destination.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[instrument(skip(self, plan), fields(source = %plan.source_url, destination = %plan.destination.display()))]
    pub async fn run(&self, plan: &ActionPlan) -> Result<ScriptOutcome, PipelineError> {
        let _destination = self.lock_destination(&plan.destination).await;

        if let Some(parent) = plan.destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fs_error(parent, e))?;
        }

        remove_existing(&plan.destination).await?;

        let credential = if plan.private {
            if self.credential.is_none() {
                warn!("Private clone requested but no token is configured");
            }
            self.credential.as_ref()
        } else {
            None
        };

        info!(step = "clone", branch = %plan.branch, "Cloning");
        self.vcs
            .shallow_clone(CloneRequest {
                url: &plan.source_url,
                branch: &plan.branch,
                destination: &plan.destination,
                credential,
            })
            .await?;

        info!(step = "init_script", script = %plan.init_script, "Running init script");
        self.scripts.run(&plan.destination, &plan.init_script).await
    }
}

/// Delete whatever currently sits at `path`; clones always start from scratch
async fn remove_existing(path: &Path) -> Result<(), PipelineError> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(fs_error(path, e)),
    };

    info!(step = "remove_existing", path = %path.display(), "Removing previous clone");
    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(|e| fs_error(path, e))
}

fn fs_error(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::Filesystem {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Writes a fixed file set into the destination instead of cloning
    struct FakeVcs {
        files: Vec<(&'static str, &'static str)>,
        fail: bool,
        saw_credential: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl SourceControl for FakeVcs {
        async fn shallow_clone(&self, request: CloneRequest<'_>) -> Result<(), PipelineError> {
            self.saw_credential
                .lock()
                .unwrap()
                .push(request.credential.is_some());
            if self.fail {
                return Err(PipelineError::CloneFailed {
                    url: request.url.to_string(),
                    branch: request.branch.to_string(),
                    code: 128,
                });
            }
            std::fs::create_dir_all(request.destination).unwrap();
            for (name, content) in &self.files {
                std::fs::write(request.destination.join(name), content).unwrap();
            }
            Ok(())
        }
    }

    fn pipeline(vcs: Arc<FakeVcs>) -> ActionPipeline {
        ActionPipeline::new(
            vcs,
            ScriptRunner::new(Duration::from_secs(10)),
            Some(SecretToken::new("tok")),
        )
    }

    fn plan(destination: &Path, private: bool) -> ActionPlan {
        ActionPlan {
            source_url: "https://github.com/acme/infra".to_string(),
            branch: "main".to_string(),
            destination: destination.to_path_buf(),
            init_script: "init.sh".to_string(),
            private,
        }
    }

    #[tokio::test]
    async fn test_stale_files_are_removed_before_clone() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("infra");
        std::fs::create_dir_all(&destination).unwrap();
        std::fs::write(destination.join("old.txt"), "stale").unwrap();

        let vcs = Arc::new(FakeVcs {
            files: vec![("README.md", "fresh")],
            fail: false,
            saw_credential: Mutex::new(Vec::new()),
        });
        let outcome = pipeline(vcs).run(&plan(&destination, false)).await.unwrap();

        assert_eq!(outcome, ScriptOutcome::Skipped);
        assert!(!destination.join("old.txt").exists());
        assert!(destination.join("README.md").exists());
    }

    #[tokio::test]
    async fn test_missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a").join("b").join("infra");
        let vcs = Arc::new(FakeVcs {
            files: vec![("init.sh", "#!/bin/sh\ntouch done\n")],
            fail: false,
            saw_credential: Mutex::new(Vec::new()),
        });

        let outcome = pipeline(vcs).run(&plan(&destination, false)).await.unwrap();
        assert_eq!(outcome, ScriptOutcome::Executed);
        assert!(destination.join("done").exists());
    }

    #[tokio::test]
    async fn test_clone_failure_stops_before_script() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("infra");
        let vcs = Arc::new(FakeVcs {
            files: vec![],
            fail: true,
            saw_credential: Mutex::new(Vec::new()),
        });

        let err = pipeline(vcs).run(&plan(&destination, false)).await.unwrap_err();
        assert!(matches!(err, PipelineError::CloneFailed { code: 128, .. }));
    }

    #[tokio::test]
    async fn test_credential_only_passed_for_private_plans() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(FakeVcs {
            files: vec![],
            fail: false,
            saw_credential: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline(vcs.clone());

        pipeline.run(&plan(&dir.path().join("public"), false)).await.unwrap();
        pipeline.run(&plan(&dir.path().join("private"), true)).await.unwrap();

        assert_eq!(*vcs.saw_credential.lock().unwrap(), vec![false, true]);
    }

    /// Tracks how many clones overlap in time
    #[derive(Default)]
    struct SlowVcs {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SourceControl for SlowVcs {
        async fn shallow_clone(&self, request: CloneRequest<'_>) -> Result<(), PipelineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::create_dir_all(request.destination).unwrap();
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_into_same_destination_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(SlowVcs::default());
        let pipeline = ActionPipeline::new(vcs.clone(), ScriptRunner::new(Duration::from_secs(5)), None);
        let shared = plan(&dir.path().join("shared"), false);

        let (a, b) = tokio::join!(pipeline.run(&shared), pipeline.run(&shared));
        a.unwrap();
        b.unwrap();
        assert_eq!(vcs.peak.load(Ordering::SeqCst), 1);

        let one = plan(&dir.path().join("one"), false);
        let two = plan(&dir.path().join("two"), false);
        let (c, d) = tokio::join!(pipeline.run(&one), pipeline.run(&two));
        c.unwrap();
        d.unwrap();
        assert_eq!(vcs.peak.load(Ordering::SeqCst), 2);
    }
}
