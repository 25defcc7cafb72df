// Detection + action cycle for a single watched entity
//
// A cycle reads the persisted value, probes the source, and on change runs the
// action pipeline. The new value is persisted (with its execution record) only
// after the pipeline succeeds.

use crate::errors::CycleError;
use crate::models::{
    EntityKey, StateDescriptor, WatchedEntity, WatchedImageFlow, WatchedRepository, WatchedTagFlow,
};
use crate::pipeline::ActionPipeline;
use crate::probe::{GitHubClient, ImageDigestProbe};
use crate::storage::StateStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

/// Result of a cycle that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Probed value equals the persisted one
    Unchanged,
    /// A change was detected, the pipeline succeeded and `value` was persisted
    Applied { value: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::Applied { .. } => "applied",
        }
    }
}

/// Runs one cycle for an entity. Implemented by [`CycleRunner`] and by test doubles.
#[async_trait]
pub trait CycleExecutor: Send + Sync {
    async fn run_cycle(&self, entity: &WatchedEntity) -> Result<CycleOutcome, CycleError>;
}

pub struct CycleRunner {
    store: Arc<dyn StateStore>,
    github: GitHubClient,
    images: ImageDigestProbe,
    pipeline: ActionPipeline,
    /// Pre-pull baseline of images whose triggered action did not complete,
    /// keyed by (flow, image). Cleared once the action succeeds.
    pending_images: Mutex<HashMap<(String, String), Option<String>>>,
}

impl CycleRunner {
    pub fn new(
        store: Arc<dyn StateStore>,
        github: GitHubClient,
        images: ImageDigestProbe,
        pipeline: ActionPipeline,
    ) -> Self {
        Self {
            store,
            github,
            images,
            pipeline,
            pending_images: Mutex::new(HashMap::new()),
        }
    }

    /// Record the current matching tag of a tag flow without running its
    /// action, if nothing is persisted for it yet. Returns the seeded tag.
    #[instrument(skip(self, entity), fields(entity = %entity.key()))]
    pub async fn seed_tag_baseline(&self, entity: &WatchedEntity) -> Result<Option<String>, CycleError> {
        let WatchedEntity::TagFlow(flow) = entity else {
            return Ok(None);
        };

        let key = entity.key();
        if self.store.get(&key).await?.is_some() {
            return Ok(None);
        }

        let tag = self.github.first_matching_tag(&flow.url, &flow.pattern).await?;
        self.store.put(&key, &tag, &entity.descriptor()).await?;
        info!(value = %tag, "Tag baseline seeded");
        Ok(Some(tag))
    }

    async fn repository_cycle(
        &self,
        entity: &WatchedEntity,
        repo: &WatchedRepository,
    ) -> Result<CycleOutcome, CycleError> {
        let key = entity.key();
        let baseline = self.store.get(&key).await?;
        let current = self
            .github
            .latest_commit(&repo.url, &repo.branch, repo.private)
            .await?;

        self.apply_if_changed(entity, &key, baseline, current, entity.descriptor())
            .await
    }

    async fn tag_flow_cycle(
        &self,
        entity: &WatchedEntity,
        flow: &WatchedTagFlow,
    ) -> Result<CycleOutcome, CycleError> {
        let key = entity.key();
        let baseline = self.store.get(&key).await?;
        let current = self.github.first_matching_tag(&flow.url, &flow.pattern).await?;

        self.apply_if_changed(entity, &key, baseline, current, entity.descriptor())
            .await
    }

    async fn apply_if_changed(
        &self,
        entity: &WatchedEntity,
        key: &EntityKey,
        baseline: Option<String>,
        current: String,
        descriptor: StateDescriptor,
    ) -> Result<CycleOutcome, CycleError> {
        if baseline.as_deref() == Some(current.as_str()) {
            info!(value = %current, "No change detected");
            return Ok(CycleOutcome::Unchanged);
        }

        info!(
            previous = baseline.as_deref().unwrap_or("<none>"),
            value = %current,
            "Change detected, running action pipeline"
        );
        self.pipeline.run(entity.action()).await?;
        self.store
            .record_success(key, &current, &descriptor, Utc::now())
            .await?;

        Ok(CycleOutcome::Applied { value: current })
    }

    /// Compare images in order; the first one whose digest moved triggers the
    /// flow's action and ends the cycle.
    async fn image_flow_cycle(
        &self,
        entity: &WatchedEntity,
        flow: &WatchedImageFlow,
    ) -> Result<CycleOutcome, CycleError> {
        let key = entity.key();
        let persisted = self.store.get(&key).await?;
        let mut last_error: Option<CycleError> = None;
        let mut failed = 0usize;

        for image in &flow.images {
            let local = match self.images.local_digest(image).await {
                Ok(local) => local,
                Err(e) => {
                    warn!(image = %image, error = %e, "Failed to read local digest, skipping image");
                    failed += 1;
                    last_error = Some(e.into());
                    continue;
                }
            };

            let pending_key = (flow.flow_name.clone(), image.clone());
            let baseline = match self.pending_baseline(&pending_key) {
                Some(pending) => pending,
                None => local.or_else(|| persisted.clone()),
            };

            let remote = match self.images.remote_digest(image).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(image = %image, error = %e, "Failed to read remote digest, skipping image");
                    failed += 1;
                    last_error = Some(e.into());
                    continue;
                }
            };

            if baseline.as_deref() == Some(remote.as_str()) {
                info!(image = %image, value = %remote, "No digest change");
                continue;
            }

            info!(
                image = %image,
                previous = baseline.as_deref().unwrap_or("<none>"),
                value = %remote,
                "Digest change detected, running action pipeline"
            );

            let descriptor = entity.descriptor().with_url(image.clone());
            let applied = async {
                self.pipeline.run(&flow.action).await?;
                self.store
                    .record_success(&key, &remote, &descriptor, Utc::now())
                    .await?;
                Ok::<(), CycleError>(())
            }
            .await;

            return match applied {
                Ok(()) => {
                    self.clear_pending(&flow.flow_name);
                    Ok(CycleOutcome::Applied { value: remote })
                }
                Err(e) => {
                    self.remember_pending(pending_key, baseline);
                    Err(e)
                }
            };
        }

        match last_error {
            Some(e) if failed == flow.images.len() => Err(e),
            _ => Ok(CycleOutcome::Unchanged),
        }
    }

    fn pending_baseline(&self, key: &(String, String)) -> Option<Option<String>> {
        let pending = self.pending_images.lock().unwrap_or_else(|p| p.into_inner());
        pending.get(key).cloned()
    }

    fn remember_pending(&self, key: (String, String), baseline: Option<String>) {
        let mut pending = self.pending_images.lock().unwrap_or_else(|p| p.into_inner());
        pending.entry(key).or_insert(baseline);
    }

    /// The action covers every image of the flow, so one success clears them all
    fn clear_pending(&self, flow_name: &str) {
        let mut pending = self.pending_images.lock().unwrap_or_else(|p| p.into_inner());
        pending.retain(|(flow, _), _| flow != flow_name);
    }
}

#[async_trait]
impl CycleExecutor for CycleRunner {
    #[instrument(skip(self, entity), fields(entity = %entity.key(), kind = %entity.kind()))]
    async fn run_cycle(&self, entity: &WatchedEntity) -> Result<CycleOutcome, CycleError> {
        match entity {
            WatchedEntity::Repository(repo) => self.repository_cycle(entity, repo).await,
            WatchedEntity::TagFlow(flow) => self.tag_flow_cycle(entity, flow).await,
            WatchedEntity::ImageFlow(flow) => self.image_flow_cycle(entity, flow).await,
        }
    }
}
