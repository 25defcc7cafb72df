use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Watched Entities
// ============================================================================

/// Kind of external source an entity watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Repository,
    TagFlow,
    ImageFlow,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Repository => "repository",
            EntityKind::TagFlow => "tag_flow",
            EntityKind::ImageFlow => "image_flow",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable identity of a watched entity.
///
/// Repositories are keyed by URL, tag flows by (flow name, source URL) and
/// image flows by flow name. The `Display` form is the primary key used by
/// the state store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Repository { url: String },
    TagFlow { flow: String, url: String },
    ImageFlow { flow: String },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Repository { url } => write!(f, "repository:{}", url),
            EntityKey::TagFlow { flow, url } => write!(f, "tag-flow:{}@{}", flow, url),
            EntityKey::ImageFlow { flow } => write!(f, "image-flow:{}", flow),
        }
    }
}

/// What to do once a change has been detected: clone `source_url` at
/// `branch` into `destination`, then run `init_script` from the clone root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPlan {
    pub source_url: String,
    pub branch: String,
    pub destination: PathBuf,
    /// Script path relative to the clone root; empty means no script
    pub init_script: String,
    /// Attach the configured credential to the clone
    pub private: bool,
}

/// A repository whose branch head is watched
#[derive(Debug, Clone)]
pub struct WatchedRepository {
    pub name: String,
    pub url: String,
    pub branch: String,
    pub cron: String,
    pub private: bool,
    pub action: ActionPlan,
}

/// One (flow, source URL) pair of a tag flow
#[derive(Debug, Clone)]
pub struct WatchedTagFlow {
    pub flow_name: String,
    pub url: String,
    pub pattern: Regex,
    pub cron: String,
    pub action: ActionPlan,
}

/// A flow watching the content digests of an ordered list of images
#[derive(Debug, Clone)]
pub struct WatchedImageFlow {
    pub flow_name: String,
    pub images: Vec<String>,
    pub cron: String,
    pub action: ActionPlan,
}

#[derive(Debug, Clone)]
pub enum WatchedEntity {
    Repository(WatchedRepository),
    TagFlow(WatchedTagFlow),
    ImageFlow(WatchedImageFlow),
}

impl WatchedEntity {
    pub fn key(&self) -> EntityKey {
        match self {
            WatchedEntity::Repository(repo) => EntityKey::Repository {
                url: repo.url.clone(),
            },
            WatchedEntity::TagFlow(flow) => EntityKey::TagFlow {
                flow: flow.flow_name.clone(),
                url: flow.url.clone(),
            },
            WatchedEntity::ImageFlow(flow) => EntityKey::ImageFlow {
                flow: flow.flow_name.clone(),
            },
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            WatchedEntity::Repository(_) => EntityKind::Repository,
            WatchedEntity::TagFlow(_) => EntityKind::TagFlow,
            WatchedEntity::ImageFlow(_) => EntityKind::ImageFlow,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WatchedEntity::Repository(repo) => &repo.name,
            WatchedEntity::TagFlow(flow) => &flow.flow_name,
            WatchedEntity::ImageFlow(flow) => &flow.flow_name,
        }
    }

    pub fn cron(&self) -> &str {
        match self {
            WatchedEntity::Repository(repo) => &repo.cron,
            WatchedEntity::TagFlow(flow) => &flow.cron,
            WatchedEntity::ImageFlow(flow) => &flow.cron,
        }
    }

    pub fn action(&self) -> &ActionPlan {
        match self {
            WatchedEntity::Repository(repo) => &repo.action,
            WatchedEntity::TagFlow(flow) => &flow.action,
            WatchedEntity::ImageFlow(flow) => &flow.action,
        }
    }

    /// Display fields stored next to the persisted value.
    ///
    /// Image flows record the image whose digest moved, so `url` is supplied
    /// by the caller through [`StateDescriptor::with_url`].
    pub fn descriptor(&self) -> StateDescriptor {
        match self {
            WatchedEntity::Repository(repo) => StateDescriptor {
                kind: EntityKind::Repository,
                name: repo.name.clone(),
                url: repo.url.clone(),
                branch: Some(repo.branch.clone()),
                cron: repo.cron.clone(),
            },
            WatchedEntity::TagFlow(flow) => StateDescriptor {
                kind: EntityKind::TagFlow,
                name: flow.flow_name.clone(),
                url: flow.url.clone(),
                branch: None,
                cron: flow.cron.clone(),
            },
            WatchedEntity::ImageFlow(flow) => StateDescriptor {
                kind: EntityKind::ImageFlow,
                name: flow.flow_name.clone(),
                url: flow.images.first().cloned().unwrap_or_default(),
                branch: None,
                cron: flow.cron.clone(),
            },
        }
    }
}

// ============================================================================
// Persistence Models
// ============================================================================

/// Denormalized display fields written alongside a persisted value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDescriptor {
    pub kind: EntityKind,
    pub name: String,
    pub url: String,
    pub branch: Option<String>,
    pub cron: String,
}

impl StateDescriptor {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Last-observed value for one entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PersistedState {
    pub id: i64,
    pub entity_key: String,
    pub kind: String,
    pub name: String,
    pub url: String,
    pub branch: Option<String>,
    pub cron: String,
    pub last_value: String,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row for a successful action cycle
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub entity_key: String,
    pub observed_value: String,
    pub executed_at: DateTime<Utc>,
}

/// Execution record joined with its entity's display fields
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionDetail {
    pub entity_name: String,
    pub entity_url: String,
    pub entity_kind: String,
    pub observed_value: String,
    pub executed_at: DateTime<Utc>,
}

/// Repository name derived from its URL: last path segment without `.git`
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn plan() -> ActionPlan {
        ActionPlan {
            source_url: "https://github.com/acme/deploy.git".to_string(),
            branch: "main".to_string(),
            destination: PathBuf::from("/srv/deploy"),
            init_script: "init.sh".to_string(),
            private: false,
        }
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::TagFlow {
            flow: "release".to_string(),
            url: "https://github.com/acme/api".to_string(),
        };
        assert_eq!(key.to_string(), "tag-flow:release@https://github.com/acme/api");

        let key = EntityKey::ImageFlow {
            flow: "edge".to_string(),
        };
        assert_eq!(key.to_string(), "image-flow:edge");
    }

    #[test]
    fn test_tag_flows_sharing_a_name_have_distinct_keys() {
        let make = |url: &str| {
            WatchedEntity::TagFlow(WatchedTagFlow {
                flow_name: "release".to_string(),
                url: url.to_string(),
                pattern: Regex::new("^v").unwrap(),
                cron: "*/5 * * * *".to_string(),
                action: plan(),
            })
        };
        let a = make("https://github.com/acme/api");
        let b = make("https://github.com/acme/web");
        assert_ne!(a.key(), b.key());
        assert_eq!(a.kind(), EntityKind::TagFlow);
    }

    #[test]
    fn test_repository_descriptor_carries_branch() {
        let entity = WatchedEntity::Repository(WatchedRepository {
            name: "deploy".to_string(),
            url: "https://github.com/acme/deploy.git".to_string(),
            branch: "main".to_string(),
            cron: "0 * * * *".to_string(),
            private: false,
            action: plan(),
        });
        let descriptor = entity.descriptor();
        assert_eq!(descriptor.branch.as_deref(), Some("main"));
        assert_eq!(descriptor.kind, EntityKind::Repository);
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(repo_name_from_url("https://github.com/acme/deploy.git"), "deploy");
        assert_eq!(repo_name_from_url("https://github.com/acme/deploy"), "deploy");
        assert_eq!(repo_name_from_url("https://github.com/acme/deploy/"), "deploy");
        assert_eq!(repo_name_from_url("git@github.com:deploy.git"), "deploy");
    }

    proptest! {
        #[test]
        fn prop_repo_name_is_last_segment(
            owner in "[a-z][a-z0-9-]{0,12}",
            name in "[a-z][a-z0-9_-]{0,12}",
            dot_git in any::<bool>(),
        ) {
            let suffix = if dot_git { ".git" } else { "" };
            let url = format!("https://github.com/{}/{}{}", owner, name, suffix);
            prop_assert_eq!(repo_name_from_url(&url), name);
        }
    }
}
