// Declarative watch list (repos.yaml) and its translation into watched entities

use crate::errors::ValidationError;
use crate::models::{
    repo_name_from_url, ActionPlan, WatchedEntity, WatchedImageFlow, WatchedRepository,
    WatchedTagFlow,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Top-level layout of the watch list file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchList {
    #[serde(default)]
    pub repos: BTreeMap<String, RepoEntry>,
    #[serde(default)]
    pub flux: BTreeMap<String, TagFlowEntry>,
    #[serde(default)]
    pub continuous: BTreeMap<String, ImageFlowEntry>,
}

/// A repository whose branch head is watched and cloned into `path/<repo name>`
#[derive(Debug, Clone, Deserialize)]
pub struct RepoEntry {
    pub url: String,
    pub watcher: String,
    #[serde(default)]
    pub init: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub path: String,
    #[serde(default)]
    pub auth: bool,
}

/// Tag flow: every URL is probed for a tag matching `regex`; a new match
/// clones `init_repo` into `path`
#[derive(Debug, Clone, Deserialize)]
pub struct TagFlowEntry {
    pub urls: Vec<String>,
    pub watcher: String,
    pub regex: String,
    pub init_repo: String,
    #[serde(default)]
    pub init: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub path: String,
    #[serde(default)]
    pub auth: bool,
}

/// Image flow: the first image whose digest moves clones `init_repo` into `path`
#[derive(Debug, Clone, Deserialize)]
pub struct ImageFlowEntry {
    pub images: Vec<String>,
    pub watcher: String,
    pub init_repo: String,
    #[serde(default)]
    pub init: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub path: String,
    #[serde(default)]
    pub auth: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

impl WatchList {
    /// Read and parse a watch list file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ValidationError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ValidationError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Translate the watch list into entities.
    ///
    /// Tag flows fan out to one entity per URL. Entries that fail validation
    /// are logged and dropped without affecting the rest of the list.
    pub fn into_entities(self) -> Vec<WatchedEntity> {
        let mut entities = Vec::new();

        for (name, entry) in self.repos {
            match repository_entity(&name, entry) {
                Ok(entity) => entities.push(entity),
                Err(e) => error!(entity = %name, kind = "repository", error = %e, "Dropping invalid repository entry"),
            }
        }

        for (name, entry) in self.flux {
            match tag_flow_entities(&name, entry) {
                Ok(mut flows) => entities.append(&mut flows),
                Err(e) => error!(entity = %name, kind = "tag_flow", error = %e, "Dropping invalid tag flow entry"),
            }
        }

        for (name, entry) in self.continuous {
            match image_flow_entity(&name, entry) {
                Ok(entity) => entities.push(entity),
                Err(e) => error!(entity = %name, kind = "image_flow", error = %e, "Dropping invalid image flow entry"),
            }
        }

        info!(count = entities.len(), "Watch list translated into entities");
        entities
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidFieldValue {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn repository_entity(name: &str, entry: RepoEntry) -> Result<WatchedEntity, ValidationError> {
    require("url", &entry.url)?;
    require("watcher", &entry.watcher)?;
    require("path", &entry.path)?;

    let destination = PathBuf::from(&entry.path).join(repo_name_from_url(&entry.url));
    let action = ActionPlan {
        source_url: entry.url.clone(),
        branch: entry.branch.clone(),
        destination,
        init_script: entry.init,
        private: entry.auth,
    };

    Ok(WatchedEntity::Repository(WatchedRepository {
        name: name.to_string(),
        url: entry.url,
        branch: entry.branch,
        cron: entry.watcher,
        private: entry.auth,
        action,
    }))
}

fn tag_flow_entities(name: &str, entry: TagFlowEntry) -> Result<Vec<WatchedEntity>, ValidationError> {
    require("watcher", &entry.watcher)?;
    require("init_repo", &entry.init_repo)?;
    require("path", &entry.path)?;
    if entry.urls.is_empty() {
        return Err(ValidationError::InvalidFieldValue {
            field: "urls".to_string(),
            reason: "at least one URL is required".to_string(),
        });
    }

    let pattern = Regex::new(&entry.regex).map_err(|e| ValidationError::InvalidFieldValue {
        field: "regex".to_string(),
        reason: e.to_string(),
    })?;

    let action = ActionPlan {
        source_url: entry.init_repo,
        branch: entry.branch,
        destination: PathBuf::from(&entry.path),
        init_script: entry.init,
        private: entry.auth,
    };

    let mut flows = Vec::with_capacity(entry.urls.len());
    for url in entry.urls {
        require("urls[]", &url)?;
        flows.push(WatchedEntity::TagFlow(WatchedTagFlow {
            flow_name: name.to_string(),
            url,
            pattern: pattern.clone(),
            cron: entry.watcher.clone(),
            action: action.clone(),
        }));
    }
    Ok(flows)
}

fn image_flow_entity(name: &str, entry: ImageFlowEntry) -> Result<WatchedEntity, ValidationError> {
    require("watcher", &entry.watcher)?;
    require("init_repo", &entry.init_repo)?;
    require("path", &entry.path)?;
    if entry.images.is_empty() {
        return Err(ValidationError::InvalidFieldValue {
            field: "images".to_string(),
            reason: "at least one image is required".to_string(),
        });
    }

    Ok(WatchedEntity::ImageFlow(WatchedImageFlow {
        flow_name: name.to_string(),
        images: entry.images,
        cron: entry.watcher,
        action: ActionPlan {
            source_url: entry.init_repo,
            branch: entry.branch,
            destination: PathBuf::from(&entry.path),
            init_script: entry.init,
            private: entry.auth,
        },
    }))
}
