// GitHub REST probes: branch head commit and pattern-matched tags

use crate::auth::SecretToken;
use crate::config::GitHubConfig;
use crate::errors::ProbeError;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const TAGS_PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    name: String,
}

/// Client for the commits and tags endpoints of the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: Option<SecretToken>,
    max_tag_pages: u32,
    timeout_seconds: u64,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("gitwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Transport {
                target: config.api_url.clone(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config
                .token
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(SecretToken::new),
            max_tag_pages: config.max_tag_pages,
            timeout_seconds: config.timeout_seconds,
        })
    }

    /// SHA of the head commit of `branch`.
    ///
    /// The token is attached only for private repositories.
    #[instrument(skip(self))]
    pub async fn latest_commit(
        &self,
        repo_url: &str,
        branch: &str,
        private: bool,
    ) -> Result<String, ProbeError> {
        let (owner, repo) = owner_and_repo(repo_url)?;
        let url = format!("{}/repos/{}/{}/commits/{}", self.api_url, owner, repo, branch);

        let mut request = self.client.get(&url);
        if private {
            request = self.authorize(request);
        }

        let commit: CommitResponse = self.fetch_json(request, &url).await?;
        if commit.sha.is_empty() {
            return Err(ProbeError::Decode {
                target: url,
                reason: "empty sha".to_string(),
            });
        }

        debug!(sha = %commit.sha, "Fetched head commit");
        Ok(commit.sha)
    }

    /// First tag, in upstream list order, whose name matches `pattern`.
    ///
    /// Pages are requested until an empty page or the configured page limit.
    #[instrument(skip(self, pattern), fields(pattern = %pattern))]
    pub async fn first_matching_tag(
        &self,
        repo_url: &str,
        pattern: &Regex,
    ) -> Result<String, ProbeError> {
        let (owner, repo) = owner_and_repo(repo_url)?;
        let mut scanned = 0usize;

        for page in 1..=self.max_tag_pages {
            let url = format!(
                "{}/repos/{}/{}/tags?page={}&per_page={}",
                self.api_url, owner, repo, page, TAGS_PER_PAGE
            );
            let request = self.authorize(self.client.get(&url));
            let tags: Vec<TagResponse> = self.fetch_json(request, &url).await?;

            if tags.is_empty() {
                return Err(ProbeError::NoMatch {
                    repository: repo_url.to_string(),
                    pattern: pattern.to_string(),
                    detail: format!("{} tags scanned", scanned),
                });
            }

            scanned += tags.len();
            if let Some(tag) = tags.into_iter().find(|t| pattern.is_match(&t.name)) {
                debug!(tag = %tag.name, page, "Found matching tag");
                return Ok(tag.name);
            }
        }

        Err(ProbeError::NoMatch {
            repository: repo_url.to_string(),
            pattern: pattern.to_string(),
            detail: format!(
                "page limit of {} reached after {} tags",
                self.max_tag_pages, scanned
            ),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    async fn fetch_json<T>(&self, request: RequestBuilder, url: &str) -> Result<T, ProbeError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = request
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProbeError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        serde_json::from_slice(&body).map_err(|e| ProbeError::Decode {
            target: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout {
                target: url.to_string(),
                seconds: self.timeout_seconds,
            }
        } else {
            ProbeError::Transport {
                target: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Owner and repository name from an HTTPS or SCP-style repository URL
pub fn owner_and_repo(repo_url: &str) -> Result<(String, String), ProbeError> {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);

    let segments: Vec<&str> = without_scheme
        .split(['/', ':'])
        .filter(|s| !s.is_empty())
        .collect();

    // host, owner, repo at minimum
    if segments.len() < 3 {
        return Err(ProbeError::UnsupportedUrl(repo_url.to_string()));
    }

    let repo = segments[segments.len() - 1];
    let owner = segments[segments.len() - 2];
    Ok((owner.to_string(), repo.to_string()))
}
