// HTTP client for the gitwatch API

use anyhow::{Context, Result};
use common::auth::SecretToken;
use common::models::ExecutionDetail;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    message: String,
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    token: SecretToken,
}

impl ApiClient {
    pub fn new(base_url: &str, token: SecretToken) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("gwctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// `GET /status`
    pub async fn status(&self) -> Result<String> {
        let response = self.get("/status", &[]).await?;
        response.text().await.context("Failed to read status response")
    }

    /// `GET /api/executions`
    pub async fn list_executions(&self, limit: Option<u32>) -> Result<Vec<ExecutionDetail>> {
        let query: Vec<(&str, String)> = limit
            .map(|limit| vec![("limit", limit.to_string())])
            .unwrap_or_default();
        let response = self.get("/api/executions", &query).await?;
        let envelope: DataEnvelope<Vec<ExecutionDetail>> = response
            .json()
            .await
            .context("Failed to decode executions response")?;
        Ok(envelope.data)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token.expose())
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        match response.json::<ApiError>().await {
            Ok(body) => anyhow::bail!("{} ({}): {}", status, body.error, body.message),
            Err(_) => anyhow::bail!("{} from {}", status, url),
        }
    }
}
