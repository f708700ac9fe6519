//! Remote repository backend
//!
//! Talks to a GitHub-compatible contents API: files are read together with
//! their blob SHA, and a write must quote the SHA it replaces. The SHA is the
//! revision token used for optimistic concurrency.
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backend::BackendError;
use super::repo::{RevisionedFile, RevisionedFiles};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CONTENT_PATH: &str = "data/content.json";
pub const DEFAULT_BRANCH: &str = "main";

/// Remote repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// API root, e.g. https://api.github.com
    pub api_base: String,

    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Branch holding the content document
    pub branch: String,

    /// Path of the snapshot document inside the repository
    pub path: String,

    /// Access token sent as a bearer credential
    #[serde(skip_serializing)]
    pub token: String,
}

impl RepoConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let owner = std::env::var("CONTENT_REPO_OWNER").context("CONTENT_REPO_OWNER not set")?;
        let repo = std::env::var("CONTENT_REPO_NAME").context("CONTENT_REPO_NAME not set")?;
        let token = std::env::var("CONTENT_REPO_TOKEN").context("CONTENT_REPO_TOKEN not set")?;
        let api_base =
            std::env::var("CONTENT_REPO_API").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let branch =
            std::env::var("CONTENT_REPO_BRANCH").unwrap_or_else(|_| DEFAULT_BRANCH.to_string());
        let path = std::env::var("CONTENT_REPO_PATH")
            .unwrap_or_else(|_| DEFAULT_CONTENT_PATH.to_string());

        Ok(Self {
            api_base,
            owner,
            repo,
            branch,
            path,
            token,
        })
    }

    /// Contents endpoint for a file
    pub fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: WrittenFile,
}

#[derive(Deserialize)]
struct WrittenFile {
    sha: String,
}

/// HTTP client for the contents API
pub struct HttpRepository {
    config: RepoConfig,
    client: Client,
}

impl HttpRepository {
    pub fn new(config: RepoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("lexicon-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(header::ACCEPT, "application/vnd.github+json")
    }
}

#[async_trait]
impl RevisionedFiles for HttpRepository {
    async fn read_file(&self, path: &str) -> Result<Option<RevisionedFile>, BackendError> {
        let url = self.config.contents_url(path);

        let response = self
            .authorized(self.client.get(&url))
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await
            .map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!(
                "read {path} failed: {status} - {body}"
            )));
        }

        let file: ContentsResponse = response.json().await.map_err(unavailable)?;

        // The API wraps base64 payloads at 60 columns
        let encoded: String = file.content.split_whitespace().collect();
        let content = BASE64
            .decode(encoded.as_bytes())
            .map_err(|err| BackendError::Unavailable(format!("invalid base64 payload: {err}")))?;

        Ok(Some(RevisionedFile {
            revision: file.sha,
            content,
        }))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&str>,
    ) -> Result<String, BackendError> {
        let url = self.config.contents_url(path);
        let body = WriteRequest {
            message: format!("Update {path}"),
            content: BASE64.encode(content),
            branch: &self.config.branch,
            sha: revision,
        };

        let response = self
            .authorized(self.client.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            // 409 on a stale sha, 422 when creating over an existing file
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(BackendError::RevisionConflict(path.to_string()))
            }
            status if status.is_success() => {
                let written: WriteResponse = response.json().await.map_err(unavailable)?;
                Ok(written.content.sha)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Unavailable(format!(
                    "write {path} failed: {status} - {body}"
                )))
            }
        }
    }
}

fn unavailable(err: reqwest::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}
