//! The mirror-fetch RPC consumed by the update loop (spec.md §6:
//! `requestRepoUpdate(ctx, {name, cloneURL}, sinceHint) →
//! {lastFetched, lastChanged, err}`, `IsRepoCloneable(ctx, {name, url}) →
//! err`).

use crate::queue::ConfiguredRepo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repoupdater_http::Client as HttpClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct RepoUpdateResponse {
    pub last_fetched: Option<DateTime<Utc>>,
    pub last_changed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error)]
pub enum GitserverError {
    #[error("transient mirror backend error: {0}")]
    Transient(String),
    #[error("not cloneable: {0}")]
    NotCloneable(String),
}

/// `requestRepoUpdate`/`IsRepoCloneable` (spec.md §6). A real
/// implementation talks to the mirror backend over HTTP
/// ([`HttpGitserverClient`]); tests use [`FakeGitserverClient`].
#[async_trait]
pub trait GitserverClient: Send + Sync {
    async fn request_repo_update(
        &self,
        repo: &ConfiguredRepo,
        since_hint: Option<Duration>,
    ) -> Result<RepoUpdateResponse, GitserverError>;

    async fn is_repo_cloneable(&self, repo: &ConfiguredRepo) -> Result<(), GitserverError>;
}

#[derive(serde::Serialize)]
struct UpdateRequest<'a> {
    name: &'a str,
    #[serde(rename = "cloneURL")]
    clone_url: &'a str,
    #[serde(rename = "sinceSeconds", skip_serializing_if = "Option::is_none")]
    since_seconds: Option<u64>,
}

#[derive(serde::Deserialize)]
struct UpdateResponseBody {
    #[serde(rename = "lastFetched")]
    last_fetched: Option<DateTime<Utc>>,
    #[serde(rename = "lastChanged")]
    last_changed: Option<DateTime<Utc>>,
}

#[derive(serde::Serialize)]
struct CloneableRequest<'a> {
    name: &'a str,
    url: &'a str,
}

/// Talks to the mirror backend's `/repo-update` and `/is-cloneable`
/// endpoints over the workspace's shared, rate-limited [`HttpClient`].
pub struct HttpGitserverClient {
    http: Arc<HttpClient>,
    base_url: Url,
}

impl HttpGitserverClient {
    pub fn new(http: Arc<HttpClient>, base_url: Url) -> Self {
        Self { http, base_url }
    }

    fn join(&self, path: &str) -> Result<Url, GitserverError> {
        self.base_url.join(path).map_err(|e| GitserverError::Transient(e.to_string()))
    }
}

#[async_trait]
impl GitserverClient for HttpGitserverClient {
    async fn request_repo_update(
        &self,
        repo: &ConfiguredRepo,
        since_hint: Option<Duration>,
    ) -> Result<RepoUpdateResponse, GitserverError> {
        let url = self.join("repo-update")?;
        self.http.throttle(&url).await;

        let body = UpdateRequest {
            name: repo.name.as_str(),
            clone_url: repo.clone_url.as_str(),
            since_seconds: since_hint.map(|d| d.as_secs()),
        };
        let response = self
            .http
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GitserverError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GitserverError::Transient(format!("mirror backend returned {}", response.status())));
        }
        let parsed: UpdateResponseBody =
            response.json().await.map_err(|e| GitserverError::Transient(e.to_string()))?;
        Ok(RepoUpdateResponse { last_fetched: parsed.last_fetched, last_changed: parsed.last_changed })
    }

    async fn is_repo_cloneable(&self, repo: &ConfiguredRepo) -> Result<(), GitserverError> {
        let url = self.join("is-cloneable")?;
        self.http.throttle(&url).await;

        let body = CloneableRequest { name: repo.name.as_str(), url: repo.clone_url.as_str() };
        let response = self
            .http
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GitserverError::Transient(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.unwrap_or_default();
            Err(GitserverError::NotCloneable(text))
        } else {
            Err(GitserverError::Transient(format!("mirror backend returned {}", response.status())))
        }
    }
}

/// An in-memory [`GitserverClient`] for deterministic tests: canned
/// responses per repo name, falling back to an empty success, plus a call
/// log testers can assert on.
#[derive(Debug, Default)]
pub struct FakeGitserverClient {
    responses: Mutex<HashMap<String, Result<RepoUpdateResponse, GitserverError>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGitserverClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_response(&self, repo_name: &str, response: Result<RepoUpdateResponse, GitserverError>) {
        self.responses.lock().unwrap().insert(repo_name.to_string(), response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitserverClient for FakeGitserverClient {
    async fn request_repo_update(
        &self,
        repo: &ConfiguredRepo,
        _since_hint: Option<Duration>,
    ) -> Result<RepoUpdateResponse, GitserverError> {
        self.calls.lock().unwrap().push(repo.name.as_str().to_string());
        self.responses
            .lock()
            .unwrap()
            .get(repo.name.as_str())
            .cloned()
            .unwrap_or(Ok(RepoUpdateResponse { last_fetched: None, last_changed: None }))
    }

    async fn is_repo_cloneable(&self, _repo: &ConfiguredRepo) -> Result<(), GitserverError> {
        Ok(())
    }
}
