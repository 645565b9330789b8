//! GitHub `Source` (spec.md §4.B). Enumerates via the REST API: `public`
//! (since-id pagination), `affiliated` (page-numbered `user/repos`),
//! `search` (the GitHub code-search endpoint, its own rate budget), and
//! `explicit` (one GET per configured `owner/repo`).
//!
//! Grounded on `repositories/github.rs`'s GraphQL client shape
//! (`reqwest::Client` + bearer header + typed response), adapted from a
//! single-repo refresh client into a paginating enumerator, and on spec.md
//! §5's GitHub-specific rate-limit bypass policy.

use crate::changeset::{Changeset, ChangesetError, ChangesetSource, ChangesetSpec, ChangesetState};
use crate::errors::SourceError;
use crate::exclude::ExcludeMatcher;
use crate::source::{Source, SourceResult, emit, make_repo};
use crate::template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repoupdater_externalservice::{ExternalService, GitHubConnection};
use repoupdater_http::Client as HttpClient;
use repoupdater_types::RepoName;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use url::Url;

const DEFAULT_PATTERN: &str = "{host}/{nameWithOwner}";

/// The minimum remaining REST budget below which GitHub calls are skipped
/// for public repos and fail outright for private ones (spec.md §5).
const MIN_REMAINING_BUDGET: i64 = 50;

#[derive(Default)]
struct RateLimitState {
    remaining: Option<i64>,
    reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    fn update_from(&mut self, headers: &reqwest::header::HeaderMap) {
        if let Some(remaining) = header_i64(headers, "x-ratelimit-remaining") {
            self.remaining = Some(remaining);
        }
        if let Some(reset) = header_i64(headers, "x-ratelimit-reset") {
            self.reset_at = DateTime::from_timestamp(reset, 0);
        }
    }

    fn exhausted(&self) -> bool {
        match (self.remaining, self.reset_at) {
            (Some(remaining), Some(reset_at)) => remaining < MIN_REMAINING_BUDGET && reset_at > Utc::now(),
            _ => false,
        }
    }
}

fn header_i64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    id: i64,
    full_name: String,
    clone_url: String,
    ssh_url: Option<String>,
    html_url: Option<String>,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    private: bool,
}

pub struct GitHubSource {
    service: ExternalService,
    cfg: GitHubConnection,
    client: Arc<HttpClient>,
    base_url: Url,
    exclude: ExcludeMatcher,
    rate_limit: Mutex<RateLimitState>,
}

impl GitHubSource {
    pub fn new(service: ExternalService, client: Arc<HttpClient>) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service
            .configuration()
            .map_err(|source| SourceError::config(urn.clone(), source))?
        {
            repoupdater_externalservice::Configuration::GitHub(cfg) => cfg,
            other => panic!("GitHubSource constructed for non-github configuration: {:?}", other.kind()),
        };
        let base_url = service.base_url().map_err(|source| SourceError::config(urn.clone(), source))?;
        let exclude = ExcludeMatcher::new(&cfg.exclude, |s| s.to_lowercase())
            .map_err(|e| SourceError::TransientHost { urn, source: e.into() })?;
        Ok(Self { service, cfg, client, base_url, exclude, rate_limit: Mutex::new(RateLimitState::default()) })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    fn repo_name(&self, full_name: &str) -> RepoName {
        let host = self.base_url.host_str().unwrap_or("github.com");
        let pattern = self.cfg.repository_path_pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        let rendered = template::render(pattern, &[("host", host), ("nameWithOwner", full_name)]);
        rendered.parse().unwrap_or_else(|_| RepoName::try_from(full_name).expect("full_name is non-empty"))
    }

    fn into_repo(&self, raw: RawRepo, metadata: serde_json::Value) -> Result<repoupdater_types::Repo, SourceError> {
        make_repo(
            &self.service,
            self.base_url.as_str(),
            self.cfg.git_url_type,
            self.cfg.token.as_deref(),
            self.cfg.username.as_deref(),
            None,
            crate::source::RepoDraft {
                name: self.repo_name(&raw.full_name),
                external_id: raw.id.to_string(),
                clone_url_https: raw.clone_url,
                ssh_url: raw.ssh_url,
                uri: raw.html_url,
                description: raw.description,
                language: raw.language,
                fork: raw.fork,
                archived: raw.archived,
                private: raw.private,
                metadata,
            },
        )
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, SourceError> {
        {
            let state = self.rate_limit.lock().unwrap();
            if state.exhausted() {
                let (remaining, reset_at) = (state.remaining.unwrap_or(0), state.reset_at.unwrap_or_else(Utc::now));
                return Err(SourceError::RateLimitExhausted { urn: self.urn(), remaining, reset_at });
            }
        }
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &self.cfg.token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("token {token}").parse().expect("token header value"),
            );
        }
        let url = self.base_url.join(path).map_err(|source| SourceError::TransientHost {
            urn: self.urn(),
            source: source.into(),
        })?;
        self.client.throttle(&url).await;
        let response = self
            .client
            .request(reqwest::Method::GET, &url)
            .headers(headers)
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        self.rate_limit.lock().unwrap().update_from(response.headers());
        Ok(response)
    }

    async fn authenticated_request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, SourceError> {
        let url = self.base_url.join(path).map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        self.client.throttle(&url).await;
        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.cfg.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }
        Ok(request)
    }

    async fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, SourceError> {
        self.authenticated_request(reqwest::Method::POST, path)
            .await?
            .json(body)
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })
    }

    async fn patch<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, SourceError> {
        self.authenticated_request(reqwest::Method::PATCH, path)
            .await?
            .json(body)
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })
    }

    async fn set_pull_request_state(&self, external_id: &str, state: &str) -> Result<Changeset, ChangesetError> {
        let (repo, number) = split_external_id(external_id)?;
        let path = format!("repos/{repo}/pulls/{number}");
        let body = serde_json::json!({ "state": state });
        let raw: RawPullRequest = self
            .patch(&path, &body)
            .await?
            .json()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        Ok(raw.into_changeset(repo))
    }

    async fn enumerate_public(&self, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let mut since = 0i64;
        loop {
            let response = match self.get(&format!("repositories?since={since}")).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    return;
                }
            };
            let items: Vec<serde_json::Value> = match response.json().await {
                Ok(v) => v,
                Err(source) => {
                    emit(tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
                    return;
                }
            };
            if items.is_empty() {
                return;
            }
            for item in &items {
                since = since.max(item.get("id").and_then(|v| v.as_i64()).unwrap_or(since));
                self.yield_raw(item, seen, tx).await;
            }
        }
    }

    async fn enumerate_affiliated(&self, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let mut page = 1u32;
        loop {
            let response = match self.get(&format!("user/repos?per_page=100&page={page}&affiliation=owner,collaborator,organization_member")).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    return;
                }
            };
            let retry_after = recommended_wait(response.headers());
            let items: Vec<serde_json::Value> = match response.json().await {
                Ok(v) => v,
                Err(source) => {
                    emit(tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
                    return;
                }
            };
            if items.is_empty() {
                return;
            }
            for item in &items {
                self.yield_raw(item, seen, tx).await;
            }
            page += 1;
            tokio::time::sleep(retry_after).await;
        }
    }

    async fn enumerate_search(&self, query: &str, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let mut page = 1u32;
        loop {
            let encoded = urlencoding_query(query);
            let response = match self.get(&format!("search/repositories?q={encoded}&per_page=100&page={page}")).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    return;
                }
            };
            let body: serde_json::Value = match response.json().await {
                Ok(v) => v,
                Err(source) => {
                    emit(tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
                    return;
                }
            };
            let items = body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            if items.is_empty() {
                return;
            }
            for item in &items {
                self.yield_raw(item, seen, tx).await;
            }
            page += 1;
        }
    }

    async fn enumerate_explicit(&self, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        for full_name in &self.cfg.repos {
            if self.exclude.excludes(full_name, None) {
                continue;
            }
            let response = match self.get(&format!("repos/{full_name}")).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    continue;
                }
            };
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                warn!(urn = %self.urn(), repo = full_name, "explicitly configured repo not found");
                continue;
            }
            let item: serde_json::Value = match response.json().await {
                Ok(v) => v,
                Err(source) => {
                    emit(tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
                    continue;
                }
            };
            self.yield_raw(&item, seen, tx).await;
        }
    }

    async fn yield_raw(&self, item: &serde_json::Value, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let raw: RawRepo = match serde_json::from_value(item.clone()) {
            Ok(r) => r,
            Err(_) => return,
        };
        if !seen.insert(raw.id) {
            return;
        }
        if self.exclude.excludes(&raw.full_name, Some(&raw.id.to_string())) {
            return;
        }
        match self.into_repo(raw, item.clone()) {
            Ok(repo) => emit(tx, SourceResult::ok(self.service.urn(), repo)).await,
            Err(e) => emit(tx, SourceResult::err(self.service.urn(), e)).await,
        }
    }
}

/// GitHub's own rough per-page backoff recommendation: a fixed floor plus
/// whatever the secondary rate-limit header asks for (spec.md §4.B,
/// "between pages, sleep for the rate-limit monitor's recommended wait").
fn recommended_wait(headers: &reqwest::header::HeaderMap) -> std::time::Duration {
    let extra = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    std::time::Duration::from_millis(100 + extra * 1000)
}

fn urlencoding_query(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

#[derive(Debug, serde::Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    base: &'a str,
    head: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct UpdatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: i64,
    title: String,
    body: Option<String>,
    state: String,
    merged: bool,
    html_url: String,
    base: RawPullRequestRef,
    head: RawPullRequestRef,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestRef {
    #[serde(rename = "ref")]
    git_ref: String,
}

/// Splits the `"owner/repo#number"` form this `ChangesetSource` uses for
/// [`Changeset::external_id`] back into its path and PR number.
fn split_external_id(external_id: &str) -> Result<(&str, &str), ChangesetError> {
    external_id
        .split_once('#')
        .ok_or_else(|| ChangesetError::Source(SourceError::NotFound { urn: "github".to_string(), what: format!("malformed changeset id {external_id:?}") }))
}

impl RawPullRequest {
    fn into_changeset(self, repo_full_name: &str) -> Changeset {
        let state = if self.merged {
            ChangesetState::Merged
        } else if self.state == "closed" {
            ChangesetState::Closed
        } else {
            ChangesetState::Open
        };
        Changeset {
            external_id: format!("{repo_full_name}#{}", self.number),
            title: self.title,
            body: self.body.unwrap_or_default(),
            base_ref: self.base.git_ref,
            head_ref: self.head.git_ref,
            state,
            url: self.html_url,
        }
    }
}

#[async_trait]
impl ChangesetSource for GitHubSource {
    /// `spec.repo_external_id` is the `owner/repo` full name the pull
    /// request belongs to, not the host's numeric repository id. The
    /// returned [`Changeset::external_id`] is `"owner/repo#number"`, which
    /// every other method here takes back as its own `external_id`.
    async fn create_changeset(&self, spec: &ChangesetSpec) -> Result<Changeset, ChangesetError> {
        let path = format!("repos/{}/pulls", spec.repo_external_id);
        let body = CreatePullRequest { title: &spec.title, body: &spec.body, base: &spec.base_ref, head: &spec.head_ref };
        let response = self.post(&path, &body).await?;
        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ChangesetError::AlreadyExists { base_ref: spec.base_ref.clone(), head_ref: spec.head_ref.clone() });
        }
        let raw: RawPullRequest = response
            .json()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        Ok(raw.into_changeset(&spec.repo_external_id))
    }

    async fn load_changesets(&self, external_ids: &[String]) -> Result<Vec<Changeset>, ChangesetError> {
        let mut out = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            let (repo, number) = split_external_id(id)?;
            let response = self.get(&format!("repos/{repo}/pulls/{number}")).await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            let raw: RawPullRequest = response
                .json()
                .await
                .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
            out.push(raw.into_changeset(repo));
        }
        Ok(out)
    }

    async fn update_changeset(&self, external_id: &str, spec: &ChangesetSpec) -> Result<Changeset, ChangesetError> {
        let (repo, number) = split_external_id(external_id)?;
        let path = format!("repos/{repo}/pulls/{number}");
        let body = UpdatePullRequest { title: &spec.title, body: &spec.body, state: None };
        let raw: RawPullRequest = self
            .patch(&path, &body)
            .await?
            .json()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        Ok(raw.into_changeset(repo))
    }

    async fn close_changeset(&self, external_id: &str) -> Result<Changeset, ChangesetError> {
        self.set_pull_request_state(external_id, "closed").await
    }

    async fn reopen_changeset(&self, external_id: &str) -> Result<Changeset, ChangesetError> {
        self.set_pull_request_state(external_id, "open").await
    }
}

#[async_trait]
impl Source for GitHubSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        let mut seen = HashSet::new();
        for mode in &self.cfg.repository_query {
            match mode.as_str() {
                "public" => self.enumerate_public(&mut seen, &tx).await,
                "affiliated" => self.enumerate_affiliated(&mut seen, &tx).await,
                "none" => {}
                other if other.starts_with("search:") => {
                    self.enumerate_search(other.trim_start_matches("search:"), &mut seen, &tx).await
                }
                _ => {}
            }
        }
        if !self.cfg.repos.is_empty() {
            self.enumerate_explicit(&mut seen, &tx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use repoupdater_ratelimit::RateLimitRegistry;
    use std::sync::Arc;

    fn service(config: &str) -> ExternalService {
        let now = Utc::now();
        ExternalService {
            id: repoupdater_types::ExternalServiceId(1),
            kind: repoupdater_types::ExternalServiceKind::GitHub,
            display_name: "test".to_string(),
            config: config.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn client() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(Arc::new(RateLimitRegistry::new())).unwrap())
    }

    #[tokio::test]
    async fn enumerates_explicit_repos_and_skips_not_found() {
        let mut server = mockito::Server::new_async().await;
        let svc = service(&format!(
            r#"{{"url": "{}", "token": "t", "repositoryQuery": ["none"], "repos": ["acme/widgets", "acme/missing"]}}"#,
            server.url()
        ));
        let _found = server
            .mock("GET", "/repos/acme/widgets")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 1, "full_name": "acme/widgets", "clone_url": "https://github.com/acme/widgets.git", "ssh_url": "git@github.com:acme/widgets.git"}"#)
            .create_async()
            .await;
        let _missing = server.mock("GET", "/repos/acme/missing").with_status(404).create_async().await;

        let source = GitHubSource::new(svc, client()).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        source.list_repos(tx).await;

        let mut results = Vec::new();
        while let Some(r) = rx.recv().await {
            results.push(r);
        }
        assert_eq!(results.len(), 1);
        assert!(results[0].outcome.is_ok());
    }

    #[tokio::test]
    async fn excludes_configured_names() {
        let mut server = mockito::Server::new_async().await;
        let svc = service(&format!(
            r#"{{"url": "{}", "repositoryQuery": ["public"], "exclude": [{{"name": "acme/secret"}}]}}"#,
            server.url()
        ));
        let _m = server
            .mock("GET", mockito::Matcher::Regex("^/repositories.*".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(|req| {
                if req.path_and_query().contains("since=0") {
                    br#"[{"id": 1, "full_name": "acme/secret", "clone_url": "https://github.com/acme/secret.git"}]"#.to_vec()
                } else {
                    b"[]".to_vec()
                }
            })
            .create_async()
            .await;

        let source = GitHubSource::new(svc, client()).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        source.list_repos(tx).await;
        assert!(rx.recv().await.is_none());
    }
}
