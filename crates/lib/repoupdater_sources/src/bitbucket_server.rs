//! Bitbucket Server `Source` (spec.md §4.B). Enumerates via
//! `GET /rest/api/1.0/repos?start=N&limit=M`, which reports `isLastPage`
//! and `nextPageStart` directly in the response body rather than a Link
//! header. Folds exclude/include names to lower case, like GitHub
//! (spec.md §4.A).

use crate::errors::SourceError;
use crate::exclude::ExcludeMatcher;
use crate::source::{RepoDraft, Source, SourceResult, emit, make_repo};
use crate::template;
use async_trait::async_trait;
use repoupdater_externalservice::{BitbucketServerConnection, ExternalService};
use repoupdater_http::Client as HttpClient;
use repoupdater_types::RepoName;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_PATTERN: &str = "{host}/{projectKey}/{slug}";

#[derive(Debug, Deserialize)]
struct RawCloneLink {
    href: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    key: String,
}

#[derive(Debug, Deserialize)]
struct RawRepoLinks {
    #[serde(default)]
    clone: Vec<RawCloneLink>,
    #[serde(default)]
    #[serde(rename = "self")]
    self_links: Vec<RawCloneLink>,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    id: i64,
    slug: String,
    project: RawProject,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    description: Option<String>,
    links: RawRepoLinks,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    values: Vec<serde_json::Value>,
    #[serde(default)]
    is_last_page: bool,
    #[serde(default)]
    next_page_start: Option<i64>,
}

pub struct BitbucketServerSource {
    service: ExternalService,
    cfg: BitbucketServerConnection,
    client: Arc<HttpClient>,
    base_url: url::Url,
    exclude: ExcludeMatcher,
}

impl BitbucketServerSource {
    pub fn new(service: ExternalService, client: Arc<HttpClient>) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service.configuration().map_err(|source| SourceError::config(urn.clone(), source))? {
            repoupdater_externalservice::Configuration::BitbucketServer(cfg) => cfg,
            other => panic!("BitbucketServerSource constructed for non-bitbucket-server configuration: {:?}", other.kind()),
        };
        let base_url = service.base_url().map_err(|source| SourceError::config(urn.clone(), source))?;
        let exclude = ExcludeMatcher::new(&cfg.exclude, |s| s.to_lowercase())
            .map_err(|e| SourceError::TransientHost { urn, source: e.into() })?;
        Ok(Self { service, cfg, client, base_url, exclude })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    fn repo_name(&self, project_key: &str, slug: &str) -> RepoName {
        let host = self.base_url.host_str().unwrap_or("bitbucket.example.com");
        let pattern = self.cfg.repository_path_pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        let rendered = template::render(pattern, &[("host", host), ("projectKey", project_key), ("slug", slug)]);
        rendered.parse().unwrap_or_else(|_| format!("{host}/{project_key}/{slug}").parse().unwrap())
    }

    async fn into_repo(&self, raw: RawRepo, metadata: serde_json::Value) -> Result<repoupdater_types::Repo, SourceError> {
        let clone_url = raw
            .links
            .clone
            .iter()
            .find(|l| l.name == "http" || l.name == "https")
            .map(|l| l.href.clone())
            .ok_or_else(|| SourceError::TransientHost { urn: self.urn(), source: anyhow::anyhow!("repo has no http clone link") })?;
        let ssh_url = raw.links.clone.iter().find(|l| l.name == "ssh").map(|l| l.href.clone());
        let uri = raw.links.self_links.first().map(|l| l.href.clone());

        make_repo(
            &self.service,
            self.base_url.as_str(),
            self.cfg.git_url_type,
            self.cfg.token.as_deref(),
            self.cfg.username.as_deref(),
            None,
            RepoDraft {
                name: self.repo_name(&raw.project.key, &raw.slug),
                external_id: raw.id.to_string(),
                clone_url_https: clone_url,
                ssh_url,
                uri,
                description: raw.description,
                language: None,
                fork: false,
                archived: raw.archived,
                private: !raw.public,
                metadata,
            },
        )
    }

    async fn get_page(&self, path: &str, start: i64) -> Result<reqwest::Response, SourceError> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let url = self
            .base_url
            .join(&format!("rest/api/1.0/{path}{sep}start={start}&limit=100"))
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        self.client.throttle(&url).await;
        let mut request = self.client.request(reqwest::Method::GET, &url);
        if let Some(token) = &self.cfg.token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })
    }

    async fn yield_raw(&self, item: &serde_json::Value, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let Ok(raw) = serde_json::from_value::<RawRepo>(item.clone()) else { return };
        if !seen.insert(raw.id) {
            return;
        }
        let full_name = format!("{}/{}", raw.project.key, raw.slug);
        if self.exclude.excludes(&full_name, Some(&raw.id.to_string())) {
            return;
        }
        match self.into_repo(raw, item.clone()).await {
            Ok(repo) => emit(tx, SourceResult::ok(self.service.urn(), repo)).await,
            Err(e) => emit(tx, SourceResult::err(self.service.urn(), e)).await,
        }
    }

    async fn enumerate(&self, tx: &mpsc::Sender<SourceResult>) {
        let mut seen = HashSet::new();
        let mut start = 0i64;
        loop {
            let response = match self.get_page("repos", start).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    return;
                }
            };
            let page: RawPage = match response.json().await {
                Ok(v) => v,
                Err(source) => {
                    emit(tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
                    return;
                }
            };
            for item in &page.values {
                self.yield_raw(item, &mut seen, tx).await;
            }
            if page.is_last_page {
                return;
            }
            start = page.next_page_start.unwrap_or(start + page.values.len() as i64);
        }
    }

    async fn enumerate_explicit(&self, tx: &mpsc::Sender<SourceResult>) {
        let mut seen = HashSet::new();
        for full_name in &self.cfg.repos {
            if self.exclude.excludes(full_name, None) {
                continue;
            }
            let Some((project_key, slug)) = full_name.split_once('/') else { continue };
            let response = match self.get_page(&format!("projects/{project_key}/repos/{slug}"), 0).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    continue;
                }
            };
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                tracing::warn!(urn = %self.urn(), repo = full_name, "explicitly configured repo not found");
                continue;
            }
            let item: serde_json::Value = match response.json().await {
                Ok(v) => v,
                Err(_) => continue,
            };
            self.yield_raw(&item, &mut seen, tx).await;
        }
    }
}

#[async_trait]
impl Source for BitbucketServerSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        if !self.cfg.repository_query.iter().all(|mode| mode == "none") {
            self.enumerate(&tx).await;
        }
        if !self.cfg.repos.is_empty() {
            self.enumerate_explicit(&tx).await;
        }
    }
}
