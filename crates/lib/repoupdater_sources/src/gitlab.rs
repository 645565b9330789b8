//! GitLab `Source` (spec.md §4.B). Enumerates via the REST API with
//! page-number pagination: `affiliated` (`GET /projects?membership=true`),
//! `search`/project-query (group paths from `projectQuery`), and `explicit`
//! (one GET per configured project path or id). GitLab preserves name case
//! when folding exclude/include entries (spec.md §4.A), unlike GitHub and
//! BitbucketServer.
//!
//! Grounded on `repositories/gitlab.rs`'s client shape, adapted from a
//! single-project refresh into a paginating enumerator.

use crate::changeset::{Changeset, ChangesetError, ChangesetSource, ChangesetSpec, ChangesetState};
use crate::errors::SourceError;
use crate::exclude::ExcludeMatcher;
use crate::source::{RepoDraft, Source, SourceResult, emit, make_repo};
use crate::template;
use async_trait::async_trait;
use repoupdater_externalservice::{ExternalService, GitLabConnection};
use repoupdater_http::Client as HttpClient;
use repoupdater_types::RepoName;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_PATTERN: &str = "{host}/{pathWithNamespace}";

#[derive(Debug, Deserialize)]
struct RawProject {
    id: i64,
    path_with_namespace: String,
    http_url_to_repo: String,
    ssh_url_to_repo: Option<String>,
    web_url: Option<String>,
    description: Option<String>,
    #[serde(default)]
    archived: bool,
    #[serde(default, rename = "visibility")]
    visibility: String,
    #[serde(default)]
    forked_from_project: Option<serde_json::Value>,
}

pub struct GitLabSource {
    service: ExternalService,
    cfg: GitLabConnection,
    client: Arc<HttpClient>,
    base_url: url::Url,
    exclude: ExcludeMatcher,
}

impl GitLabSource {
    pub fn new(service: ExternalService, client: Arc<HttpClient>) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service.configuration().map_err(|source| SourceError::config(urn.clone(), source))? {
            repoupdater_externalservice::Configuration::GitLab(cfg) => cfg,
            other => panic!("GitLabSource constructed for non-gitlab configuration: {:?}", other.kind()),
        };
        let base_url = service.base_url().map_err(|source| SourceError::config(urn.clone(), source))?;
        let exclude = ExcludeMatcher::new(&cfg.exclude, |s| s.to_string())
            .map_err(|e| SourceError::TransientHost { urn, source: e.into() })?;
        Ok(Self { service, cfg, client, base_url, exclude })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    fn repo_name(&self, path_with_namespace: &str) -> RepoName {
        let host = self.base_url.host_str().unwrap_or("gitlab.com");
        let pattern = self.cfg.repository_path_pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        let rendered = template::render(pattern, &[("host", host), ("pathWithNamespace", path_with_namespace)]);
        rendered.parse().unwrap_or_else(|_| RepoName::try_from(path_with_namespace).expect("non-empty path"))
    }

    async fn get_json(&self, path: &str) -> Result<reqwest::Response, SourceError> {
        let url = self.base_url.join(path).map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        self.client.throttle(&url).await;
        let mut request = self.client.request(reqwest::Method::GET, &url);
        if let Some(token) = &self.cfg.token {
            request = request.header("PRIVATE-TOKEN", token);
        }
        request
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })
    }

    fn into_repo(&self, raw: RawProject, metadata: serde_json::Value) -> Result<repoupdater_types::Repo, SourceError> {
        make_repo(
            &self.service,
            self.base_url.as_str(),
            self.cfg.git_url_type,
            self.cfg.token.as_deref(),
            None,
            None,
            RepoDraft {
                name: self.repo_name(&raw.path_with_namespace),
                external_id: raw.id.to_string(),
                clone_url_https: raw.http_url_to_repo,
                ssh_url: raw.ssh_url_to_repo,
                uri: raw.web_url,
                description: raw.description,
                language: None,
                fork: raw.forked_from_project.is_some(),
                archived: raw.archived,
                private: raw.visibility == "private",
                metadata,
            },
        )
    }

    async fn yield_raw(&self, item: &serde_json::Value, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let Ok(raw) = serde_json::from_value::<RawProject>(item.clone()) else { return };
        if !seen.insert(raw.id) {
            return;
        }
        if self.exclude.excludes(&raw.path_with_namespace, Some(&raw.id.to_string())) {
            return;
        }
        match self.into_repo(raw, item.clone()) {
            Ok(repo) => emit(tx, SourceResult::ok(self.service.urn(), repo)).await,
            Err(e) => emit(tx, SourceResult::err(self.service.urn(), e)).await,
        }
    }

    async fn enumerate_pages(&self, path_prefix: &str, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        let mut page = 1u32;
        loop {
            let sep = if path_prefix.contains('?') { '&' } else { '?' };
            let response = match self.get_json(&format!("{path_prefix}{sep}per_page=100&page={page}")).await {
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
                self.yield_raw(item, seen, tx).await;
            }
            page += 1;
        }
    }

    async fn write_request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, SourceError> {
        let url = self.base_url.join(path).map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        self.client.throttle(&url).await;
        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.cfg.token {
            request = request.header("PRIVATE-TOKEN", token);
        }
        Ok(request)
    }

    async fn enumerate_explicit(&self, seen: &mut HashSet<i64>, tx: &mpsc::Sender<SourceResult>) {
        for project in &self.cfg.projects {
            if self.exclude.excludes(project, None) {
                continue;
            }
            let encoded = url::form_urlencoded::byte_serialize(project.as_bytes()).collect::<String>();
            let response = match self.get_json(&format!("api/v4/projects/{encoded}")).await {
                Ok(r) => r,
                Err(e) => {
                    emit(tx, SourceResult::err(self.service.urn(), e)).await;
                    continue;
                }
            };
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                tracing::warn!(urn = %self.urn(), project, "explicitly configured project not found");
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
}

#[derive(Debug, serde::Serialize)]
struct CreateMergeRequest<'a> {
    title: &'a str,
    description: &'a str,
    source_branch: &'a str,
    target_branch: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct UpdateMergeRequest<'a> {
    title: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_event: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RawMergeRequest {
    iid: i64,
    title: String,
    description: Option<String>,
    state: String,
    source_branch: String,
    target_branch: String,
    web_url: String,
}

impl RawMergeRequest {
    fn into_changeset(self, project: &str) -> Changeset {
        let state = match self.state.as_str() {
            "merged" => ChangesetState::Merged,
            "closed" => ChangesetState::Closed,
            _ => ChangesetState::Open,
        };
        Changeset {
            external_id: format!("{project}#{}", self.iid),
            title: self.title,
            body: self.description.unwrap_or_default(),
            base_ref: self.target_branch,
            head_ref: self.source_branch,
            state,
            url: self.web_url,
        }
    }
}

/// Splits the `"project#iid"` form this `ChangesetSource` uses for
/// [`Changeset::external_id`] back into the project path/id and the
/// merge request's internal id.
fn split_external_id(external_id: &str) -> Result<(&str, &str), ChangesetError> {
    external_id.split_once('#').ok_or_else(|| {
        ChangesetError::Source(SourceError::NotFound {
            urn: "gitlab".to_string(),
            what: format!("malformed changeset id {external_id:?}"),
        })
    })
}

#[async_trait]
impl ChangesetSource for GitLabSource {
    /// `spec.repo_external_id` is the project's path-with-namespace or
    /// numeric id. The returned [`Changeset::external_id`] is
    /// `"project#iid"`, which every other method here takes back as its
    /// own `external_id`.
    async fn create_changeset(&self, spec: &ChangesetSpec) -> Result<Changeset, ChangesetError> {
        let encoded = url::form_urlencoded::byte_serialize(spec.repo_external_id.as_bytes()).collect::<String>();
        let path = format!("api/v4/projects/{encoded}/merge_requests");
        let body = CreateMergeRequest {
            title: &spec.title,
            description: &spec.body,
            source_branch: &spec.head_ref,
            target_branch: &spec.base_ref,
        };
        let response = self
            .write_request(reqwest::Method::POST, &path)
            .await?
            .json(&body)
            .send()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(ChangesetError::AlreadyExists { base_ref: spec.base_ref.clone(), head_ref: spec.head_ref.clone() });
        }
        let raw: RawMergeRequest = response
            .json()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        Ok(raw.into_changeset(&spec.repo_external_id))
    }

    async fn load_changesets(&self, external_ids: &[String]) -> Result<Vec<Changeset>, ChangesetError> {
        let mut out = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            let (project, iid) = split_external_id(id)?;
            let encoded = url::form_urlencoded::byte_serialize(project.as_bytes()).collect::<String>();
            let path = format!("api/v4/projects/{encoded}/merge_requests/{iid}");
            let response = self
                .write_request(reqwest::Method::GET, &path)
                .await?
                .send()
                .await
                .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            let raw: RawMergeRequest = response
                .json()
                .await
                .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
            out.push(raw.into_changeset(project));
        }
        Ok(out)
    }

    async fn update_changeset(&self, external_id: &str, spec: &ChangesetSpec) -> Result<Changeset, ChangesetError> {
        let (project, iid) = split_external_id(external_id)?;
        self.put_merge_request(project, iid, &spec.title, &spec.body, None).await
    }

    async fn close_changeset(&self, external_id: &str) -> Result<Changeset, ChangesetError> {
        let (project, iid) = split_external_id(external_id)?;
        let current = self.load_one(project, iid).await?;
        self.put_merge_request(project, iid, &current.title, &current.body, Some("close")).await
    }

    async fn reopen_changeset(&self, external_id: &str) -> Result<Changeset, ChangesetError> {
        let (project, iid) = split_external_id(external_id)?;
        let current = self.load_one(project, iid).await?;
        self.put_merge_request(project, iid, &current.title, &current.body, Some("reopen")).await
    }
}

impl GitLabSource {
    async fn load_one(&self, project: &str, iid: &str) -> Result<Changeset, ChangesetError> {
        let encoded = url::form_urlencoded::byte_serialize(project.as_bytes()).collect::<String>();
        let path = format!("api/v4/projects/{encoded}/merge_requests/{iid}");
        let raw: RawMergeRequest = self
            .write_request(reqwest::Method::GET, &path)
            .await?
            .send()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?
            .json()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        Ok(raw.into_changeset(project))
    }

    async fn put_merge_request(
        &self,
        project: &str,
        iid: &str,
        title: &str,
        body: &str,
        state_event: Option<&str>,
    ) -> Result<Changeset, ChangesetError> {
        let encoded = url::form_urlencoded::byte_serialize(project.as_bytes()).collect::<String>();
        let path = format!("api/v4/projects/{encoded}/merge_requests/{iid}");
        let update = UpdateMergeRequest { title, description: body, state_event };
        let raw: RawMergeRequest = self
            .write_request(reqwest::Method::PUT, &path)
            .await?
            .json(&update)
            .send()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?
            .json()
            .await
            .map_err(|source| ChangesetError::Source(SourceError::TransientHost { urn: self.urn(), source: source.into() }))?;
        Ok(raw.into_changeset(project))
    }
}

#[async_trait]
impl Source for GitLabSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        let mut seen = HashSet::new();
        for mode in &self.cfg.project_query {
            match mode.as_str() {
                "none" => {}
                "affiliated" => self.enumerate_pages("api/v4/projects?membership=true", &mut seen, &tx).await,
                group if group.starts_with("groups/") => {
                    let group_path = group.trim_start_matches("groups/");
                    let encoded = url::form_urlencoded::byte_serialize(group_path.as_bytes()).collect::<String>();
                    self.enumerate_pages(&format!("api/v4/groups/{encoded}/projects"), &mut seen, &tx).await;
                }
                _ => {}
            }
        }
        if !self.cfg.projects.is_empty() {
            self.enumerate_explicit(&mut seen, &tx).await;
        }
    }
}
