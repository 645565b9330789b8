//! Bitbucket Cloud `Source` (spec.md §4.B). Enumerates
//! `GET /2.0/repositories/{workspace}`, one call per configured team/
//! workspace, following the `next` URL the API hands back on each page
//! rather than computing an offset ourselves.

use crate::errors::SourceError;
use crate::exclude::ExcludeMatcher;
use crate::source::{RepoDraft, Source, SourceResult, emit, make_repo};
use async_trait::async_trait;
use repoupdater_externalservice::{BitbucketCloudConnection, ExternalService};
use repoupdater_http::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct RawCloneLink {
    href: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawLinks {
    #[serde(default)]
    clone: Vec<RawCloneLink>,
    html: Option<RawCloneLink>,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    uuid: String,
    full_name: String,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    parent: Option<serde_json::Value>,
    links: RawLinks,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    values: Vec<serde_json::Value>,
    next: Option<String>,
}

pub struct BitbucketCloudSource {
    service: ExternalService,
    cfg: BitbucketCloudConnection,
    client: Arc<HttpClient>,
    base_url: url::Url,
    exclude: ExcludeMatcher,
}

impl BitbucketCloudSource {
    pub fn new(service: ExternalService, client: Arc<HttpClient>) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service.configuration().map_err(|source| SourceError::config(urn.clone(), source))? {
            repoupdater_externalservice::Configuration::BitbucketCloud(cfg) => cfg,
            other => panic!("BitbucketCloudSource constructed for non-bitbucket-cloud configuration: {:?}", other.kind()),
        };
        let base_url = service.base_url().map_err(|source| SourceError::config(urn.clone(), source))?;
        let exclude = ExcludeMatcher::new(&cfg.exclude, |s| s.to_lowercase())
            .map_err(|e| SourceError::TransientHost { urn, source: e.into() })?;
        Ok(Self { service, cfg, client, base_url, exclude })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    async fn into_repo(&self, raw: RawRepo, metadata: serde_json::Value) -> Result<repoupdater_types::Repo, SourceError> {
        let clone_url = raw
            .links
            .clone
            .iter()
            .find(|l| l.name == "https")
            .map(|l| l.href.clone())
            .ok_or_else(|| SourceError::TransientHost { urn: self.urn(), source: anyhow::anyhow!("repo has no https clone link") })?;
        let ssh_url = raw.links.clone.iter().find(|l| l.name == "ssh").map(|l| l.href.clone());

        make_repo(
            &self.service,
            self.base_url.as_str(),
            repoupdater_externalservice::GitUrlType::Http,
            self.cfg.app_password.as_deref(),
            self.cfg.username.as_deref(),
            self.cfg.app_password.as_deref(),
            RepoDraft {
                name: format!("bitbucket.org/{}", raw.full_name).parse().expect("full_name is non-empty"),
                external_id: raw.uuid,
                clone_url_https: clone_url,
                ssh_url,
                uri: raw.links.html.map(|l| l.href),
                description: raw.description,
                language: raw.language,
                fork: raw.parent.is_some(),
                archived: false,
                private: raw.is_private,
                metadata,
            },
        )
    }

    async fn yield_raw(&self, item: &serde_json::Value, seen: &mut HashSet<String>, tx: &mpsc::Sender<SourceResult>) {
        let Ok(raw) = serde_json::from_value::<RawRepo>(item.clone()) else { return };
        if !seen.insert(raw.uuid.clone()) {
            return;
        }
        if self.exclude.excludes(&raw.full_name, Some(&raw.uuid)) {
            return;
        }
        match self.into_repo(raw, item.clone()).await {
            Ok(repo) => emit(tx, SourceResult::ok(self.service.urn(), repo)).await,
            Err(e) => emit(tx, SourceResult::err(self.service.urn(), e)).await,
        }
    }

    async fn enumerate_workspace(&self, workspace: &str, seen: &mut HashSet<String>, tx: &mpsc::Sender<SourceResult>) {
        let mut next = self.base_url.join(&format!("2.0/repositories/{workspace}")).ok();
        while let Some(url) = next.take() {
            self.client.throttle(&url).await;
            let mut request = self.client.request(reqwest::Method::GET, &url);
            if let Some(password) = &self.cfg.app_password {
                if let Some(username) = &self.cfg.username {
                    request = request.basic_auth(username, Some(password));
                }
            }
            let response = match request.send().await {
                Ok(r) => r,
                Err(source) => {
                    emit(tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
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
                self.yield_raw(item, seen, tx).await;
            }
            next = page.next.and_then(|n| n.parse().ok());
        }
    }
}

#[async_trait]
impl Source for BitbucketCloudSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        let mut seen = HashSet::new();
        for team in &self.cfg.teams {
            self.enumerate_workspace(team, &mut seen, &tx).await;
        }
        for full_name in &self.cfg.repos {
            if self.exclude.excludes(full_name, None) {
                continue;
            }
            let Ok(url) = self.base_url.join(&format!("2.0/repositories/{full_name}")) else { continue };
            self.client.throttle(&url).await;
            let response = match self.client.request(reqwest::Method::GET, &url).send().await {
                Ok(r) => r,
                Err(source) => {
                    emit(&tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
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
            self.yield_raw(&item, &mut seen, &tx).await;
        }
    }
}
