//! AWS CodeCommit `Source` (spec.md §4.B). CodeCommit has no meaningful
//! base URL (spec.md §4.A `BaseURL`) — the region selects the endpoint
//! instead — and its JSON 1.1 API requires SigV4-signed requests, so this
//! `Source` builds its own `Authorization` header via [`crate::sigv4`]
//! rather than going through the shared throttled [`repoupdater_http::Client`]
//! helpers the other sources use for plain bearer/basic auth.

use crate::errors::SourceError;
use crate::exclude::ExcludeMatcher;
use crate::sigv4::{self, SigningKey};
use crate::source::{RepoDraft, Source, SourceResult, emit, make_repo};
use async_trait::async_trait;
use chrono::Utc;
use repoupdater_externalservice::{AwsCodeCommitConnection, ExternalService};
use repoupdater_http::Client as HttpClient;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct RepositoryNameId {
    #[serde(rename = "repositoryName")]
    repository_name: String,
    #[serde(rename = "repositoryId")]
    repository_id: String,
}

#[derive(Debug, Deserialize)]
struct ListRepositoriesResult {
    repositories: Vec<RepositoryNameId>,
    #[serde(rename = "nextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryMetadata {
    #[serde(rename = "repositoryId")]
    repository_id: String,
    #[serde(rename = "repositoryName")]
    repository_name: String,
    #[serde(rename = "repositoryDescription")]
    repository_description: Option<String>,
    #[serde(rename = "cloneUrlHttp")]
    clone_url_http: String,
    #[serde(rename = "cloneUrlSsh")]
    clone_url_ssh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchGetRepositoriesResult {
    repositories: Vec<RepositoryMetadata>,
}

pub struct AwsCodeCommitSource {
    service: ExternalService,
    cfg: AwsCodeCommitConnection,
    client: Arc<HttpClient>,
    exclude: ExcludeMatcher,
}

impl AwsCodeCommitSource {
    pub fn new(service: ExternalService, client: Arc<HttpClient>) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service.configuration().map_err(|source| SourceError::config(urn.clone(), source))? {
            repoupdater_externalservice::Configuration::AwsCodeCommit(cfg) => cfg,
            other => panic!("AwsCodeCommitSource constructed for non-aws-code-commit configuration: {:?}", other.kind()),
        };
        let exclude = ExcludeMatcher::new(&cfg.exclude, |s| s.to_lowercase())
            .map_err(|source| SourceError::TransientHost { urn, source: source.into() })?;
        Ok(Self { service, cfg, client, exclude })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    fn endpoint(&self) -> String {
        format!("https://codecommit.{}.amazonaws.com/", self.cfg.region)
    }

    async fn call(&self, target: &str, body: serde_json::Value) -> Result<serde_json::Value, SourceError> {
        let url: url::Url = self.endpoint().parse().map_err(|source: url::ParseError| {
            SourceError::TransientHost { urn: self.urn(), source: source.into() }
        })?;
        self.client.throttle(&url).await;

        let body = serde_json::to_string(&body).expect("request body serializes");
        let key = SigningKey {
            access_key_id: &self.cfg.access_key_id,
            secret_access_key: &self.cfg.secret_access_key,
            region: &self.cfg.region,
        };
        let (authorization, amz_date) = sigv4::sign_codecommit_request(&key, target, &body, Utc::now());

        let response = self
            .client
            .request(reqwest::Method::POST, &url)
            .header("content-type", "application/x-amz-json-1.1")
            .header("x-amz-target", target)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?
            .error_for_status()
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;

        response
            .json()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })
    }

    async fn list_repository_names(&self) -> Result<Vec<RepositoryNameId>, SourceError> {
        let mut all = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = serde_json::json!({});
            if let Some(token) = &next_token {
                body["nextToken"] = serde_json::Value::String(token.clone());
            }
            let raw = self.call("CodeCommit_20150413.ListRepositories", body).await?;
            let page: ListRepositoriesResult = serde_json::from_value(raw).map_err(|source| {
                SourceError::TransientHost { urn: self.urn(), source: source.into() }
            })?;
            next_token = page.next_token.clone();
            all.extend(page.repositories);
            if next_token.is_none() {
                return Ok(all);
            }
        }
    }

    async fn batch_get(&self, names: &[String]) -> Result<Vec<RepositoryMetadata>, SourceError> {
        let raw = self
            .call("CodeCommit_20150413.BatchGetRepositories", serde_json::json!({ "repositoryNames": names }))
            .await?;
        let result: BatchGetRepositoriesResult =
            serde_json::from_value(raw).map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        Ok(result.repositories)
    }

    fn into_repo(&self, meta: RepositoryMetadata) -> Result<repoupdater_types::Repo, SourceError> {
        make_repo(
            &self.service,
            &self.cfg.region,
            repoupdater_externalservice::GitUrlType::Http,
            self.cfg.git_credentials.as_deref(),
            None,
            None,
            RepoDraft {
                name: format!("codecommit.{}.amazonaws.com/{}", self.cfg.region, meta.repository_name)
                    .parse()
                    .expect("region and repo name are non-empty"),
                external_id: meta.repository_id,
                clone_url_https: meta.clone_url_http,
                ssh_url: meta.clone_url_ssh,
                uri: None,
                description: meta.repository_description,
                language: None,
                fork: false,
                archived: false,
                private: true,
                metadata: serde_json::json!({ "repositoryName": meta.repository_name }),
            },
        )
    }
}

#[async_trait]
impl Source for AwsCodeCommitSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        let names = match self.list_repository_names().await {
            Ok(n) => n,
            Err(e) => {
                emit(&tx, SourceResult::err(self.service.urn(), e)).await;
                return;
            }
        };
        if names.is_empty() {
            return;
        }
        // CodeCommit caps BatchGetRepositories at 25 names per call.
        for chunk in names.chunks(25) {
            let chunk_names: Vec<String> = chunk.iter().map(|n| n.repository_name.clone()).collect();
            match self.batch_get(&chunk_names).await {
                Ok(repos) => {
                    for meta in repos {
                        if self.exclude.excludes(&meta.repository_name, Some(&meta.repository_id)) {
                            continue;
                        }
                        match self.into_repo(meta) {
                            Ok(repo) => emit(&tx, SourceResult::ok(self.service.urn(), repo)).await,
                            Err(e) => emit(&tx, SourceResult::err(self.service.urn(), e)).await,
                        }
                    }
                }
                Err(e) => emit(&tx, SourceResult::err(self.service.urn(), e)).await,
            }
        }
    }
}
