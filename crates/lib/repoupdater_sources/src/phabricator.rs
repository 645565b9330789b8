//! Phabricator `Source` (spec.md §4.B). Phabricator's Conduit API takes
//! `params` as a single JSON-encoded query string parameter rather than a
//! JSON body, so requests go out as form-encoded POSTs. Only the
//! `explicit` mode is meaningful here — Phabricator repositories are
//! always individually configured by callsign (spec.md §6: `repos`).

use crate::errors::SourceError;
use crate::source::{RepoDraft, Source, SourceResult, emit, make_repo};
use async_trait::async_trait;
use repoupdater_externalservice::{ExternalService, PhabricatorConnection};
use repoupdater_http::Client as HttpClient;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct RawRepoFields {
    callsign: Option<String>,
    name: String,
    status: String,
    #[serde(rename = "vcs")]
    vcs: String,
}

#[derive(Debug, Deserialize)]
struct RawRepoAttachmentUri {
    uri: RawUriInfo,
    #[serde(rename = "effectiveURI")]
    effective_uri: String,
}

#[derive(Debug, Deserialize)]
struct RawUriInfo {
    #[serde(rename = "effective")]
    effective: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepoAttachments {
    uris: RawUris,
}

#[derive(Debug, Deserialize)]
struct RawUris {
    uris: Vec<RawRepoAttachmentUri>,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    id: i64,
    phid: String,
    fields: RawRepoFields,
    #[serde(default)]
    attachments: Option<RawRepoAttachments>,
}

#[derive(Debug, Deserialize)]
struct ConduitResponse<T> {
    result: Option<T>,
    #[serde(rename = "error_info")]
    error_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositorySearchResult {
    data: Vec<RawRepo>,
}

pub struct PhabricatorSource {
    service: ExternalService,
    cfg: PhabricatorConnection,
    client: Arc<HttpClient>,
    base_url: url::Url,
}

impl PhabricatorSource {
    pub fn new(service: ExternalService, client: Arc<HttpClient>) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service.configuration().map_err(|source| SourceError::config(urn.clone(), source))? {
            repoupdater_externalservice::Configuration::Phabricator(cfg) => cfg,
            other => panic!("PhabricatorSource constructed for non-phabricator configuration: {:?}", other.kind()),
        };
        let base_url = service.base_url().map_err(|source| SourceError::config(urn.clone(), source))?;
        Ok(Self { service, cfg, client, base_url })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    async fn search_by_callsigns(&self, callsigns: &[String]) -> Result<Vec<RawRepo>, SourceError> {
        let url = self
            .base_url
            .join("api/diffusion.repository.search")
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        self.client.throttle(&url).await;

        let mut form = vec![("api.token".to_string(), self.cfg.token.clone().unwrap_or_default())];
        for (i, callsign) in callsigns.iter().enumerate() {
            form.push((format!("constraints[callsigns][{i}]"), callsign.clone()));
        }
        form.push(("attachments[uris]".to_string(), "1".to_string()));

        let response = self
            .client
            .request(reqwest::Method::POST, &url)
            .form(&form)
            .send()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        let parsed: ConduitResponse<RepositorySearchResult> = response
            .json()
            .await
            .map_err(|source| SourceError::TransientHost { urn: self.urn(), source: source.into() })?;
        if let Some(error) = parsed.error_info {
            return Err(SourceError::TransientHost { urn: self.urn(), source: anyhow::anyhow!(error) });
        }
        Ok(parsed.result.map(|r| r.data).unwrap_or_default())
    }

    fn into_repo(&self, raw: RawRepo) -> Result<repoupdater_types::Repo, SourceError> {
        let callsign = raw.fields.callsign.clone().unwrap_or_else(|| raw.phid.clone());
        let clone_url = raw
            .attachments
            .as_ref()
            .and_then(|a| a.uris.uris.first())
            .map(|u| u.uri.effective.clone().unwrap_or_else(|| u.effective_uri.clone()))
            .ok_or_else(|| SourceError::TransientHost { urn: self.urn(), source: anyhow::anyhow!("repository has no clone uri") })?;

        let host = self.base_url.host_str().unwrap_or("phabricator.example.com");
        make_repo(
            &self.service,
            self.base_url.as_str(),
            repoupdater_externalservice::GitUrlType::Http,
            self.cfg.token.as_deref(),
            None,
            None,
            RepoDraft {
                name: format!("{host}/{callsign}").parse().expect("host and callsign are non-empty"),
                external_id: raw.phid,
                clone_url_https: clone_url,
                ssh_url: None,
                uri: None,
                description: Some(raw.fields.name),
                language: None,
                fork: false,
                archived: raw.fields.status != "active",
                private: true,
                metadata: serde_json::json!({ "id": raw.id, "vcs": raw.fields.vcs }),
            },
        )
    }
}

#[async_trait]
impl Source for PhabricatorSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        if self.cfg.repos.is_empty() {
            return;
        }
        // Conduit's callsign constraint accepts multiple values per call, but
        // batching keeps a single slow repo from blocking the rest of the list.
        for callsign in &self.cfg.repos {
            match self.search_by_callsigns(std::slice::from_ref(callsign)).await {
                Ok(repos) => {
                    for raw in repos {
                        match self.into_repo(raw) {
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
