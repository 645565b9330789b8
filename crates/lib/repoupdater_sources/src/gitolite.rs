//! Gitolite `Source` (spec.md §4.B). Gitolite exposes no HTTP API; the only
//! way to enumerate its repos is `ssh <host> info`, which prints one line
//! per accessible repo. Shelled out via `tokio::process::Command` rather
//! than a network client, since there's nothing to rate-limit or paginate
//! here — mode is effectively always "public" (everything the configured
//! key can see).

use crate::errors::SourceError;
use crate::exclude::ExcludeMatcher;
use crate::source::{RepoDraft, Source, SourceResult, emit, make_repo};
use async_trait::async_trait;
use repoupdater_externalservice::{ExternalService, GitoliteConnection};
use tokio::process::Command;
use tokio::sync::mpsc;

pub struct GitoliteSource {
    service: ExternalService,
    cfg: GitoliteConnection,
    exclude: ExcludeMatcher,
}

impl GitoliteSource {
    pub fn new(service: ExternalService) -> Result<Self, SourceError> {
        let urn = service.urn().to_string();
        let cfg = match service.configuration().map_err(|source| SourceError::config(urn.clone(), source))? {
            repoupdater_externalservice::Configuration::Gitolite(cfg) => cfg,
            other => panic!("GitoliteSource constructed for non-gitolite configuration: {:?}", other.kind()),
        };
        let exclude = ExcludeMatcher::new(&cfg.exclude, |s| s.to_string())
            .map_err(|e| SourceError::TransientHost { urn, source: e.into() })?;
        Ok(Self { service, cfg, exclude })
    }

    fn urn(&self) -> String {
        self.service.urn().to_string()
    }

    /// Parses `ssh <host> info` output: one repo path per line, preceded by
    /// an access-rights column (`R W` etc.) we don't care about.
    fn parse_info_output(output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| line.split_whitespace().last())
            .filter(|repo| !repo.is_empty() && *repo != "info")
            .map(str::to_string)
            .collect()
    }

    fn repo_name(&self, repo_path: &str) -> String {
        match &self.cfg.prefix {
            Some(prefix) => format!("{}/{}/{}", self.cfg.host, prefix.trim_matches('/'), repo_path),
            None => format!("{}/{}", self.cfg.host, repo_path),
        }
    }
}

#[async_trait]
impl Source for GitoliteSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>) {
        let output = match Command::new("ssh").arg(&self.cfg.host).arg("info").output().await {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr).into_owned();
                emit(&tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: anyhow::anyhow!(stderr) })).await;
                return;
            }
            Err(source) => {
                emit(&tx, SourceResult::err(self.service.urn(), SourceError::TransientHost { urn: self.urn(), source: source.into() })).await;
                return;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        for repo_path in Self::parse_info_output(&stdout) {
            if self.exclude.excludes(&repo_path, None) {
                continue;
            }
            let clone_url = format!("{}:{repo_path}.git", self.cfg.host);
            let result = make_repo(
                &self.service,
                &self.cfg.host,
                repoupdater_externalservice::GitUrlType::Ssh,
                None,
                None,
                None,
                RepoDraft {
                    name: self.repo_name(&repo_path).parse().expect("host and path are non-empty"),
                    external_id: repo_path.clone(),
                    clone_url_https: clone_url.clone(),
                    ssh_url: Some(clone_url),
                    uri: None,
                    description: None,
                    language: None,
                    fork: false,
                    archived: false,
                    private: true,
                    metadata: serde_json::json!({ "path": repo_path }),
                },
            );
            match result {
                Ok(repo) => emit(&tx, SourceResult::ok(self.service.urn(), repo)).await,
                Err(e) => emit(&tx, SourceResult::err(self.service.urn(), e)).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_output_repo_paths() {
        let output = " R W\tfoo/bar\n R  \tteam/baz\nsome trailing line ending in info\n";
        let repos = GitoliteSource::parse_info_output(output);
        assert_eq!(repos, vec!["foo/bar", "team/baz"]);
    }
}
