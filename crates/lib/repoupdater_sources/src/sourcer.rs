//! `Sourcer` (spec.md §4.C): maps each non-deleted `ExternalService` to one
//! `Source` via per-kind dispatch, wraps each with user-supplied decorators,
//! and aggregates per-service construction errors rather than
//! short-circuiting on the first one. Deleted services are silently
//! skipped.

use crate::aws_code_commit::AwsCodeCommitSource;
use crate::bitbucket_cloud::BitbucketCloudSource;
use crate::bitbucket_server::BitbucketServerSource;
use crate::errors::SourceError;
use crate::github::GitHubSource;
use crate::gitlab::GitLabSource;
use crate::gitolite::GitoliteSource;
use crate::other::OtherSource;
use crate::phabricator::PhabricatorSource;
use crate::source::{Source, SourceResult};
use repoupdater_externalservice::ExternalService;
use repoupdater_http::Client as HttpClient;
use repoupdater_types::ExternalServiceKind;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A decorator wraps a freshly built `Source` in another `Source`, e.g. to
/// add metrics or logging (spec.md §4.C: "applies user-supplied decorators
/// around each").
pub type Decorator = Arc<dyn Fn(Arc<dyn Source>) -> Arc<dyn Source> + Send + Sync>;

/// Accumulates every per-service construction failure instead of
/// short-circuiting (spec.md §4.C).
#[derive(Debug)]
pub struct SourcerErrors(pub Vec<SourceError>);

impl std::fmt::Display for SourcerErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} error(s) constructing sources:", self.0.len())?;
        for e in &self.0 {
            writeln!(f, "  - {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SourcerErrors {}

/// Builds one `Source` per non-deleted service (spec.md §4.C), applying
/// `decorators` (in order) around each. Returns every successfully built
/// `Source` alongside the accumulated construction errors, if any.
pub fn build(
    services: &[ExternalService],
    client: Arc<HttpClient>,
    decorators: &[Decorator],
) -> (Vec<Arc<dyn Source>>, Option<SourcerErrors>) {
    let mut sources = Vec::new();
    let mut errors = Vec::new();

    for service in services {
        if service.is_deleted() {
            continue;
        }
        match build_one(service, &client) {
            Ok(mut source) => {
                for decorator in decorators {
                    source = decorator(source);
                }
                sources.push(source);
            }
            Err(e) => errors.push(e),
        }
    }

    let errors = if errors.is_empty() { None } else { Some(SourcerErrors(errors)) };
    (sources, errors)
}

fn build_one(service: &ExternalService, client: &Arc<HttpClient>) -> Result<Arc<dyn Source>, SourceError> {
    let urn = service.urn().to_string();
    // Validate the config up front so a schema mismatch surfaces here, with
    // the service's URN attached, rather than as a panic inside `new`.
    service.configuration().map_err(|source| SourceError::config(urn, source))?;

    Ok(match service.kind {
        ExternalServiceKind::GitHub => Arc::new(GitHubSource::new(service.clone(), client.clone())?),
        ExternalServiceKind::GitLab => Arc::new(GitLabSource::new(service.clone(), client.clone())?),
        ExternalServiceKind::BitbucketServer => Arc::new(BitbucketServerSource::new(service.clone(), client.clone())?),
        ExternalServiceKind::BitbucketCloud => Arc::new(BitbucketCloudSource::new(service.clone(), client.clone())?),
        ExternalServiceKind::Gitolite => Arc::new(GitoliteSource::new(service.clone())?),
        ExternalServiceKind::Phabricator => Arc::new(PhabricatorSource::new(service.clone(), client.clone())?),
        ExternalServiceKind::AwsCodeCommit => Arc::new(AwsCodeCommitSource::new(service.clone(), client.clone())?),
        ExternalServiceKind::Other => Arc::new(OtherSource::new(service.clone())?),
    })
}

/// Groups `sources` by host kind and drains each group serially within the
/// group but concurrently across groups (spec.md §4.C: "this caps
/// concurrent load on any single host while using all hosts in parallel").
pub async fn list_repos_all(sources: &[Arc<dyn Source>], tx: mpsc::Sender<SourceResult>) {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<ExternalServiceKind, Vec<Arc<dyn Source>>> = BTreeMap::new();
    for source in sources {
        let kind = source
            .external_services()
            .first()
            .map(|s| s.kind)
            .unwrap_or(ExternalServiceKind::Other);
        groups.entry(kind).or_default().push(source.clone());
    }

    let mut handles = Vec::new();
    for (_, group) in groups {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            for source in group {
                source.list_repos(tx.clone()).await;
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use repoupdater_externalservice::ExternalService;
    use repoupdater_ratelimit::RateLimitRegistry;
    use repoupdater_types::ExternalServiceId;

    fn service(kind: ExternalServiceKind, config: &str, deleted: bool) -> ExternalService {
        let now = Utc::now();
        ExternalService {
            id: ExternalServiceId(1),
            kind,
            display_name: "test".to_string(),
            config: config.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: deleted.then_some(now),
        }
    }

    fn client() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(Arc::new(RateLimitRegistry::new())).unwrap())
    }

    #[test]
    fn skips_deleted_services() {
        let svc = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#, true);
        let (sources, errors) = build(&[svc], client(), &[]);
        assert!(sources.is_empty());
        assert!(errors.is_none());
    }

    #[test]
    fn accumulates_construction_errors_instead_of_short_circuiting() {
        let bad = service(ExternalServiceKind::GitHub, "{not json", false);
        let good = service(ExternalServiceKind::Other, r#"{"repos": []}"#, false);
        let (sources, errors) = build(&[bad, good], client(), &[]);
        assert_eq!(sources.len(), 1);
        let errors = errors.expect("one construction error expected");
        assert_eq!(errors.0.len(), 1);
    }

    #[test]
    fn builds_one_source_per_live_service() {
        let svc = service(ExternalServiceKind::Other, r#"{"repos": []}"#, false);
        let (sources, errors) = build(&[svc], client(), &[]);
        assert_eq!(sources.len(), 1);
        assert!(errors.is_none());
    }
}
