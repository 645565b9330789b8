//! Per-kind parsed configuration (spec.md §4.A `Configuration()`, §6
//! "Recognised top-level options").

use repoupdater_types::ExternalServiceKind;
use serde::Deserialize;

/// `exclude: [{name?, id?, pattern?}]` (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
pub struct ExcludeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// `rateLimit: {enabled, requestsPerHour}` (spec.md §4.H): an explicit
/// per-service override of this host's default API budget.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, serde::Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    #[serde(rename = "requestsPerHour")]
    pub requests_per_hour: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GitUrlType {
    Http,
    Ssh,
}

impl Default for GitUrlType {
    fn default() -> Self {
        Self::Http
    }
}

fn default_repository_query() -> Vec<String> {
    vec!["none".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConnection {
    pub url: String,
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_repository_query", rename = "repositoryQuery")]
    pub repository_query: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
    #[serde(default, rename = "gitURLType")]
    pub git_url_type: GitUrlType,
    #[serde(default, rename = "repositoryPathPattern")]
    pub repository_path_pattern: Option<String>,
    #[serde(default, rename = "initialRepositoryEnablement")]
    pub initial_repository_enablement: Option<bool>,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabConnection {
    pub url: String,
    pub token: Option<String>,
    #[serde(default = "default_repository_query", rename = "projectQuery")]
    pub project_query: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
    #[serde(default, rename = "gitURLType")]
    pub git_url_type: GitUrlType,
    #[serde(default, rename = "repositoryPathPattern")]
    pub repository_path_pattern: Option<String>,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketServerConnection {
    pub url: String,
    pub username: Option<String>,
    pub token: Option<String>,
    pub certificate: Option<String>,
    #[serde(default = "default_repository_query", rename = "repositoryQuery")]
    pub repository_query: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
    #[serde(default, rename = "gitURLType")]
    pub git_url_type: GitUrlType,
    #[serde(default, rename = "repositoryPathPattern")]
    pub repository_path_pattern: Option<String>,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketCloudConnection {
    pub url: String,
    pub username: Option<String>,
    #[serde(rename = "appPassword")]
    pub app_password: Option<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitoliteConnection {
    pub host: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhabricatorConnection {
    pub url: String,
    pub token: Option<String>,
    #[serde(default)]
    pub repos: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsCodeCommitConnection {
    pub region: String,
    #[serde(rename = "accessKeyID")]
    pub access_key_id: String,
    #[serde(rename = "secretAccessKey")]
    pub secret_access_key: String,
    #[serde(default, rename = "gitCredentials")]
    pub git_credentials: Option<String>,
    #[serde(default, rename = "repositoryPathPattern")]
    pub repository_path_pattern: Option<String>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtherRepo {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtherConnection {
    pub url: Option<String>,
    #[serde(default)]
    pub repos: Vec<OtherRepo>,
}

/// The result of `ExternalService::configuration()`: the `config` blob,
/// parsed per `kind`.
#[derive(Debug, Clone)]
pub enum Configuration {
    GitHub(GitHubConnection),
    GitLab(GitLabConnection),
    BitbucketServer(BitbucketServerConnection),
    BitbucketCloud(BitbucketCloudConnection),
    Gitolite(GitoliteConnection),
    Phabricator(PhabricatorConnection),
    AwsCodeCommit(AwsCodeCommitConnection),
    Other(OtherConnection),
}

impl Configuration {
    pub fn kind(&self) -> ExternalServiceKind {
        match self {
            Self::GitHub(_) => ExternalServiceKind::GitHub,
            Self::GitLab(_) => ExternalServiceKind::GitLab,
            Self::BitbucketServer(_) => ExternalServiceKind::BitbucketServer,
            Self::BitbucketCloud(_) => ExternalServiceKind::BitbucketCloud,
            Self::Gitolite(_) => ExternalServiceKind::Gitolite,
            Self::Phabricator(_) => ExternalServiceKind::Phabricator,
            Self::AwsCodeCommit(_) => ExternalServiceKind::AwsCodeCommit,
            Self::Other(_) => ExternalServiceKind::Other,
        }
    }

    pub fn exclude(&self) -> &[ExcludeEntry] {
        match self {
            Self::GitHub(c) => &c.exclude,
            Self::GitLab(c) => &c.exclude,
            Self::BitbucketServer(c) => &c.exclude,
            Self::BitbucketCloud(c) => &c.exclude,
            Self::Gitolite(c) => &c.exclude,
            Self::AwsCodeCommit(c) => &c.exclude,
            Self::Phabricator(_) | Self::Other(_) => &[],
        }
    }

    /// The explicit `rateLimit.requestsPerHour` override, if the service
    /// configured one and enabled it (spec.md §4.H: "a non-default
    /// configured limit overrides any default"). Kinds with no rate-limit
    /// schema field return `None`, same as an unset one.
    pub fn rate_limit_override(&self) -> Option<f64> {
        let configured = match self {
            Self::GitHub(c) => c.rate_limit,
            Self::GitLab(c) => c.rate_limit,
            Self::BitbucketServer(c) => c.rate_limit,
            Self::BitbucketCloud(c) => c.rate_limit,
            Self::Gitolite(_) | Self::Phabricator(_) | Self::AwsCodeCommit(_) | Self::Other(_) => None,
        };
        configured.filter(|r| r.enabled).map(|r| r.requests_per_hour)
    }
}

pub(crate) fn parse(kind: ExternalServiceKind, json: &serde_json::Value) -> Result<Configuration, serde_json::Error> {
    Ok(match kind {
        ExternalServiceKind::GitHub => Configuration::GitHub(serde_json::from_value(json.clone())?),
        ExternalServiceKind::GitLab => Configuration::GitLab(serde_json::from_value(json.clone())?),
        ExternalServiceKind::BitbucketServer => {
            Configuration::BitbucketServer(serde_json::from_value(json.clone())?)
        }
        ExternalServiceKind::BitbucketCloud => {
            Configuration::BitbucketCloud(serde_json::from_value(json.clone())?)
        }
        ExternalServiceKind::Gitolite => Configuration::Gitolite(serde_json::from_value(json.clone())?),
        ExternalServiceKind::Phabricator => Configuration::Phabricator(serde_json::from_value(json.clone())?),
        ExternalServiceKind::AwsCodeCommit => {
            Configuration::AwsCodeCommit(serde_json::from_value(json.clone())?)
        }
        ExternalServiceKind::Other => Configuration::Other(serde_json::from_value(json.clone())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn github_config_defaults_repository_query_to_none() {
        let json: serde_json::Value = serde_json::from_str(r#"{"url": "https://github.com", "token": "t"}"#).unwrap();
        let Configuration::GitHub(cfg) = parse(ExternalServiceKind::GitHub, &json).unwrap() else {
            panic!("expected GitHub configuration")
        };
        assert_eq!(cfg.repository_query, vec!["none".to_string()]);
        assert_eq!(cfg.git_url_type, GitUrlType::Http);
    }

    #[test]
    fn gitlab_config_reads_project_query_and_exclude() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"url": "https://gitlab.com", "token": "t", "projectQuery": ["groups/acme"], "exclude": [{"name": "acme/secret"}]}"#,
        )
        .unwrap();
        let Configuration::GitLab(cfg) = parse(ExternalServiceKind::GitLab, &json).unwrap() else {
            panic!("expected GitLab configuration")
        };
        assert_eq!(cfg.project_query, vec!["groups/acme".to_string()]);
        assert_eq!(cfg.exclude[0].name.as_deref(), Some("acme/secret"));
    }
}
