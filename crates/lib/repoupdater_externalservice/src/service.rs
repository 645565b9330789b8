use crate::config::{self, Configuration, ExcludeEntry};
use crate::errors::InvalidConfig;
use crate::jsonc;
use chrono::{DateTime, Utc};
use repoupdater_types::{ExternalServiceId, ExternalServiceKind, Urn};
use url::Url;

/// One configured upstream host connection (spec.md §3, §4.A).
///
/// `config` is kept as the raw JSON-with-comments source text rather than a
/// parsed struct: `exclude`/`include_repos` splice new entries into that
/// text in place so a user's comments and formatting survive an edit, and
/// `configuration()` re-parses it on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalService {
    pub id: ExternalServiceId,
    pub kind: ExternalServiceKind,
    pub display_name: String,
    pub config: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ExternalService {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// `"extsvc:" + lower(kind) + ":" + id` (spec.md §4.A).
    pub fn urn(&self) -> Urn {
        Urn::new(self.kind, self.id)
    }

    /// Parses `config` (stripping comments first) against the schema for
    /// `kind`.
    pub fn configuration(&self) -> Result<Configuration, InvalidConfig> {
        self.parse_config(&self.config)
    }

    fn parse_config(&self, raw: &str) -> Result<Configuration, InvalidConfig> {
        let stripped = jsonc::strip_comments(raw);
        let value: serde_json::Value =
            serde_json::from_str(&stripped).map_err(|source| InvalidConfig::Parse { urn: self.urn().to_string(), source })?;
        config::parse(self.kind, &value).map_err(|source| InvalidConfig::Parse { urn: self.urn().to_string(), source })
    }

    /// Host URL this service talks to, or `InvalidConfig::NoBaseUrl` for
    /// kinds with no single meaningful base URL (spec.md §4.A).
    pub fn base_url(&self) -> Result<Url, InvalidConfig> {
        let urn = self.urn().to_string();
        let raw_url = match self.configuration()? {
            Configuration::GitHub(c) => Some(c.url),
            Configuration::GitLab(c) => Some(c.url),
            Configuration::BitbucketServer(c) => Some(c.url),
            Configuration::BitbucketCloud(c) => Some(c.url),
            Configuration::Gitolite(c) => Some(format!("ssh://{}", c.host)),
            Configuration::Phabricator(c) => Some(c.url),
            Configuration::Other(c) => c.url,
            Configuration::AwsCodeCommit(_) => None,
        };
        let raw_url = raw_url.ok_or_else(|| InvalidConfig::NoBaseUrl {
            urn: urn.clone(),
            kind: self.kind.as_urn_fragment().to_string(),
        })?;
        Url::parse(&raw_url).map_err(|source| InvalidConfig::BadUrl {
            urn,
            field: "url".to_string(),
            value: raw_url,
            source,
        })
    }

    /// Copies `n`'s mutable fields (`kind`, `displayName`, `config`,
    /// `deletedAt`) over `self` when `n` shares `self`'s identity, bumping
    /// `updatedAt`; returns whether anything actually changed (spec.md
    /// §4.A).
    pub fn update(&mut self, n: &ExternalService) -> bool {
        if self.id != n.id {
            return false;
        }
        let changed =
            self.kind != n.kind || self.display_name != n.display_name || self.config != n.config || self.deleted_at != n.deleted_at;
        if changed {
            self.kind = n.kind;
            self.display_name = n.display_name.clone();
            self.config = n.config.clone();
            self.deleted_at = n.deleted_at;
            self.updated_at = n.updated_at;
        }
        changed
    }

    /// Folds a repo name the way this kind compares exclude/include entries:
    /// GitHub and BitbucketServer fold to lower case, GitLab preserves case
    /// (spec.md §4.A).
    fn fold_name(&self, name: &str) -> String {
        match self.kind {
            ExternalServiceKind::GitHub | ExternalServiceKind::BitbucketServer => name.to_lowercase(),
            _ => name.to_string(),
        }
    }

    /// Appends entries to the `exclude` array for every `(name, id)` in
    /// `repos` not already covered by an existing entry (by name or by
    /// host-side id), preserving the config's comments/formatting, then
    /// re-validates and bumps `updatedAt` iff the blob changed (spec.md
    /// §4.A).
    pub fn exclude(&mut self, repos: &[(Option<String>, Option<String>)]) -> Result<(), InvalidConfig> {
        let current = self.configuration()?;
        let existing = current.exclude();

        let mut new_entries = Vec::new();
        for (name, id) in repos {
            let already_excluded = existing.iter().any(|e| {
                let name_matches = match (&e.name, name) {
                    (Some(en), Some(n)) => self.fold_name(en) == self.fold_name(n),
                    _ => false,
                };
                let id_matches = matches!((&e.id, id), (Some(ei), Some(i)) if ei == i);
                name_matches || id_matches
            });
            if already_excluded {
                continue;
            }
            new_entries.push(ExcludeEntry { name: name.clone(), id: id.clone(), pattern: None });
        }

        if new_entries.is_empty() {
            return Ok(());
        }

        let edited = self.splice_array("exclude", &new_entries)?;
        self.revalidate_and_apply(edited)
    }

    /// Appends `names` to the `repos` (or, for GitLab, `projects`) include
    /// array for every name not already present, same preservation and
    /// revalidation rules as `exclude` (spec.md §4.A).
    pub fn include_repos(&mut self, names: &[String]) -> Result<(), InvalidConfig> {
        let current = self.configuration()?;
        let key = if self.kind == ExternalServiceKind::GitLab { "projects" } else { "repos" };
        let existing: Vec<String> = match &current {
            Configuration::GitHub(c) => c.repos.clone(),
            Configuration::GitLab(c) => c.projects.clone(),
            Configuration::BitbucketServer(c) => c.repos.clone(),
            Configuration::BitbucketCloud(c) => c.repos.clone(),
            Configuration::Phabricator(c) => c.repos.clone(),
            Configuration::Other(_) | Configuration::Gitolite(_) | Configuration::AwsCodeCommit(_) => Vec::new(),
        };

        let to_add: Vec<String> = names
            .iter()
            .filter(|n| !existing.iter().any(|e| self.fold_name(e) == self.fold_name(n)))
            .cloned()
            .collect();
        if to_add.is_empty() {
            return Ok(());
        }

        let edited = self.splice_array(key, &to_add)?;
        self.revalidate_and_apply(edited)
    }

    fn splice_array<T: serde::Serialize>(&self, key: &str, new_items: &[T]) -> Result<String, InvalidConfig> {
        let stripped = jsonc::strip_comments(&self.config);
        let rendered: Vec<String> = new_items
            .iter()
            .map(|item| serde_json::to_string(item).expect("config entries serialize"))
            .collect();
        let addition = rendered.join(", ");

        Ok(match jsonc::find_top_level_array(&stripped, key) {
            Some((open, close)) => {
                let existing_is_empty = self.config[open..close].trim().is_empty();
                let sep = if existing_is_empty { "" } else { ", " };
                let mut out = String::with_capacity(self.config.len() + addition.len() + 2);
                out.push_str(&self.config[..close]);
                out.push_str(sep);
                out.push_str(&addition);
                out.push_str(&self.config[close..]);
                out
            }
            None => {
                let close_brace = self.config.rfind('}').unwrap_or(self.config.len());
                let object_is_empty = self.config[..close_brace].trim().ends_with('{');
                let sep = if object_is_empty { "" } else { ", " };
                let mut out = String::with_capacity(self.config.len() + addition.len() + key.len() + 8);
                out.push_str(&self.config[..close_brace]);
                out.push_str(sep);
                out.push('"');
                out.push_str(key);
                out.push_str("\": [");
                out.push_str(&addition);
                out.push(']');
                out.push_str(&self.config[close_brace..]);
                out
            }
        })
    }

    fn revalidate_and_apply(&mut self, edited: String) -> Result<(), InvalidConfig> {
        self.parse_config(&edited)?;
        if edited != self.config {
            self.config = edited;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_deleted_at(mut self, deleted_at: Option<DateTime<Utc>>) -> Self {
        self.deleted_at = deleted_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use repoupdater_types::ExternalServiceId;

    fn service(kind: ExternalServiceKind, config: &str) -> ExternalService {
        let now = Utc::now();
        ExternalService {
            id: ExternalServiceId(1),
            kind,
            display_name: "test".to_string(),
            config: config.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn urn_uses_lowercase_kind() {
        let svc = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#);
        assert_eq!(svc.urn().to_string(), "extsvc:github:1");
    }

    #[test]
    fn base_url_parses_configured_url() {
        let svc = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#);
        assert_eq!(svc.base_url().unwrap().as_str(), "https://github.com/");
    }

    #[test]
    fn aws_code_commit_has_no_base_url() {
        let svc = service(
            ExternalServiceKind::AwsCodeCommit,
            r#"{"region": "us-east-1", "accessKeyID": "a", "secretAccessKey": "b"}"#,
        );
        assert!(matches!(svc.base_url(), Err(InvalidConfig::NoBaseUrl { .. })));
    }

    #[test]
    fn exclude_appends_new_entry_preserving_comments() {
        let mut svc = service(
            ExternalServiceKind::GitHub,
            "{\n  \"url\": \"https://github.com\", // primary\n  \"exclude\": [{\"name\": \"acme/one\"}]\n}",
        );
        svc.exclude(&[(Some("acme/two".to_string()), None)]).unwrap();
        assert!(svc.config.contains("// primary"));
        assert!(svc.config.contains("acme/two"));
        let Configuration::GitHub(cfg) = svc.configuration().unwrap() else { panic!() };
        assert_eq!(cfg.exclude.len(), 2);
    }

    #[test]
    fn exclude_is_idempotent_case_folded_for_github() {
        let mut svc = service(
            ExternalServiceKind::GitHub,
            r#"{"url": "https://github.com", "exclude": [{"name": "Acme/One"}]}"#,
        );
        let before = svc.config.clone();
        svc.exclude(&[(Some("acme/one".to_string()), None)]).unwrap();
        assert_eq!(svc.config, before);
    }

    #[test]
    fn exclude_adds_missing_top_level_key() {
        let mut svc = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#);
        svc.exclude(&[(Some("acme/one".to_string()), None)]).unwrap();
        let Configuration::GitHub(cfg) = svc.configuration().unwrap() else { panic!() };
        assert_eq!(cfg.exclude[0].name.as_deref(), Some("acme/one"));
    }

    #[test]
    fn include_repos_uses_projects_key_for_gitlab() {
        let mut svc = service(ExternalServiceKind::GitLab, r#"{"url": "https://gitlab.com"}"#);
        svc.include_repos(&["acme/one".to_string()]).unwrap();
        let Configuration::GitLab(cfg) = svc.configuration().unwrap() else { panic!() };
        assert_eq!(cfg.projects, vec!["acme/one".to_string()]);
    }

    #[test]
    fn update_reports_no_change_when_fields_are_identical() {
        let mut a = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#);
        let b = a.clone();
        assert!(!a.update(&b));
    }

    #[test]
    fn update_copies_mutable_fields_when_identity_matches() {
        let mut a = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#);
        let mut b = a.clone();
        b.display_name = "renamed".to_string();
        b.deleted_at = Some(Utc::now());
        assert!(a.update(&b));
        assert_eq!(a.display_name, "renamed");
        assert!(a.is_deleted());
    }

    #[test]
    fn update_ignores_record_with_different_identity() {
        let mut a = service(ExternalServiceKind::GitHub, r#"{"url": "https://github.com"}"#);
        let mut b = a.clone();
        b.id = ExternalServiceId(2);
        b.display_name = "renamed".to_string();
        assert!(!a.update(&b));
        assert_eq!(a.display_name, "test");
    }
}
