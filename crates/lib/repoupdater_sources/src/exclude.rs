//! The exclude matcher every `Source` builds from its `ExternalService`'s
//! configured `exclude` list (spec.md §4.B step 2): "a set of lower-cased
//! names, a set of host-side ids, and... a list of regular expressions.
//! `excludes(repo) = membership ∨ any regex match`".

use regex::Regex;
use repoupdater_externalservice::ExcludeEntry;
use std::collections::HashSet;

pub struct ExcludeMatcher {
    names: HashSet<String>,
    ids: HashSet<String>,
    patterns: Vec<Regex>,
    fold: fn(&str) -> String,
}

impl ExcludeMatcher {
    /// `fold` is the per-kind case-folding rule (spec.md §4.A: GitHub and
    /// BitbucketServer fold names, GitLab preserves case).
    pub fn new(entries: &[ExcludeEntry], fold: fn(&str) -> String) -> Result<Self, regex::Error> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        let mut patterns = Vec::new();
        for entry in entries {
            if let Some(name) = &entry.name {
                names.insert(fold(name));
            }
            if let Some(id) = &entry.id {
                ids.insert(id.clone());
            }
            if let Some(pattern) = &entry.pattern {
                patterns.push(Regex::new(pattern)?);
            }
        }
        Ok(Self { names, ids, patterns, fold })
    }

    pub fn excludes(&self, name: &str, id: Option<&str>) -> bool {
        if self.names.contains(&(self.fold)(name)) {
            return true;
        }
        if let Some(id) = id {
            if self.ids.contains(id) {
                return true;
            }
        }
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(s: &str) -> String {
        s.to_lowercase()
    }

    #[test]
    fn matches_by_folded_name() {
        let entries = vec![ExcludeEntry { name: Some("Acme/Secret".to_string()), id: None, pattern: None }];
        let matcher = ExcludeMatcher::new(&entries, lower).unwrap();
        assert!(matcher.excludes("acme/secret", None));
        assert!(!matcher.excludes("acme/public", None));
    }

    #[test]
    fn matches_by_id() {
        let entries = vec![ExcludeEntry { name: None, id: Some("123".to_string()), pattern: None }];
        let matcher = ExcludeMatcher::new(&entries, lower).unwrap();
        assert!(matcher.excludes("whatever", Some("123")));
        assert!(!matcher.excludes("whatever", Some("456")));
    }

    #[test]
    fn matches_by_pattern() {
        let entries = vec![ExcludeEntry { name: None, id: None, pattern: Some("^acme/.*-archive$".to_string()) }];
        let matcher = ExcludeMatcher::new(&entries, lower).unwrap();
        assert!(matcher.excludes("acme/old-archive", None));
        assert!(!matcher.excludes("acme/active", None));
    }
}
