use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::str::FromStr;
use strum::EnumIter;

/// The closed set of upstream host kinds an External-Service can describe
/// (spec.md §3).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeserializeFromStr, SerializeDisplay,
)]
pub enum ExternalServiceKind {
    GitHub,
    GitLab,
    BitbucketServer,
    BitbucketCloud,
    Gitolite,
    Phabricator,
    AwsCodeCommit,
    Other,
}

impl ExternalServiceKind {
    /// Lower-cased form used inside a URN (`extsvc:<kind>:<id>`, spec.md §4.A).
    pub fn as_urn_fragment(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::BitbucketServer => "bitbucketserver",
            Self::BitbucketCloud => "bitbucketcloud",
            Self::Gitolite => "gitolite",
            Self::Phabricator => "phabricator",
            Self::AwsCodeCommit => "awscodecommit",
            Self::Other => "other",
        }
    }

    /// Upper-cased column form (spec.md §4.A: `Update` upper-cases `kind`).
    pub fn as_stored_uppercase(&self) -> String {
        self.as_urn_fragment().to_uppercase()
    }
}

impl fmt::Display for ExternalServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_stored_uppercase().as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid external service kind: {0:?}")]
pub struct InvalidExternalServiceKind(pub String);

impl FromStr for ExternalServiceKind {
    type Err = InvalidExternalServiceKind;

    /// Case-insensitive parse (spec.md §4.A: "a case-insensitive tag").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "bitbucketserver" => Ok(Self::BitbucketServer),
            "bitbucketcloud" => Ok(Self::BitbucketCloud),
            "gitolite" => Ok(Self::Gitolite),
            "phabricator" => Ok(Self::Phabricator),
            "awscodecommit" => Ok(Self::AwsCodeCommit),
            "other" => Ok(Self::Other),
            _ => Err(InvalidExternalServiceKind(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("github", ExternalServiceKind::GitHub)]
    #[test_case("GitHub", ExternalServiceKind::GitHub)]
    #[test_case("GITHUB", ExternalServiceKind::GitHub)]
    #[test_case("bitbucketServer", ExternalServiceKind::BitbucketServer)]
    #[test_case("OTHER", ExternalServiceKind::Other)]
    fn case_insensitive_parse(input: &str, expected: ExternalServiceKind) {
        assert_eq!(input.parse::<ExternalServiceKind>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!("notahost".parse::<ExternalServiceKind>().is_err());
    }

    #[test]
    fn urn_fragment_is_lowercase_display_is_uppercase() {
        assert_eq!(ExternalServiceKind::GitHub.as_urn_fragment(), "github");
        assert_eq!(ExternalServiceKind::GitHub.to_string(), "GITHUB");
    }
}
