use serde_with::{DeserializeFromStr, SerializeDisplay};
use sqlx::{
    Decode, Encode, Postgres,
    encode::IsNull,
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef},
    prelude::*,
};
use std::{borrow::Cow, fmt, io::Write, str::FromStr};

/// A validated, URI-like repository name, e.g. `github.com/owner/repo`
/// (spec.md §3, `Repo.name`).
#[derive(Debug, Clone, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct RepoName(Cow<'static, str>);

#[derive(Debug, thiserror::Error)]
#[error("invalid repo name {0:?}: repo names must be non-empty and contain no whitespace")]
pub struct InvalidRepoName(pub String);

impl RepoName {
    #[cfg(any(test, feature = "testing"))]
    pub const fn from_static(s: &'static str) -> Self {
        RepoName(Cow::Borrowed(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive equality, used by the diff engine's name-fallback
    /// match (spec.md §4.E).
    pub fn eq_ignore_case(&self, other: &RepoName) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Lower-cased key, used wherever a deterministic case-insensitive sort
    /// key is required (spec.md §9, "exclude/include algebra").
    pub fn to_lowercase_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl AsRef<str> for RepoName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepoName {
    type Err = InvalidRepoName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(InvalidRepoName(s.to_string()));
        }
        Ok(RepoName(Cow::Owned(s.to_string())))
    }
}

impl TryFrom<&str> for RepoName {
    type Error = InvalidRepoName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl<T> PartialEq<T> for RepoName
where
    T: AsRef<str>,
{
    fn eq(&self, other: &T) -> bool {
        self.0 == other.as_ref()
    }
}

impl Type<Postgres> for RepoName {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for RepoName {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        write!(**buf, "{}", self.0)?;
        Ok(IsNull::No)
    }
}

impl<'r> Decode<'r, Postgres> for RepoName {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = Decode::<Postgres>::decode(value)?;
        let name: String = s
            .parse::<RepoName>()
            .map_err(|e: InvalidRepoName| e.to_string())?
            .0
            .into_owned();
        Ok(Self(Cow::Owned(name)))
    }
}

impl PgHasArrayType for RepoName {
    fn array_type_info() -> PgTypeInfo {
        <&str as PgHasArrayType>::array_type_info()
    }

    fn array_compatible(ty: &PgTypeInfo) -> bool {
        <&str as PgHasArrayType>::array_compatible(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!("".parse::<RepoName>().is_err());
        assert!("has space".parse::<RepoName>().is_err());
    }

    #[test]
    fn case_insensitive_eq() {
        let a: RepoName = "github.com/Org/Foo".parse().unwrap();
        let b: RepoName = "github.com/org/foo".parse().unwrap();
        assert!(a.eq_ignore_case(&b));
        assert_ne!(a, b);
    }
}
