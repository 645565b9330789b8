use crate::{ExternalServiceId, ExternalServiceKind};
use std::fmt;
use std::str::FromStr;

/// `extsvc:<kind>:<id>` — the stable external-service identifier used as the
/// key in `Repo::sources` (spec.md §3, "SourceInfo").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Urn {
    pub kind: ExternalServiceKind,
    pub id: ExternalServiceId,
}

impl Urn {
    pub fn new(kind: ExternalServiceKind, id: ExternalServiceId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extsvc:{}:{}", self.kind.as_urn_fragment(), self.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidUrn {
    #[error("urn {0:?} does not have the form extsvc:<kind>:<id>")]
    Malformed(String),
    #[error(transparent)]
    BadKind(#[from] crate::InvalidExternalServiceKind),
    #[error("urn {0:?} has a non-numeric service id")]
    BadId(String),
}

impl FromStr for Urn {
    type Err = InvalidUrn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some("extsvc"), Some(kind), Some(id), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(InvalidUrn::Malformed(s.to_string()));
        };
        let kind: ExternalServiceKind = kind.parse()?;
        let id: i32 = id
            .parse()
            .map_err(|_| InvalidUrn::BadId(s.to_string()))?;
        Ok(Urn::new(kind, ExternalServiceId(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let urn = Urn::new(ExternalServiceKind::GitHub, ExternalServiceId(42));
        assert_eq!(urn.to_string(), "extsvc:github:42");
        assert_eq!(urn.to_string().parse::<Urn>().unwrap(), urn);
    }

    #[test]
    fn rejects_malformed() {
        assert!("extsvc:github".parse::<Urn>().is_err());
        assert!("nope:github:1".parse::<Urn>().is_err());
        assert!("extsvc:github:notanumber".parse::<Urn>().is_err());
    }
}
