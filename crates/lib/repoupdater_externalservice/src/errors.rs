/// The failure mode for every operation in this crate that touches the
/// `config` blob: parse failure, schema failure, or (for `Exclude`/
/// `IncludeRepos`) an edit that would produce a blob failing either check
/// (spec.md §4.A: "config parse or schema validation errors are returned as
/// `InvalidConfig`").
#[derive(Debug, thiserror::Error)]
pub enum InvalidConfig {
    #[error("{urn}: config is not valid JSON: {source}")]
    Parse {
        urn: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{urn}: config does not satisfy the {kind} schema: {reason}")]
    Schema { urn: String, kind: String, reason: String },
    #[error("{urn}: {kind} has no base URL")]
    NoBaseUrl { urn: String, kind: String },
    #[error("{urn}: {field} {value:?} is not a valid URL: {source}")]
    BadUrl {
        urn: String,
        field: String,
        value: String,
        #[source]
        source: url::ParseError,
    },
}
