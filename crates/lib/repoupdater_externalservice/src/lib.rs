mod config;
mod errors;
mod jsonc;
mod service;

pub use config::{
    AwsCodeCommitConnection, BitbucketCloudConnection, BitbucketServerConnection, Configuration, ExcludeEntry,
    GitHubConnection, GitLabConnection, GitUrlType, GitoliteConnection, OtherConnection, OtherRepo,
    PhabricatorConnection, RateLimitConfig,
};
pub use errors::InvalidConfig;
pub use service::ExternalService;
