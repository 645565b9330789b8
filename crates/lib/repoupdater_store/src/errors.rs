#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to create the database connection pool")]
    CreationFailed(#[source] sqlx::Error),

    #[error("failed to get a database connection")]
    ClientError(#[source] sqlx::Error),
}

/// Raised when an upsert would collide with a record that a different
/// external service already owns (spec.md §4.D: the store never silently
/// overwrites another source's claim on the same external identity).
#[derive(Debug, thiserror::Error)]
#[error("repo {attempted} conflicts with existing owner {existing}")]
pub struct ConflictError {
    pub existing: String,
    pub attempted: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Query(#[from] sqlx::Error),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("no record found for {0}")]
    NotFound(String),
}
