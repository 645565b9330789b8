use crate::{Config, errors::PoolError, metrics::PoolMetrics};
use repoupdater_metrics::AnyMeterProvider;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// A thin wrapper around `sqlx::PgPool` that records connection metrics and
/// gives every caller a single place to reach for a connection or a
/// transaction (spec.md §4.D).
#[derive(Debug, Clone)]
pub struct Pool {
    pg_pool: sqlx::PgPool,
    otel_metrics: Arc<PoolMetrics>,
}

impl Pool {
    pub async fn new(config: &Config, otel_meter_provider: &AnyMeterProvider) -> Result<Pool, PoolError> {
        debug!("creating the repository store database pool");

        let pg_pool = PgPoolOptions::new()
            .max_connections(config.max_pool_size)
            .min_connections(config.min_pool_idle)
            .max_lifetime(Duration::from_secs(30 * 60))
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(10 * 60))
            .connect_lazy(&config.database_url)
            .map_err(PoolError::CreationFailed)?;

        Ok(Pool {
            pg_pool: pg_pool.clone(),
            otel_metrics: Arc::new(PoolMetrics::new(pg_pool, otel_meter_provider)),
        })
    }

    pub async fn get_async(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, PoolError> {
        self.pg_pool.acquire().await.map_err(|err| {
            self.otel_metrics.failed_connections.add(1, &[]);
            PoolError::ClientError(err)
        })
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, PoolError> {
        self.pg_pool.begin().await.map_err(|err| {
            self.otel_metrics.failed_connections.add(1, &[]);
            PoolError::ClientError(err)
        })
    }
}
