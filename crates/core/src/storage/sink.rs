use crate::cache::CacheBuild;
use crate::storage::{cache_file, lock, recommendation_cache};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;

/// Destination of a finished cache build.
#[async_trait::async_trait]
pub trait CacheSink: Send + Sync {
    fn sink_name(&self) -> &'static str;

    async fn publish(&self, as_of_date: NaiveDate, build: Arc<CacheBuild>) -> Result<()>;
}

/// The flat CSV artifact read by the lookup service.
#[derive(Debug, Clone)]
pub struct CsvCacheSink {
    path: PathBuf,
}

impl CsvCacheSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CacheSink for CsvCacheSink {
    fn sink_name(&self) -> &'static str {
        "csv"
    }

    async fn publish(&self, _as_of_date: NaiveDate, build: Arc<CacheBuild>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || cache_file::write_cache_csv(&path, &build.rows))
            .await
            .context("join cache writer task failed")?
    }
}

/// Run header plus rows in Postgres, guarded by the per-date advisory lock.
#[derive(Debug, Clone)]
pub struct PgCacheSink {
    pool: sqlx::PgPool,
}

impl PgCacheSink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CacheSink for PgCacheSink {
    fn sink_name(&self) -> &'static str {
        "postgres"
    }

    async fn publish(&self, as_of_date: NaiveDate, build: Arc<CacheBuild>) -> Result<()> {
        let acquired = lock::try_acquire_cache_build_lock(&self.pool, as_of_date).await?;
        anyhow::ensure!(
            acquired,
            "cache build lock for {as_of_date} is held by another run"
        );

        let res = recommendation_cache::persist_success(&self.pool, as_of_date, &build).await;
        if let Err(err) = &res {
            let detail = format!("{err:#}");
            if let Err(e) = recommendation_cache::persist_failure(&self.pool, as_of_date, &detail).await {
                tracing::warn!(%as_of_date, error = %e, "failed to record cache run failure");
            }
        }

        if let Err(e) = lock::release_cache_build_lock(&self.pool, as_of_date).await {
            tracing::warn!(%as_of_date, error = %e, "failed to release cache build lock");
        }
        res.map(|run_id| tracing::info!(%as_of_date, %run_id, "cache run recorded"))
    }
}
