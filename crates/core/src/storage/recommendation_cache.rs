use crate::cache::CacheBuild;
use crate::domain::cache::RecommendationCacheRow;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

const DEFAULT_INSERT_BATCH: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct CacheRowRecord {
    fund_id: String,
    fund_name: String,
    category: Option<String>,
    base_index: Option<String>,
    level: i16,
    archetype_id: String,
    base_score: f64,
    final_score: f64,
    risk_tier: Option<i16>,
    aum: Option<f64>,
    avg_volume: Option<f64>,
    volatility: Option<f64>,
    expense_ratio: Option<f64>,
}

impl TryFrom<CacheRowRecord> for RecommendationCacheRow {
    type Error = anyhow::Error;

    fn try_from(r: CacheRowRecord) -> anyhow::Result<Self> {
        Ok(Self {
            level: u8::try_from(r.level)
                .with_context(|| format!("invalid level {} for fund_id={}", r.level, r.fund_id))?,
            risk_tier: r
                .risk_tier
                .map(u8::try_from)
                .transpose()
                .with_context(|| format!("invalid risk_tier for fund_id={}", r.fund_id))?,
            fund_id: r.fund_id,
            fund_name: r.fund_name,
            category: r.category,
            base_index: r.base_index,
            archetype_id: r.archetype_id,
            base_score: r.base_score,
            final_score: r.final_score,
            aum: r.aum,
            avg_volume: r.avg_volume,
            volatility: r.volatility,
            expense_ratio: r.expense_ratio,
        })
    }
}

fn insert_batch_size() -> anyhow::Result<usize> {
    let size = std::env::var("CACHE_ROWS_INSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_INSERT_BATCH);
    anyhow::ensure!(size >= 1, "CACHE_ROWS_INSERT_BATCH must be >= 1");
    Ok(size)
}

/// Inserts the run header and every row in one transaction.
pub async fn persist_success(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    build: &CacheBuild,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let generated_at: DateTime<Utc> = Utc::now();
    let summary = serde_json::to_value(&build.summary).context("serialize cache summary failed")?;
    let chunk_size = insert_batch_size()?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query(
        "INSERT INTO recommendation_cache_runs \
         (id, as_of_date, generated_at, status, row_count, failure_count, summary, error) \
         VALUES ($1, $2, $3, 'success', $4, $5, $6, NULL)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(as_of_date)
    .bind(generated_at)
    .bind(build.rows.len() as i32)
    .bind(build.failures.len() as i32)
    .bind(summary)
    .execute(&mut *tx)
    .await
    .context("insert recommendation_cache_runs failed")?;

    let mut inserted: u64 = 0;
    for (batch_idx, chunk) in build.rows.chunks(chunk_size).enumerate() {
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO recommendation_cache_rows \
             (run_id, fund_id, fund_name, category, base_index, level, archetype_id, \
              base_score, final_score, risk_tier, aum, avg_volume, volatility, expense_ratio) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(run_id)
                .push_bind(&row.fund_id)
                .push_bind(&row.fund_name)
                .push_bind(&row.category)
                .push_bind(&row.base_index)
                .push_bind(i16::from(row.level))
                .push_bind(&row.archetype_id)
                .push_bind(row.base_score)
                .push_bind(row.final_score)
                .push_bind(row.risk_tier.map(i16::from))
                .push_bind(row.aum)
                .push_bind(row.avg_volume)
                .push_bind(row.volatility)
                .push_bind(row.expense_ratio);
        });

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch insert recommendation_cache_rows failed")?;
        inserted += res.rows_affected();

        tracing::debug!(
            %as_of_date,
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "recommendation_cache_rows batch insert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    tracing::info!(%as_of_date, %run_id, rows = inserted, "persisted recommendation cache");
    Ok(run_id)
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    error: &str,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendation_cache_runs \
         (id, as_of_date, generated_at, status, error) \
         VALUES ($1, $2, $3, 'error', $4)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(as_of_date)
    .bind(Utc::now())
    .bind(error)
    .execute(pool)
    .await
    .context("insert error recommendation_cache_runs failed")?;
    Ok(run_id)
}

/// Rows of the newest successful run, if any.
pub async fn load_latest(
    pool: &sqlx::PgPool,
) -> anyhow::Result<Option<(Uuid, NaiveDate, Vec<RecommendationCacheRow>)>> {
    let run = sqlx::query_as::<_, (Uuid, NaiveDate)>(
        "SELECT id, as_of_date FROM recommendation_cache_runs \
         WHERE status = 'success' \
         ORDER BY as_of_date DESC, generated_at DESC \
         LIMIT 1",
    )
    .persistent(false)
    .fetch_optional(pool)
    .await
    .context("select latest recommendation_cache_runs failed")?;

    let Some((run_id, as_of_date)) = run else {
        return Ok(None);
    };

    let records = sqlx::query_as::<_, CacheRowRecord>(
        "SELECT fund_id, fund_name, category, base_index, level, archetype_id, \
                base_score, final_score, risk_tier, aum, avg_volume, volatility, expense_ratio \
         FROM recommendation_cache_rows \
         WHERE run_id = $1 \
         ORDER BY fund_id ASC, level ASC, final_score DESC, archetype_id ASC",
    )
    .persistent(false)
    .bind(run_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select recommendation_cache_rows failed (run_id={run_id})"))?;

    let rows = records
        .into_iter()
        .map(RecommendationCacheRow::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some((run_id, as_of_date, rows)))
}
