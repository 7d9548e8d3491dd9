use anyhow::Context;
use chrono::{Datelike, NaiveDate};

// Session-scoped advisory lock; keeps two cache builds for the same as-of date from
// interleaving their inserts.
const LOCK_NAMESPACE: i64 = 0x4554_4653_4352; // "ETFSCR"

fn lock_key_for_date(as_of_date: NaiveDate) -> i64 {
    LOCK_NAMESPACE ^ (as_of_date.num_days_from_ce() as i64)
}

pub async fn try_acquire_cache_build_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = lock_key_for_date(as_of_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire cache build lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_cache_build_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key_for_date(as_of_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release cache build lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_differ_per_date() {
        let d = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        assert_ne!(lock_key_for_date(d), lock_key_for_date(d.succ_opt().unwrap()));
        assert_eq!(lock_key_for_date(d), lock_key_for_date(d));
    }
}
