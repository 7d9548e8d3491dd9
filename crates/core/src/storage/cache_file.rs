use crate::domain::cache::RecommendationCacheRow;
use crate::domain::classification::{RiskBin, RiskClassification, StrategyBin};
use crate::scoring::round4;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Column order of the cache artifact, matching [`RecommendationCacheRow`].
pub const CACHE_COLUMNS: [&str; 13] = [
    "fund_id",
    "fund_name",
    "category",
    "base_index",
    "level",
    "archetype_id",
    "base_score",
    "final_score",
    "risk_tier",
    "aum",
    "avg_volume",
    "volatility",
    "expense_ratio",
];

pub const CLASSIFICATION_COLUMNS: [&str; 6] = [
    "date",
    "fund_id",
    "risk_score",
    "risk_bin",
    "risk_tier",
    "strategy_bin",
];

#[derive(Debug, Serialize)]
struct ClassificationRow<'a> {
    date: NaiveDate,
    fund_id: &'a str,
    risk_score: f64,
    risk_bin: RiskBin,
    risk_tier: u8,
    strategy_bin: StrategyBin,
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes `rows` under a staging name and renames it into place, so readers never observe a
/// half-written file.
fn write_atomically<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let staging = staging_path(path);
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        writer
            .write_record(header)
            .context("failed to write CSV header")?;
        for row in rows {
            writer.serialize(row).context("failed to write CSV row")?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", staging.display()))?;
    }

    std::fs::rename(&staging, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

/// `rows` must already be in serialization order.
pub fn write_cache_csv(path: &Path, rows: &[RecommendationCacheRow]) -> anyhow::Result<()> {
    write_atomically(path, &CACHE_COLUMNS, rows)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "wrote recommendation cache");
    Ok(())
}

pub fn read_cache_csv(path: &Path) -> anyhow::Result<Vec<RecommendationCacheRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open cache {}", path.display()))?;

    let headers = reader.headers().context("failed to read cache header")?.clone();
    anyhow::ensure!(
        headers.iter().eq(CACHE_COLUMNS.iter().copied()),
        "unexpected cache columns in {}: {:?}",
        path.display(),
        headers
    );

    let mut rows = Vec::new();
    for (idx, record) in reader.deserialize::<RecommendationCacheRow>().enumerate() {
        let row = record
            .with_context(|| format!("invalid cache row {} in {}", idx + 1, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Per-date classification table, ordered by (date, fund_id), scores at 4 decimals.
pub fn write_classification_csv(path: &Path, items: &[RiskClassification]) -> anyhow::Result<()> {
    let mut sorted: Vec<&RiskClassification> = items.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.fund_id.cmp(&b.fund_id)));

    let rows: Vec<ClassificationRow<'_>> = sorted
        .into_iter()
        .map(|c| ClassificationRow {
            date: c.date,
            fund_id: &c.fund_id,
            risk_score: round4(c.risk_score),
            risk_bin: c.risk_bin,
            risk_tier: c.risk_tier,
            strategy_bin: c.strategy_bin,
        })
        .collect();

    write_atomically(path, &CLASSIFICATION_COLUMNS, &rows)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "wrote risk classifications");
    Ok(())
}
