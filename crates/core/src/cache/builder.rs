//! Fork-join precomputation of the {fund x level x archetype} recommendation table.
//!
//! One blocking task per fund, bounded by `max_workers`; every task owns its rows. Rows are only
//! merged and sorted after all tasks joined.

use crate::cache::error::FundComputationError;
use crate::domain::cache::RecommendationCacheRow;
use crate::domain::classification::RiskClassification;
use crate::domain::fund::{FundSnapshot, Measured};
use crate::domain::price::{PriceObservation, RiskMetricRecord};
use crate::policy::{EngineConfig, MAX_RISK_TIER};
use crate::risk::RiskPipelineOutput;
use crate::scoring::{composite_score, compute_factor_scores, round4, FactorInputs};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const PROGRESS_EVERY: usize = 50;

/// Read-only inputs shared by every per-fund task.
#[derive(Debug, Clone)]
pub struct CacheInputs {
    pub as_of_date: NaiveDate,
    pub prices: BTreeMap<String, Vec<PriceObservation>>,
    pub snapshots: BTreeMap<String, FundSnapshot>,
    /// Latest classification per fund on or before `as_of_date`.
    pub classifications: BTreeMap<String, RiskClassification>,
    /// Latest rolling metrics per fund on or before `as_of_date`.
    pub metrics: BTreeMap<String, RiskMetricRecord>,
}

impl CacheInputs {
    /// Pins every input to `as_of_date`: later prices are dropped, and the latest risk records
    /// on or before that date are selected.
    pub fn from_pipeline(
        as_of_date: NaiveDate,
        prices: BTreeMap<String, Vec<PriceObservation>>,
        snapshots: BTreeMap<String, FundSnapshot>,
        risk: &RiskPipelineOutput,
    ) -> Self {
        let prices = prices
            .into_iter()
            .map(|(id, mut series)| {
                series.retain(|o| o.date <= as_of_date);
                (id, series)
            })
            .collect();

        Self {
            as_of_date,
            prices,
            snapshots,
            classifications: risk.latest_classifications(as_of_date),
            metrics: risk.latest_metrics(as_of_date),
        }
    }

    /// Every fund that appears in the snapshot table or the price table.
    pub fn fund_ids(&self) -> BTreeSet<String> {
        self.snapshots
            .keys()
            .chain(self.prices.keys())
            .cloned()
            .collect()
    }
}

/// Rows of one fund across all levels and archetypes it is eligible for.
pub fn build_fund_rows(
    fund_id: &str,
    inputs: &CacheInputs,
    cfg: &EngineConfig,
) -> Result<Vec<RecommendationCacheRow>, FundComputationError> {
    let snapshot = inputs
        .snapshots
        .get(fund_id)
        .cloned()
        .unwrap_or_else(|| FundSnapshot {
            fund_id: fund_id.to_string(),
            name: fund_id.to_string(),
            ..FundSnapshot::default()
        });
    let series = inputs.prices.get(fund_id).map(Vec::as_slice).unwrap_or(&[]);

    let factor_inputs = FactorInputs::from_snapshot(&snapshot)
        .with_price_fallbacks(series, inputs.metrics.get(fund_id));
    let scores = compute_factor_scores(fund_id, &factor_inputs);
    if let Some(bad) = scores
        .resolved()
        .into_iter()
        .find(|s| !(0.0..=1.0).contains(s))
    {
        return Err(FundComputationError::new(
            fund_id,
            "factor_scores",
            format!("factor score outside [0, 1]: {bad}"),
        ));
    }

    let risk_tier = inputs.classifications.get(fund_id).map(|c| c.risk_tier);
    if let Some(tier) = risk_tier.filter(|t| *t > MAX_RISK_TIER) {
        return Err(FundComputationError::new(
            fund_id,
            "risk_tier",
            format!("risk tier {tier} exceeds {MAX_RISK_TIER}"),
        ));
    }

    let base_score = round4(composite_score(&scores, &cfg.base_weights));
    let display = |v: Measured<f64>| v.as_option().copied().map(round4);

    let mut rows = Vec::new();
    for level in cfg.levels() {
        let multiplier = match risk_tier {
            Some(tier) => cfg.is_eligible(level, tier).then_some(1.0),
            None => cfg.unmeasured_risk.multiplier_for(level),
        };
        let Some(multiplier) = multiplier else {
            continue;
        };

        for (archetype_id, weights) in &cfg.archetypes {
            rows.push(RecommendationCacheRow {
                fund_id: snapshot.fund_id.clone(),
                fund_name: snapshot.name.clone(),
                category: snapshot.category.clone(),
                base_index: snapshot.base_index.clone(),
                level,
                archetype_id: archetype_id.clone(),
                base_score,
                final_score: round4(composite_score(&scores, weights) * multiplier),
                risk_tier,
                aum: display(factor_inputs.aum),
                avg_volume: display(factor_inputs.avg_volume),
                volatility: display(factor_inputs.volatility),
                expense_ratio: display(factor_inputs.expense_ratio),
            });
        }
    }

    if risk_tier.is_none() {
        tracing::debug!(
            fund_id,
            rows = rows.len(),
            policy = ?cfg.unmeasured_risk,
            "risk tier unmeasured; applied unmeasured-risk policy"
        );
    }
    Ok(rows)
}

/// Serialization order: fund, level, best score first, archetype.
pub fn sort_rows(rows: &mut [RecommendationCacheRow]) {
    rows.sort_by(|a, b| {
        a.fund_id
            .cmp(&b.fund_id)
            .then(a.level.cmp(&b.level))
            .then(b.final_score.total_cmp(&a.final_score))
            .then_with(|| a.archetype_id.cmp(&b.archetype_id))
    });
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheRunSummary {
    pub funds: usize,
    pub funds_with_rows: usize,
    pub funds_failed: usize,
    pub unmeasured_funds: usize,
    pub rows: usize,
    pub rows_per_level: BTreeMap<u8, usize>,
    /// Keyed by tier number, `unmeasured` for funds without a tier.
    pub rows_per_tier: BTreeMap<String, usize>,
}

impl CacheRunSummary {
    fn collect(
        inputs: &CacheInputs,
        rows: &[RecommendationCacheRow],
        failures: &[FundComputationError],
    ) -> Self {
        let fund_ids = inputs.fund_ids();
        let mut out = Self {
            funds: fund_ids.len(),
            funds_failed: failures.len(),
            unmeasured_funds: fund_ids
                .iter()
                .filter(|id| !inputs.classifications.contains_key(*id))
                .count(),
            rows: rows.len(),
            ..Self::default()
        };

        let mut with_rows = BTreeSet::new();
        for row in rows {
            with_rows.insert(row.fund_id.as_str());
            *out.rows_per_level.entry(row.level).or_default() += 1;
            let tier = row
                .risk_tier
                .map_or_else(|| "unmeasured".to_string(), |t| t.to_string());
            *out.rows_per_tier.entry(tier).or_default() += 1;
        }
        out.funds_with_rows = with_rows.len();
        out
    }

    pub fn log(&self, as_of_date: NaiveDate) {
        tracing::info!(
            %as_of_date,
            funds = self.funds,
            funds_with_rows = self.funds_with_rows,
            funds_failed = self.funds_failed,
            unmeasured_funds = self.unmeasured_funds,
            rows = self.rows,
            rows_per_level = ?self.rows_per_level,
            rows_per_tier = ?self.rows_per_tier,
            "recommendation cache summary"
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheBuild {
    /// Sorted with [`sort_rows`].
    pub rows: Vec<RecommendationCacheRow>,
    pub failures: Vec<FundComputationError>,
    pub summary: CacheRunSummary,
}

pub async fn build_cache(inputs: Arc<CacheInputs>, cfg: Arc<EngineConfig>) -> CacheBuild {
    build_cache_with(inputs, cfg, build_fund_rows).await
}

/// Runs `compute` for every fund on the blocking pool.
///
/// A fund whose computation errors or panics is logged and contributes no rows; the build
/// itself never fails.
pub async fn build_cache_with<F>(
    inputs: Arc<CacheInputs>,
    cfg: Arc<EngineConfig>,
    compute: F,
) -> CacheBuild
where
    F: Fn(&str, &CacheInputs, &EngineConfig) -> Result<Vec<RecommendationCacheRow>, FundComputationError>
        + Send
        + Sync
        + 'static,
{
    let started = Instant::now();
    let compute = Arc::new(compute);
    let fund_ids = inputs.fund_ids();
    let total = fund_ids.len();
    let semaphore = Arc::new(Semaphore::new(cfg.max_workers.max(1)));

    tracing::info!(
        as_of_date = %inputs.as_of_date,
        funds = total,
        levels = cfg.levels().count(),
        archetypes = cfg.archetypes.len(),
        max_workers = cfg.max_workers,
        "cache build started"
    );

    let mut set = JoinSet::new();
    for fund_id in fund_ids {
        let inputs = Arc::clone(&inputs);
        let cfg = Arc::clone(&cfg);
        let compute = Arc::clone(&compute);
        let semaphore = Arc::clone(&semaphore);

        set.spawn(async move {
            // Held until the blocking computation finishes.
            let _permit = semaphore.acquire_owned().await;
            let id = fund_id.clone();
            let joined = tokio::task::spawn_blocking(move || (*compute)(id.as_str(), &*inputs, &*cfg)).await;
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(FundComputationError::new(
                    &fund_id,
                    "panic",
                    panic_message(err.into_panic()),
                )),
                Err(err) => Err(FundComputationError::new(&fund_id, "join", err.to_string())),
            };
            (fund_id, result)
        });
    }

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    let mut completed = 0usize;
    while let Some(joined) = set.join_next().await {
        completed += 1;
        match joined {
            Ok((_, Ok(fund_rows))) => rows.extend(fund_rows),
            Ok((fund_id, Err(err))) => {
                tracing::error!(fund_id = %fund_id, stage = err.stage, error = %err, "fund skipped");
                failures.push(err);
            }
            Err(err) => tracing::error!(error = %err, "cache task aborted"),
        }

        if completed % PROGRESS_EVERY == 0 {
            tracing::info!(
                completed,
                total,
                elapsed_ms = started.elapsed().as_millis(),
                "cache build progress"
            );
        }
    }

    sort_rows(&mut rows);
    failures.sort_by(|a, b| a.fund_id.cmp(&b.fund_id));
    let summary = CacheRunSummary::collect(&inputs, &rows, &failures);

    tracing::info!(
        as_of_date = %inputs.as_of_date,
        rows = rows.len(),
        failures = failures.len(),
        elapsed_ms = started.elapsed().as_millis(),
        "cache build finished"
    );
    CacheBuild {
        rows,
        failures,
        summary,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
