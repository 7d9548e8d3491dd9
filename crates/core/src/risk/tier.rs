//! Cross-sectional classification of all funds sharing a date.

use crate::domain::classification::{RiskBin, RiskClassification, StrategyBin};
use crate::domain::price::{RiskMetric, RiskMetricRecord};
use crate::policy::EngineConfig;
use crate::risk::metrics::{quantile_sorted, sorted_copy};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Outcome of cutting one date's risk scores into quantile buckets.
#[derive(Debug, Clone, PartialEq)]
pub enum TierCut {
    /// Ascending, de-duplicated bin edges; `edges.len() - 1` effective tiers.
    Bins { edges: Vec<f64> },
    /// No two distinct edges (a single fund, or identical scores); every fund gets the fallback.
    Degenerate { fallback_tier: u8 },
}

impl TierCut {
    /// Equal-frequency edges with duplicates dropped.
    pub fn from_scores(scores: &[f64], quantiles: usize, fallback_tier: u8) -> Self {
        let sorted = sorted_copy(scores);
        if sorted.is_empty() || quantiles == 0 {
            return TierCut::Degenerate { fallback_tier };
        }

        let mut edges: Vec<f64> = (0..=quantiles)
            .map(|k| quantile_sorted(&sorted, k as f64 / quantiles as f64))
            .collect();
        edges.dedup();

        if edges.len() < 2 {
            TierCut::Degenerate { fallback_tier }
        } else {
            TierCut::Bins { edges }
        }
    }

    pub fn effective_tiers(&self) -> usize {
        match self {
            TierCut::Bins { edges } => edges.len() - 1,
            TierCut::Degenerate { .. } => 1,
        }
    }

    /// Right-closed bins, the lowest one also closed on the left.
    pub fn tier_of(&self, score: f64) -> u8 {
        match self {
            TierCut::Bins { edges } => {
                let bins = edges.len() - 1;
                let idx = edges[1..].partition_point(|e| *e < score);
                idx.min(bins - 1) as u8
            }
            TierCut::Degenerate { fallback_tier } => *fallback_tier,
        }
    }
}

/// Weighted composite of per-date max-abs normalised metrics.
///
/// Missing metrics drop out and the remaining weights are rescaled, so an undefined ratio
/// neither adds nor hides risk.
fn composite_scores(records: &[&RiskMetricRecord], cfg: &EngineConfig) -> Vec<f64> {
    let weights = cfg.metric_weights.as_array();

    let mut max_abs = [0.0f64; 7];
    for rec in records {
        for (slot, v) in max_abs.iter_mut().zip(rec.metric_values()) {
            if let Some(v) = v {
                *slot = slot.max(v.abs());
            }
        }
    }

    records
        .iter()
        .map(|rec| {
            let mut weighted = 0.0;
            let mut weight_sum = 0.0;
            for ((v, w), max) in rec.metric_values().iter().zip(weights).zip(max_abs) {
                let Some(v) = v else { continue };
                let normalized = if max > 0.0 { v.abs() / max } else { 0.0 };
                weighted += w * normalized;
                weight_sum += w;
            }
            if weight_sum > 0.0 {
                (weighted / weight_sum).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Classifies every record of one date. Records are expected to share `date`.
pub fn classify_date(
    date: NaiveDate,
    records: &[&RiskMetricRecord],
    cfg: &EngineConfig,
) -> Vec<RiskClassification> {
    if records.is_empty() {
        return Vec::new();
    }

    let scores = composite_scores(records, cfg);
    let cut = TierCut::from_scores(&scores, cfg.quantiles, cfg.degenerate_tier);

    match &cut {
        TierCut::Degenerate { fallback_tier } => tracing::warn!(
            %date,
            funds = records.len(),
            fallback_tier,
            "degenerate quantile cut; assigning fallback tier"
        ),
        TierCut::Bins { .. } if cut.effective_tiers() < cfg.quantiles => tracing::warn!(
            %date,
            funds = records.len(),
            effective_tiers = cut.effective_tiers(),
            quantiles = cfg.quantiles,
            "duplicate quantile edges dropped"
        ),
        TierCut::Bins { .. } => {}
    }

    records
        .iter()
        .zip(scores)
        .map(|(rec, risk_score)| RiskClassification {
            date,
            fund_id: rec.fund_id.clone(),
            risk_score,
            risk_bin: if risk_score <= cfg.risk_bin_threshold {
                RiskBin::RiskAverse
            } else {
                RiskBin::Eager
            },
            risk_tier: cut.tier_of(risk_score),
            strategy_bin: if rec.max_drawdown <= cfg.strategy_mdd_threshold {
                StrategyBin::BuyAndHold
            } else {
                StrategyBin::PortfolioAdjusted
            },
        })
        .collect()
}

/// Second pipeline phase: group every record by date and classify each cross-section.
///
/// Output is ordered by (date, fund_id).
pub fn classify_all(records: &[RiskMetricRecord], cfg: &EngineConfig) -> Vec<RiskClassification> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&RiskMetricRecord>> = BTreeMap::new();
    for rec in records {
        by_date.entry(rec.date).or_default().push(rec);
    }

    let mut out = Vec::with_capacity(records.len());
    for (date, mut group) in by_date {
        group.sort_by(|a, b| a.fund_id.cmp(&b.fund_id));
        out.extend(classify_date(date, &group, cfg));
    }
    out
}

/// Metric names paired with their weights, for diagnostics.
pub fn metric_weight_table(cfg: &EngineConfig) -> Vec<(&'static str, f64)> {
    RiskMetric::ALL
        .iter()
        .map(|m| (m.as_str(), cfg.metric_weights.get(*m)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(fund_id: &str, vol: f64, mdd: f64) -> RiskMetricRecord {
        RiskMetricRecord {
            fund_id: fund_id.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            volatility: vol,
            max_drawdown: mdd,
            value_at_risk_95: -vol / 10.0,
            beta: Some(vol * 4.0),
            sharpe_ratio: Some(0.5),
            sortino_ratio: Some(0.7),
            downside_deviation: vol / 2.0,
        }
    }

    fn universe(n: usize) -> Vec<RiskMetricRecord> {
        (0..n)
            .map(|i| record(&format!("F{i:03}"), 0.05 + 0.01 * i as f64, 0.01 * i as f64))
            .collect()
    }

    #[test]
    fn scores_are_bounded_and_tiers_monotone() {
        let recs = universe(23);
        let out = classify_all(&recs, &EngineConfig::default());
        assert_eq!(out.len(), 23);

        let tiers: BTreeSet<u8> = out.iter().map(|c| c.risk_tier).collect();
        assert!(tiers.len() <= 5);
        assert_eq!(tiers, BTreeSet::from([0, 1, 2, 3, 4]));

        let mut by_score = out.clone();
        by_score.sort_by(|a, b| a.risk_score.total_cmp(&b.risk_score));
        for pair in by_score.windows(2) {
            assert!((0.0..=1.0).contains(&pair[0].risk_score));
            assert!(pair[0].risk_tier <= pair[1].risk_tier);
        }
    }

    #[test]
    fn missing_ratios_drop_out_of_the_score() {
        let mut a = record("A", 0.0, 0.0);
        a.value_at_risk_95 = 0.0;
        a.downside_deviation = 0.0;
        a.sharpe_ratio = None;
        a.sortino_ratio = None;
        a.beta = None;
        let b = record("B", 0.2, 0.3);

        let out = classify_all(&[a, b], &EngineConfig::default());
        let a_cls = out.iter().find(|c| c.fund_id == "A").unwrap();
        assert_eq!(a_cls.risk_score, 0.0);
        assert_eq!(a_cls.risk_bin, RiskBin::RiskAverse);
        assert!(out.iter().all(|c| c.risk_score.is_finite()));
    }

    #[test]
    fn single_fund_gets_fallback_tier() {
        let recs = universe(1);
        let out = classify_all(&recs, &EngineConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].risk_tier, 2);
    }

    #[test]
    fn identical_scores_get_fallback_tier() {
        let recs: Vec<_> = (0..4).map(|i| record(&format!("F{i}"), 0.1, 0.1)).collect();
        let out = classify_all(&recs, &EngineConfig::default());
        assert!(out.iter().all(|c| c.risk_tier == 2));
    }

    #[test]
    fn low_dispersion_yields_fewer_tiers() {
        let scores = [0.1, 0.1, 0.1, 0.1, 0.5, 0.5, 0.5, 0.9, 0.9, 0.9];
        let cut = TierCut::from_scores(&scores, 5, 2);
        assert_eq!(cut.effective_tiers(), 3);
        assert_eq!(cut.tier_of(0.1), 0);
        assert_eq!(cut.tier_of(0.5), 1);
        assert_eq!(cut.tier_of(0.9), 2);
    }

    #[test]
    fn quantile_cut_matches_equal_frequency_buckets() {
        let scores: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let cut = TierCut::from_scores(&scores, 5, 2);
        let tiers: Vec<u8> = scores.iter().map(|s| cut.tier_of(*s)).collect();
        assert_eq!(tiers, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn binary_labels_follow_fixed_thresholds() {
        let recs = vec![record("A", 0.05, 0.20), record("B", 0.30, 0.21)];
        let out = classify_all(&recs, &EngineConfig::default());
        assert_eq!(out[0].strategy_bin, StrategyBin::BuyAndHold);
        assert_eq!(out[1].strategy_bin, StrategyBin::PortfolioAdjusted);
        for c in &out {
            let expected = if c.risk_score <= 0.4 {
                RiskBin::RiskAverse
            } else {
                RiskBin::Eager
            };
            assert_eq!(c.risk_bin, expected);
        }
    }

    #[test]
    fn tiers_are_relative_to_each_date() {
        let mut recs = universe(10);
        let other = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
        for r in universe(5) {
            recs.push(RiskMetricRecord { date: other, ..r });
        }
        let out = classify_all(&recs, &EngineConfig::default());
        for date in [recs[0].date, other] {
            let max_tier = out.iter().filter(|c| c.date == date).map(|c| c.risk_tier).max();
            assert_eq!(max_tier, Some(4));
        }
    }

    #[test]
    fn weight_table_lists_all_metrics() {
        let t = metric_weight_table(&EngineConfig::default());
        assert_eq!(t.len(), 7);
        let sum: f64 = t.iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }
}
