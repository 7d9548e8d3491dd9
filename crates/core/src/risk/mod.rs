pub mod metrics;
pub mod tier;

use crate::domain::classification::{RiskBin, RiskClassification, StrategyBin};
use crate::domain::price::{PriceObservation, RiskMetricRecord};
use crate::policy::EngineConfig;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Both phases of the risk pipeline over the whole fund universe.
#[derive(Debug, Clone, Default)]
pub struct RiskPipelineOutput {
    pub metrics: Vec<RiskMetricRecord>,
    pub classifications: Vec<RiskClassification>,
}

impl RiskPipelineOutput {
    /// Per-fund metrics first, then the per-date cross-sectional classification.
    pub fn run(prices: &BTreeMap<String, Vec<PriceObservation>>, cfg: &EngineConfig) -> Self {
        let metrics = metrics::compute_universe_metrics(prices, cfg);
        let classifications = tier::classify_all(&metrics, cfg);
        Self {
            metrics,
            classifications,
        }
    }

    /// Latest classification on or before `as_of` for every fund that has one.
    pub fn latest_classifications(&self, as_of: NaiveDate) -> BTreeMap<String, RiskClassification> {
        latest_by_fund(&self.classifications, as_of, |c| (&c.fund_id, c.date))
    }

    /// Latest metric record on or before `as_of` for every fund that has one.
    pub fn latest_metrics(&self, as_of: NaiveDate) -> BTreeMap<String, RiskMetricRecord> {
        latest_by_fund(&self.metrics, as_of, |m| (&m.fund_id, m.date))
    }
}

fn latest_by_fund<T: Clone>(
    items: &[T],
    as_of: NaiveDate,
    key: impl Fn(&T) -> (&String, NaiveDate),
) -> BTreeMap<String, T> {
    let mut out: BTreeMap<String, T> = BTreeMap::new();
    for item in items {
        let (fund_id, date) = key(item);
        if date > as_of {
            continue;
        }
        let newer = out.get(fund_id).map_or(true, |cur| key(cur).1 < date);
        if newer {
            out.insert(fund_id.clone(), item.clone());
        }
    }
    out
}

/// Distribution of labels across a set of classifications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationSummary {
    pub records: usize,
    pub funds: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub risk_averse: usize,
    pub eager: usize,
    pub buy_and_hold: usize,
    pub portfolio_adjusted: usize,
    pub tiers: BTreeMap<u8, usize>,
}

impl ClassificationSummary {
    pub fn from_classifications(items: &[RiskClassification]) -> Self {
        let mut out = Self {
            records: items.len(),
            ..Self::default()
        };
        let mut funds = std::collections::BTreeSet::new();
        for c in items {
            funds.insert(c.fund_id.as_str());
            out.first_date = Some(out.first_date.map_or(c.date, |d| d.min(c.date)));
            out.last_date = Some(out.last_date.map_or(c.date, |d| d.max(c.date)));
            match c.risk_bin {
                RiskBin::RiskAverse => out.risk_averse += 1,
                RiskBin::Eager => out.eager += 1,
            }
            match c.strategy_bin {
                StrategyBin::BuyAndHold => out.buy_and_hold += 1,
                StrategyBin::PortfolioAdjusted => out.portfolio_adjusted += 1,
            }
            *out.tiers.entry(c.risk_tier).or_default() += 1;
        }
        out.funds = funds.len();
        out
    }

    pub fn log(&self) {
        tracing::info!(
            records = self.records,
            funds = self.funds,
            first_date = ?self.first_date,
            last_date = ?self.last_date,
            risk_averse = self.risk_averse,
            eager = self.eager,
            buy_and_hold = self.buy_and_hold,
            portfolio_adjusted = self.portfolio_adjusted,
            tiers = ?self.tiers,
            "risk classification summary"
        );
    }
}
