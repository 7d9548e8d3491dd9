use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBin {
    RiskAverse,
    Eager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyBin {
    BuyAndHold,
    PortfolioAdjusted,
}

/// Cross-sectional classification of one fund on one date.
///
/// `risk_tier` is relative to every fund classified on the same date, so it can move when the
/// universe changes even if the fund's own metrics do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskClassification {
    pub date: NaiveDate,
    pub fund_id: String,
    pub risk_score: f64,
    pub risk_bin: RiskBin,
    pub risk_tier: u8,
    pub strategy_bin: StrategyBin,
}
