use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One cleaned daily observation of a fund and its benchmark index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub fund_id: String,
    pub date: NaiveDate,
    pub close_price: f64,
    pub benchmark_close_price: f64,
    pub volume: Option<f64>,
}

/// Rolling-window risk statistics for one fund as of one date.
///
/// Ratios whose denominator vanishes over the window are `None` rather than 0 or infinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetricRecord {
    pub fund_id: String,
    pub date: NaiveDate,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub value_at_risk_95: f64,
    pub beta: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub downside_deviation: f64,
}

impl RiskMetricRecord {
    /// Metric values in [`RiskMetric::ALL`] order.
    pub fn metric_values(&self) -> [Option<f64>; 7] {
        [
            Some(self.volatility),
            Some(self.max_drawdown),
            Some(self.value_at_risk_95),
            self.beta,
            self.sharpe_ratio,
            self.sortino_ratio,
            Some(self.downside_deviation),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMetric {
    Volatility,
    MaxDrawdown,
    ValueAtRisk,
    Beta,
    Sharpe,
    Sortino,
    DownsideDeviation,
}

impl RiskMetric {
    pub const ALL: [RiskMetric; 7] = [
        RiskMetric::Volatility,
        RiskMetric::MaxDrawdown,
        RiskMetric::ValueAtRisk,
        RiskMetric::Beta,
        RiskMetric::Sharpe,
        RiskMetric::Sortino,
        RiskMetric::DownsideDeviation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskMetric::Volatility => "volatility",
            RiskMetric::MaxDrawdown => "max_drawdown",
            RiskMetric::ValueAtRisk => "value_at_risk",
            RiskMetric::Beta => "beta",
            RiskMetric::Sharpe => "sharpe",
            RiskMetric::Sortino => "sortino",
            RiskMetric::DownsideDeviation => "downside_deviation",
        }
    }
}
