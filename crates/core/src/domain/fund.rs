use serde::{Deserialize, Serialize};

/// Value that was either observed or is absent from the inputs.
///
/// Scores resolve `Missing` to the neutral default explicitly, so a measured 0.5 stays
/// distinguishable from an unmeasured one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Measured<T> {
    Present(T),
    Missing,
}

impl<T> Measured<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Measured::Present(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Measured::Present(v) => Some(v),
            Measured::Missing => None,
        }
    }
}

impl Measured<f64> {
    pub const NEUTRAL: f64 = 0.5;

    /// Finite values are present; `None`, NaN and infinities are missing.
    pub fn from_finite(v: Option<f64>) -> Self {
        match v {
            Some(x) if x.is_finite() => Measured::Present(x),
            _ => Measured::Missing,
        }
    }

    pub fn or_neutral(&self) -> f64 {
        match self {
            Measured::Present(v) => *v,
            Measured::Missing => Self::NEUTRAL,
        }
    }
}

/// Latest point-in-time metadata and performance attributes of a fund.
///
/// Returns, volatility and expense ratio are in percent units (`12.5` is 12.5%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundSnapshot {
    pub fund_id: String,
    pub name: String,
    pub category: Option<String>,
    pub base_index: Option<String>,
    pub return_1y: Option<f64>,
    pub return_3m: Option<f64>,
    pub volatility: Option<f64>,
    pub expense_ratio: Option<f64>,
    pub aum: Option<f64>,
    pub avg_volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Return,
    RiskAdjusted,
    CostEfficiency,
    Liquidity,
    Stability,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::Return,
        Factor::RiskAdjusted,
        Factor::CostEfficiency,
        Factor::Liquidity,
        Factor::Stability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Return => "return",
            Factor::RiskAdjusted => "risk_adjusted",
            Factor::CostEfficiency => "cost_efficiency",
            Factor::Liquidity => "liquidity",
            Factor::Stability => "stability",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundFactorScores {
    pub fund_id: String,
    pub return_score: Measured<f64>,
    pub risk_adjusted_score: Measured<f64>,
    pub cost_efficiency_score: Measured<f64>,
    pub liquidity_score: Measured<f64>,
    pub stability_score: Measured<f64>,
}

impl FundFactorScores {
    pub fn get(&self, factor: Factor) -> Measured<f64> {
        match factor {
            Factor::Return => self.return_score,
            Factor::RiskAdjusted => self.risk_adjusted_score,
            Factor::CostEfficiency => self.cost_efficiency_score,
            Factor::Liquidity => self.liquidity_score,
            Factor::Stability => self.stability_score,
        }
    }

    /// Resolved scores in [`Factor::ALL`] order, missing factors at the neutral default.
    pub fn resolved(&self) -> [f64; 5] {
        Factor::ALL.map(|f| self.get(f).or_neutral())
    }

    pub fn missing_factors(&self) -> Vec<Factor> {
        Factor::ALL
            .into_iter()
            .filter(|f| !self.get(*f).is_present())
            .collect()
    }
}
