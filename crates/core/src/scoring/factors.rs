use crate::domain::fund::{FundFactorScores, FundSnapshot, Measured};
use crate::domain::price::{PriceObservation, RiskMetricRecord};
use crate::risk::metrics::{recent_avg_volume, trailing_return_pct};

const TRADING_DAYS_1Y: usize = 252;
const TRADING_DAYS_3M: usize = 63;
const AVG_VOLUME_DAYS: usize = 20;

// Linear maps onto [0, 1]: value -> (value + offset) / span.
const RETURN_1Y_OFFSET: f64 = 50.0;
const RETURN_1Y_SPAN: f64 = 100.0;
const RETURN_3M_OFFSET: f64 = 20.0;
const RETURN_3M_SPAN: f64 = 40.0;
const SHARPE_LIKE_OFFSET: f64 = 2.0;
const SHARPE_LIKE_SPAN: f64 = 4.0;

/// Expense ratio (percent) at which cost efficiency reaches zero.
const MAX_EXPENSE_RATIO: f64 = 3.0;
/// Average daily volume that earns full liquidity.
const FULL_LIQUIDITY_VOLUME: f64 = 1_000_000.0;
/// Assets under management (KRW) that earn full stability.
const FULL_STABILITY_AUM: f64 = 100_000_000_000.0;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Raw per-fund attributes feeding the five factor scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorInputs {
    pub return_1y: Measured<f64>,
    pub return_3m: Measured<f64>,
    pub volatility: Measured<f64>,
    pub expense_ratio: Measured<f64>,
    pub avg_volume: Measured<f64>,
    pub aum: Measured<f64>,
}

impl FactorInputs {
    pub fn from_snapshot(s: &FundSnapshot) -> Self {
        Self {
            return_1y: Measured::from_finite(s.return_1y),
            return_3m: Measured::from_finite(s.return_3m),
            volatility: Measured::from_finite(s.volatility),
            expense_ratio: Measured::from_finite(s.expense_ratio),
            avg_volume: Measured::from_finite(s.avg_volume),
            aum: Measured::from_finite(s.aum),
        }
    }

    /// Fills attributes the snapshot lacks from the fund's own price history.
    ///
    /// Returns are taken 252 / 63 observations back; volatility comes from the latest rolling
    /// record (converted to percent); volume is the recent mean.
    pub fn with_price_fallbacks(
        mut self,
        series: &[PriceObservation],
        latest: Option<&RiskMetricRecord>,
    ) -> Self {
        if !self.return_1y.is_present() {
            self.return_1y = Measured::from_finite(trailing_return_pct(series, TRADING_DAYS_1Y));
        }
        if !self.return_3m.is_present() {
            self.return_3m = Measured::from_finite(trailing_return_pct(series, TRADING_DAYS_3M));
        }
        if !self.volatility.is_present() {
            self.volatility = Measured::from_finite(latest.map(|m| m.volatility * 100.0));
        }
        if !self.avg_volume.is_present() {
            self.avg_volume = Measured::from_finite(recent_avg_volume(series, AVG_VOLUME_DAYS));
        }
        self
    }
}

/// 1-year return preferred, 3-month return as fallback.
pub fn return_score(return_1y: Measured<f64>, return_3m: Measured<f64>) -> Measured<f64> {
    match (return_1y, return_3m) {
        (Measured::Present(r), _) => Measured::Present(clamp01((r + RETURN_1Y_OFFSET) / RETURN_1Y_SPAN)),
        (Measured::Missing, Measured::Present(r)) => {
            Measured::Present(clamp01((r + RETURN_3M_OFFSET) / RETURN_3M_SPAN))
        }
        _ => Measured::Missing,
    }
}

/// Return-to-volatility ratio mapped from [-2, 2]; needs a positive volatility.
pub fn risk_adjusted_score(return_1y: Measured<f64>, volatility: Measured<f64>) -> Measured<f64> {
    match (return_1y, volatility) {
        (Measured::Present(r), Measured::Present(vol)) if vol > 0.0 => {
            Measured::Present(clamp01((r / vol + SHARPE_LIKE_OFFSET) / SHARPE_LIKE_SPAN))
        }
        _ => Measured::Missing,
    }
}

pub fn cost_efficiency_score(expense_ratio: Measured<f64>) -> Measured<f64> {
    match expense_ratio {
        Measured::Present(fee) => Measured::Present(clamp01(1.0 - fee / MAX_EXPENSE_RATIO)),
        Measured::Missing => Measured::Missing,
    }
}

pub fn liquidity_score(avg_volume: Measured<f64>) -> Measured<f64> {
    match avg_volume {
        Measured::Present(v) => Measured::Present(clamp01(v / FULL_LIQUIDITY_VOLUME)),
        Measured::Missing => Measured::Missing,
    }
}

pub fn stability_score(aum: Measured<f64>) -> Measured<f64> {
    match aum {
        Measured::Present(v) => Measured::Present(clamp01(v / FULL_STABILITY_AUM)),
        Measured::Missing => Measured::Missing,
    }
}

pub fn compute_factor_scores(fund_id: &str, inputs: &FactorInputs) -> FundFactorScores {
    let scores = FundFactorScores {
        fund_id: fund_id.to_string(),
        return_score: return_score(inputs.return_1y, inputs.return_3m),
        risk_adjusted_score: risk_adjusted_score(inputs.return_1y, inputs.volatility),
        cost_efficiency_score: cost_efficiency_score(inputs.expense_ratio),
        liquidity_score: liquidity_score(inputs.avg_volume),
        stability_score: stability_score(inputs.aum),
    };

    for factor in scores.missing_factors() {
        tracing::debug!(
            fund_id,
            factor = factor.as_str(),
            neutral = Measured::<f64>::NEUTRAL,
            "factor unmeasured; using neutral default"
        );
    }
    scores
}
