use crate::domain::fund::Factor;
use crate::domain::price::RiskMetric;
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 5;
pub const MAX_RISK_TIER: u8 = 4;

/// Five-factor weight vector of one investor archetype.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeWeights {
    pub return_weight: f64,
    pub risk_adjusted_return_weight: f64,
    pub cost_efficiency_weight: f64,
    pub liquidity_weight: f64,
    pub stability_weight: f64,
}

impl ArchetypeWeights {
    pub const fn new(ret: f64, risk_adj: f64, cost: f64, liquidity: f64, stability: f64) -> Self {
        Self {
            return_weight: ret,
            risk_adjusted_return_weight: risk_adj,
            cost_efficiency_weight: cost,
            liquidity_weight: liquidity,
            stability_weight: stability,
        }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Return => self.return_weight,
            Factor::RiskAdjusted => self.risk_adjusted_return_weight,
            Factor::CostEfficiency => self.cost_efficiency_weight,
            Factor::Liquidity => self.liquidity_weight,
            Factor::Stability => self.stability_weight,
        }
    }

    /// Weights in [`Factor::ALL`] order.
    pub fn as_array(&self) -> [f64; 5] {
        Factor::ALL.map(|f| self.get(f))
    }

    /// Weighted sum of factor scores given in [`Factor::ALL`] order.
    pub fn composite(&self, scores: &[f64; 5]) -> f64 {
        self.as_array()
            .iter()
            .zip(scores.iter())
            .map(|(w, s)| w * s)
            .sum()
    }

    fn validate(&self, label: &str) -> anyhow::Result<()> {
        let weights = self.as_array();
        for (factor, w) in Factor::ALL.iter().zip(weights.iter()) {
            ensure!(
                w.is_finite() && *w >= 0.0,
                "{label}: {} weight must be a non-negative number (got {w})",
                factor.as_str()
            );
        }
        let sum: f64 = weights.iter().sum();
        ensure!(
            (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
            "{label}: factor weights must sum to 1.0 (got {sum})"
        );
        Ok(())
    }
}

/// Composite risk score weights, one per rolling metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub volatility: f64,
    pub max_drawdown: f64,
    pub value_at_risk: f64,
    pub beta: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub downside_deviation: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            volatility: 0.25,
            max_drawdown: 0.15,
            value_at_risk: 0.20,
            beta: 0.10,
            sharpe: 0.15,
            sortino: 0.10,
            downside_deviation: 0.05,
        }
    }
}

impl MetricWeights {
    pub fn get(&self, metric: RiskMetric) -> f64 {
        match metric {
            RiskMetric::Volatility => self.volatility,
            RiskMetric::MaxDrawdown => self.max_drawdown,
            RiskMetric::ValueAtRisk => self.value_at_risk,
            RiskMetric::Beta => self.beta,
            RiskMetric::Sharpe => self.sharpe,
            RiskMetric::Sortino => self.sortino,
            RiskMetric::DownsideDeviation => self.downside_deviation,
        }
    }

    pub fn as_array(&self) -> [f64; 7] {
        RiskMetric::ALL.map(|m| self.get(m))
    }
}

/// How funds without a measurable risk tier (too little history) enter the cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UnmeasuredRiskPolicy {
    Exclude,
    /// Admit the fund from `min_level` upward with its scores multiplied by `score_multiplier`.
    Penalize { min_level: u8, score_multiplier: f64 },
}

impl Default for UnmeasuredRiskPolicy {
    fn default() -> Self {
        UnmeasuredRiskPolicy::Penalize {
            min_level: 2,
            score_multiplier: 0.5,
        }
    }
}

impl UnmeasuredRiskPolicy {
    /// Score multiplier for an unmeasured fund at `level`, or `None` when it is not admitted.
    pub fn multiplier_for(&self, level: u8) -> Option<f64> {
        match *self {
            UnmeasuredRiskPolicy::Exclude => None,
            UnmeasuredRiskPolicy::Penalize {
                min_level,
                score_multiplier,
            } => (level >= min_level).then_some(score_multiplier),
        }
    }
}

/// Immutable engine configuration passed into every computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing window length in daily returns.
    pub window: usize,
    pub trading_days_per_year: f64,
    /// Number of quantile buckets for risk tiering.
    pub quantiles: usize,
    /// Tier assigned when a date's cross-section cannot be cut at all.
    pub degenerate_tier: u8,
    pub risk_bin_threshold: f64,
    pub strategy_mdd_threshold: f64,
    pub metric_weights: MetricWeights,
    /// Weights behind the archetype-independent `base_score` column.
    pub base_weights: ArchetypeWeights,
    pub archetypes: BTreeMap<String, ArchetypeWeights>,
    pub level_limits: BTreeMap<u8, u8>,
    pub unmeasured_risk: UnmeasuredRiskPolicy,
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: 126,
            trading_days_per_year: 252.0,
            quantiles: 5,
            degenerate_tier: 2,
            risk_bin_threshold: 0.4,
            strategy_mdd_threshold: 0.20,
            metric_weights: MetricWeights::default(),
            base_weights: ArchetypeWeights::new(0.30, 0.25, 0.20, 0.15, 0.10),
            archetypes: default_archetypes(),
            level_limits: default_level_limits(),
            unmeasured_risk: UnmeasuredRiskPolicy::default(),
            max_workers: 4,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("engine config is not valid JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("invalid engine config {}", path.display()))
    }

    /// Loads `path` when given, otherwise the built-in defaults, then applies env overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse::<usize>("RISK_WINDOW") {
            self.window = n;
        }
        if let Some(n) = env_parse::<usize>("RISK_QUANTILES") {
            self.quantiles = n;
        }
        if let Some(n) = env_parse::<usize>("CACHE_MAX_WORKERS") {
            self.max_workers = n;
        }
        if let Some(v) = env_parse::<f64>("RISK_BIN_THRESHOLD") {
            self.risk_bin_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("STRATEGY_MDD_THRESHOLD") {
            self.strategy_mdd_threshold = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.window >= 2, "window must be >= 2 (got {})", self.window);
        ensure!(
            self.trading_days_per_year.is_finite() && self.trading_days_per_year > 0.0,
            "trading_days_per_year must be positive"
        );
        ensure!(
            (1..=(MAX_RISK_TIER as usize + 1)).contains(&self.quantiles),
            "quantiles must be 1..={} (got {})",
            MAX_RISK_TIER + 1,
            self.quantiles
        );
        ensure!(
            self.degenerate_tier <= MAX_RISK_TIER,
            "degenerate_tier must be <= {MAX_RISK_TIER} (got {})",
            self.degenerate_tier
        );
        ensure!(self.max_workers >= 1, "max_workers must be >= 1");
        ensure!(
            self.risk_bin_threshold.is_finite() && self.strategy_mdd_threshold.is_finite(),
            "policy thresholds must be finite"
        );

        let metric_weights = self.metric_weights.as_array();
        ensure!(
            metric_weights.iter().all(|w| w.is_finite() && *w >= 0.0),
            "metric weights must be non-negative numbers"
        );
        let metric_sum: f64 = metric_weights.iter().sum();
        ensure!(
            (metric_sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
            "metric weights must sum to 1.0 (got {metric_sum})"
        );

        self.base_weights.validate("base_weights")?;

        ensure!(!self.archetypes.is_empty(), "at least one archetype is required");
        for (code, weights) in &self.archetypes {
            ensure!(
                code.len() == 4 && code.chars().all(|c| c.is_ascii_uppercase()),
                "archetype code must be 4 uppercase ASCII letters (got {code:?})"
            );
            weights.validate(&format!("archetype {code}"))?;
        }

        let mut prev: Option<u8> = None;
        for level in MIN_LEVEL..=MAX_LEVEL {
            let limit = self
                .level_limits
                .get(&level)
                .copied()
                .with_context(|| format!("level_limits is missing level {level}"))?;
            ensure!(
                limit <= MAX_RISK_TIER,
                "level {level} risk tier limit must be <= {MAX_RISK_TIER} (got {limit})"
            );
            if let Some(p) = prev {
                ensure!(
                    limit >= p,
                    "level risk limits must be non-decreasing (level {level}: {limit} < {p})"
                );
            }
            prev = Some(limit);
        }
        ensure!(
            self.level_limits
                .keys()
                .all(|l| (MIN_LEVEL..=MAX_LEVEL).contains(l)),
            "level_limits keys must be {MIN_LEVEL}..={MAX_LEVEL}"
        );

        if let UnmeasuredRiskPolicy::Penalize {
            min_level,
            score_multiplier,
        } = self.unmeasured_risk
        {
            ensure!(
                (MIN_LEVEL..=MAX_LEVEL + 1).contains(&min_level),
                "unmeasured_risk.min_level must be {MIN_LEVEL}..={} (got {min_level})",
                MAX_LEVEL + 1
            );
            ensure!(
                (0.0..=1.0).contains(&score_multiplier),
                "unmeasured_risk.score_multiplier must be between 0 and 1 (got {score_multiplier})"
            );
        }

        Ok(())
    }

    pub fn risk_tier_limit(&self, level: u8) -> Option<u8> {
        self.level_limits.get(&level).copied()
    }

    /// Whether a fund with a measured `risk_tier` may be shown to `level`.
    pub fn is_eligible(&self, level: u8, risk_tier: u8) -> bool {
        self.risk_tier_limit(level)
            .is_some_and(|limit| risk_tier <= limit)
    }

    pub fn archetype(&self, code: &str) -> Option<&ArchetypeWeights> {
        self.archetypes.get(code)
    }

    pub fn levels(&self) -> impl Iterator<Item = u8> {
        MIN_LEVEL..=MAX_LEVEL
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// WMTI investor types. A/I: active vs. introverted, P/B: professional vs. cautious.
fn default_archetypes() -> BTreeMap<String, ArchetypeWeights> {
    let table: [(&str, ArchetypeWeights); 16] = [
        ("APWL", ArchetypeWeights::new(0.35, 0.30, 0.15, 0.15, 0.05)),
        ("APML", ArchetypeWeights::new(0.40, 0.25, 0.15, 0.15, 0.05)),
        ("APWC", ArchetypeWeights::new(0.35, 0.25, 0.20, 0.15, 0.05)),
        ("APMC", ArchetypeWeights::new(0.40, 0.25, 0.15, 0.15, 0.05)),
        ("ABWL", ArchetypeWeights::new(0.30, 0.25, 0.20, 0.15, 0.10)),
        ("ABML", ArchetypeWeights::new(0.30, 0.25, 0.20, 0.15, 0.10)),
        ("ABWC", ArchetypeWeights::new(0.25, 0.25, 0.25, 0.15, 0.10)),
        ("ABMC", ArchetypeWeights::new(0.30, 0.25, 0.20, 0.15, 0.10)),
        ("IPWL", ArchetypeWeights::new(0.25, 0.30, 0.25, 0.10, 0.10)),
        ("IPML", ArchetypeWeights::new(0.30, 0.30, 0.20, 0.10, 0.10)),
        ("IPWC", ArchetypeWeights::new(0.25, 0.30, 0.25, 0.10, 0.10)),
        ("IPMC", ArchetypeWeights::new(0.30, 0.30, 0.20, 0.10, 0.10)),
        ("IBWL", ArchetypeWeights::new(0.20, 0.25, 0.25, 0.15, 0.15)),
        ("IBML", ArchetypeWeights::new(0.25, 0.25, 0.25, 0.15, 0.10)),
        ("IBWC", ArchetypeWeights::new(0.20, 0.25, 0.30, 0.15, 0.10)),
        ("IBMC", ArchetypeWeights::new(0.25, 0.25, 0.25, 0.15, 0.10)),
    ];
    table
        .into_iter()
        .map(|(code, w)| (code.to_string(), w))
        .collect()
}

fn default_level_limits() -> BTreeMap<u8, u8> {
    // Level 5 admits every tier.
    BTreeMap::from([(1, 1), (2, 2), (3, 3), (4, 4), (5, 4)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.archetypes.len(), 16);
        assert_eq!(cfg.window, 126);
        assert_eq!(cfg.quantiles, 5);
    }

    #[test]
    fn every_default_archetype_sums_to_one() {
        for (code, w) in EngineConfig::default().archetypes {
            let sum: f64 = w.as_array().iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "{code} sums to {sum}");
        }
    }

    #[test]
    fn composite_matches_hand_computation() {
        let w = ArchetypeWeights::new(0.4, 0.25, 0.2, 0.1, 0.05);
        let score = w.composite(&[0.8, 0.6, 0.9, 0.3, 0.5]);
        assert!((score - 0.705).abs() < 1e-12);
    }

    #[test]
    fn eligibility_respects_level_limits() {
        let cfg = EngineConfig::default();
        assert!(cfg.is_eligible(1, 0));
        assert!(cfg.is_eligible(1, 1));
        assert!(!cfg.is_eligible(1, 2));
        assert!(cfg.is_eligible(5, 4));
        assert!(!cfg.is_eligible(6, 0));
    }

    #[test]
    fn unmeasured_policy_reference_behavior() {
        let p = UnmeasuredRiskPolicy::default();
        assert_eq!(p.multiplier_for(1), None);
        assert_eq!(p.multiplier_for(2), Some(0.5));
        assert_eq!(p.multiplier_for(5), Some(0.5));
        assert_eq!(UnmeasuredRiskPolicy::Exclude.multiplier_for(5), None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg = EngineConfig::from_json_str(
            &json!({
                "window": 60,
                "unmeasured_risk": {"mode": "exclude"},
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(cfg.window, 60);
        assert_eq!(cfg.quantiles, 5);
        assert_eq!(cfg.unmeasured_risk, UnmeasuredRiskPolicy::Exclude);
        assert_eq!(cfg.archetypes.len(), 16);
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let res = EngineConfig::from_json_str(
            &json!({
                "archetypes": {
                    "ABCD": {
                        "return_weight": 0.5,
                        "risk_adjusted_return_weight": 0.5,
                        "cost_efficiency_weight": 0.5,
                        "liquidity_weight": 0.0,
                        "stability_weight": 0.0
                    }
                }
            })
            .to_string(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn rejects_bad_archetype_code_and_decreasing_limits() {
        let mut cfg = EngineConfig::default();
        let w = cfg.base_weights;
        cfg.archetypes.insert("toolong".to_string(), w);
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.level_limits.insert(3, 1);
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.level_limits.remove(&4);
        assert!(cfg.validate().is_err());
    }
}
