use serde::{Deserialize, Serialize};

/// One eligible (fund, level, archetype) combination of the precomputed cache.
///
/// Field order is the column order of the cache artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationCacheRow {
    pub fund_id: String,
    pub fund_name: String,
    pub category: Option<String>,
    pub base_index: Option<String>,
    pub level: u8,
    pub archetype_id: String,
    pub base_score: f64,
    pub final_score: f64,
    /// Empty when the fund's risk could not be measured and the policy still admits it.
    pub risk_tier: Option<u8>,
    pub aum: Option<f64>,
    pub avg_volume: Option<f64>,
    pub volatility: Option<f64>,
    pub expense_ratio: Option<f64>,
}
