pub mod factors;

pub use factors::{compute_factor_scores, FactorInputs};

use crate::domain::fund::FundFactorScores;
use crate::policy::ArchetypeWeights;

/// Weighted sum of the resolved factor scores.
pub fn composite_score(scores: &FundFactorScores, weights: &ArchetypeWeights) -> f64 {
    weights.composite(&scores.resolved())
}

/// Rounds to the fixed precision used by every persisted score.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
