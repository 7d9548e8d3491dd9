use std::fmt;

/// Failure of one fund's cache computation. The run continues without the fund's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FundComputationError {
    pub fund_id: String,
    pub stage: &'static str,
    pub detail: String,
}

impl FundComputationError {
    pub fn new(fund_id: &str, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            fund_id: fund_id.to_string(),
            stage,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FundComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fund computation failed (fund_id={}, stage={}): {}",
            self.fund_id, self.stage, self.detail
        )
    }
}

impl std::error::Error for FundComputationError {}
