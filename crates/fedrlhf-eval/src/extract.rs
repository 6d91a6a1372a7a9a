//! Reading verdicts out of judge answers.

use crate::error::{EvalError, EvalResult};

const RATING_OPEN: &str = "Rating: [[";
const DECISION: &str = "final decision is ";

/// Pairwise verdict; the numeric codes are what result files record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairwiseDecision {
    Response1,
    Response2,
    Tie,
    Unknown,
}

impl PairwiseDecision {
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            Self::Response1 => 0,
            Self::Response2 => 1,
            Self::Tie => 2,
            Self::Unknown => -1,
        }
    }
}

/// Rating in the last `Rating: [[x]]` of the answer, or 0.0 when there is none.
pub fn extract_single_rating(output: &str) -> EvalResult<f64> {
    let Some(pos) = output.rfind(RATING_OPEN) else {
        return Ok(0.0);
    };
    let start = pos + RATING_OPEN.len();
    let Some(len) = output[start..].find("]]") else {
        return Ok(0.0);
    };
    let raw = output[start..start + len].trim();
    raw.parse::<f64>().map_err(|_| EvalError::Rating(raw.to_string()))
}

/// Decision following the last `final decision is `.
#[must_use]
pub fn extract_pairwise_result(output: &str) -> PairwiseDecision {
    let output = output.trim();
    let Some(pos) = output.rfind(DECISION) else {
        return PairwiseDecision::Unknown;
    };
    let rest = output[pos + DECISION.len()..].trim().to_lowercase();
    if rest.starts_with("response 1") {
        PairwiseDecision::Response1
    } else if rest.starts_with("response 2") {
        PairwiseDecision::Response2
    } else if rest.starts_with("tie") {
        PairwiseDecision::Tie
    } else {
        PairwiseDecision::Unknown
    }
}
