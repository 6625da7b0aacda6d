use serde::{Deserialize, Serialize};

use rff::core::types::{RunResult, RunStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Exhausted,
    Error,
}

pub fn classify_outcome(result: Option<&RunResult>) -> Outcome {
    match result.map(|r| r.status) {
        Some(RunStatus::Accepted | RunStatus::AcceptedUnverified) => Outcome::Success,
        Some(RunStatus::Exhausted) => Outcome::Exhausted,
        None => Outcome::Error,
    }
}
