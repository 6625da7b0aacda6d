//! Shared deterministic types for the controller.
//!
//! These types define stable contracts between the controller, the task
//! specializations, and the outer wiring (CLI, eval). They do not depend on
//! external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::workspace::Workspace;

/// Symbolic description of a goal state. Opaque to the controller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Depth of a frontier in the tree variant's stack (root is step 0).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepIndex(pub u32);

impl StepIndex {
    pub const ROOT: StepIndex = StepIndex(0);

    pub fn next(self) -> StepIndex {
        StepIndex(self.0 + 1)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of `verify_final`.
///
/// A rejection is an expected negative answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    pub rationale: String,
}

impl Verdict {
    pub fn accept(rationale: impl Into<String>) -> Self {
        Self {
            accepted: true,
            rationale: rationale.into(),
        }
    }

    pub fn reject(rationale: impl Into<String>) -> Self {
        Self {
            accepted: false,
            rationale: rationale.into(),
        }
    }
}

/// Controller variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Monotone accumulation; deltas are merged unconditionally.
    #[default]
    Dag,
    /// Search with an explicit frontier stack and backtracking.
    Tree,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Dag => "dag",
            Variant::Tree => "tree",
        }
    }
}

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// `verify_final` accepted the workspace.
    Accepted,
    /// Budget exhausted, but the goal held locally and verification was not
    /// required.
    AcceptedUnverified,
    /// Budget exhausted without an accepted answer.
    Exhausted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Accepted => "accepted",
            RunStatus::AcceptedUnverified => "accepted_unverified",
            RunStatus::Exhausted => "exhausted",
        }
    }
}

/// Record returned by every run that does not fail abnormally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub accepted: bool,
    pub status: RunStatus,
    pub variant: Variant,
    pub final_workspace_summary: String,
    pub rationale: String,
    pub iterations_used: u32,
    pub workspace: Workspace,
}
