//! Typed error taxonomy.
//!
//! Per-iteration failures ([`ParseError`], [`CompletionError`]) are absorbed by
//! the controller. [`ControllerError`] is what escapes a run abnormally; it is
//! carried inside `anyhow::Error` and can be recovered with `downcast_ref`.

use thiserror::Error;

/// Model output was not in the shape a task expected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error: {reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The model capability failed to produce a completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("model command exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("model returned an empty completion")]
    Empty,
    #[error("model transport error: {0}")]
    Transport(String),
    /// Not worth retrying: the capability itself is set up wrong.
    #[error("model misconfigured: {0}")]
    Misconfigured(String),
}

impl CompletionError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, CompletionError::Misconfigured(_))
    }
}

/// Abnormal run termination.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("task could not derive a final target: {0:#}")]
    FinalTarget(anyhow::Error),
    #[error("model failed {failures} consecutive times (last: {last})")]
    CompletionBudgetExhausted {
        failures: u32,
        last: CompletionError,
    },
}
