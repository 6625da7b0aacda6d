//! Capability contract a task implements.
//!
//! The controller invokes these operations and nothing else. Prompt builders
//! produce the *prompt*, never the answer; parsers turn model text back into
//! targets and workspace deltas.

use anyhow::Result;

use crate::core::avoid::AvoidSet;
use crate::core::types::{StepIndex, Target, Verdict};
use crate::core::workspace::Workspace;
use crate::error::{CompletionError, ParseError};
use crate::model::LanguageModel;

pub trait ProblemSpec {
    /// Short task name for logs and transcripts.
    fn name(&self) -> &str;

    /// The ultimate goal for `problem`. Deterministic.
    ///
    /// An error here is a malformed contract and ends the run abnormally.
    fn final_target(&self, problem: &str) -> Result<Target>;

    /// Prompt asking which sub-goal must hold immediately before `target`.
    ///
    /// Must mention `avoid` so the model is steered off known dead ends.
    fn propose_last_step(&self, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String;

    /// Recover the sub-goal from proposer output.
    fn parse_target(&self, text: &str) -> Result<Target, ParseError>;

    /// Prompt asking the model to produce `target` from `state`.
    fn propose_forward_step(&self, state: &Workspace, target: &Target, avoid: &AvoidSet)
    -> String;

    /// Recover a workspace delta from stepper output.
    ///
    /// `Ok` with an empty delta is an explicit "nothing to add"; `Err` means
    /// the output was malformed. The controller handles both as no progress.
    fn parse_update(&self, text: &str, state: &Workspace) -> Result<Workspace, ParseError>;

    /// Whether `state` satisfies `target`. Must be cheap, deterministic and
    /// must not call the model.
    fn check_local(&self, state: &Workspace, target: &Target) -> bool;

    /// Whether `state` solves the whole problem. The only operation allowed to
    /// be expensive or model-backed.
    fn verify_final(
        &self,
        state: &Workspace,
        model: &dyn LanguageModel,
    ) -> Result<Verdict, CompletionError>;

    /// Tree variant: the earlier step to revisit after a boundary is reached
    /// at `step`. `None`, or any index not below `step`, accepts the branch.
    fn locate_backtrack_point(
        &self,
        _state: &Workspace,
        _target: &Target,
        _step: StepIndex,
    ) -> Option<StepIndex> {
        None
    }

    /// Tree variant: whether `state` is close enough to `goal` to warrant
    /// verification instead of further expansion.
    fn is_boundary(&self, state: &Workspace, goal: &Target) -> bool {
        self.check_local(state, goal)
    }

    /// Whether two targets denote the same goal.
    fn targets_match(&self, a: &Target, b: &Target) -> bool {
        a == b
    }
}

impl<S: ProblemSpec + ?Sized> ProblemSpec for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn final_target(&self, problem: &str) -> Result<Target> {
        (**self).final_target(problem)
    }

    fn propose_last_step(&self, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        (**self).propose_last_step(state, target, avoid)
    }

    fn parse_target(&self, text: &str) -> Result<Target, ParseError> {
        (**self).parse_target(text)
    }

    fn propose_forward_step(
        &self,
        state: &Workspace,
        target: &Target,
        avoid: &AvoidSet,
    ) -> String {
        (**self).propose_forward_step(state, target, avoid)
    }

    fn parse_update(&self, text: &str, state: &Workspace) -> Result<Workspace, ParseError> {
        (**self).parse_update(text, state)
    }

    fn check_local(&self, state: &Workspace, target: &Target) -> bool {
        (**self).check_local(state, target)
    }

    fn verify_final(
        &self,
        state: &Workspace,
        model: &dyn LanguageModel,
    ) -> Result<Verdict, CompletionError> {
        (**self).verify_final(state, model)
    }

    fn locate_backtrack_point(
        &self,
        state: &Workspace,
        target: &Target,
        step: StepIndex,
    ) -> Option<StepIndex> {
        (**self).locate_backtrack_point(state, target, step)
    }

    fn is_boundary(&self, state: &Workspace, goal: &Target) -> bool {
        (**self).is_boundary(state, goal)
    }

    fn targets_match(&self, a: &Target, b: &Target) -> bool {
        (**self).targets_match(a, b)
    }
}
