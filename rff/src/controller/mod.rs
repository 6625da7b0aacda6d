//! Controller state machines.
//!
//! Both variants sequence the same phases inside one iteration:
//! PLANNING (last-step proposer) → STEPPING (forward stepper) → CHECKING
//! (local check) → optionally VERIFYING. They differ in what happens to the
//! workspace and the avoid-sets on failure; see [`dag`] and [`tree`].
//!
//! Per-iteration failures (parse errors, rejected verdicts, isolated
//! completion failures) are absorbed into state transitions. Only a
//! malformed `final_target`, invalid configuration, or too many consecutive
//! completion failures end a run with an error.

pub mod dag;
pub mod tree;

pub use dag::run_dag;
pub use tree::run_tree;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::core::avoid::AvoidSet;
use crate::core::types::{RunResult, RunStatus, StepIndex, Target, Variant, Verdict};
use crate::core::workspace::Workspace;
use crate::error::{CompletionError, ControllerError, ParseError};
use crate::model::{CompletionOptions, LanguageModel};
use crate::spec::ProblemSpec;

/// Rationale attached to runs that ran out of iterations.
pub const BUDGET_EXHAUSTED: &str = "iteration budget exhausted";

/// What happened in one planning iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationEvent {
    /// The candidate held locally and became (or extended) the frontier.
    Advanced,
    /// The candidate did not hold after stepping.
    CheckFailed,
    /// The stepper's output could not be parsed; treated as an empty delta.
    MalformedUpdate { reason: String },
    /// No usable candidate: every proposal was unparseable or avoided and the
    /// previous frontier is avoided too.
    NoProgress,
    /// A model call failed after the retry decorator gave up.
    CompletionFailed { error: String },
    Verified { rationale: String },
    Rejected { rationale: String },
    /// Tree variant: the stack was rewound to `to`.
    Backtracked { to: StepIndex },
}

/// Observer payload emitted once per iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub variant: Variant,
    /// DAG: frontier advances so far. Tree: depth of the live frontier.
    pub step: StepIndex,
    pub frontier: Target,
    pub candidate: Option<Target>,
    pub workspace_len: usize,
    #[serde(flatten)]
    pub event: IterationEvent,
}

/// Run the configured variant.
pub fn solve<S, F>(
    spec: &S,
    model: &dyn LanguageModel,
    problem: &str,
    config: &RunConfig,
    on_iteration: F,
) -> Result<RunResult>
where
    S: ProblemSpec + ?Sized,
    F: FnMut(&IterationRecord),
{
    match config.variant {
        Variant::Dag => run_dag(spec, model, problem, config, on_iteration),
        Variant::Tree => run_tree(spec, model, problem, config, on_iteration),
    }
}

/// Outcome of the PLANNING phase.
#[derive(Debug)]
enum Plan {
    /// A freshly proposed target not in the active avoid-set.
    Candidate(Target),
    /// Proposals failed; the previous frontier target is reused.
    Fallback(Target),
    /// Proposals failed and the fallback is avoided as well.
    Blocked,
    Failed(CompletionError),
}

/// Outcome of the STEPPING phase.
#[derive(Debug)]
enum Step {
    Delta(Workspace),
    Malformed(ParseError),
    Failed(CompletionError),
}

/// Per-run plumbing shared by both variants: model calls, parse retries and
/// the consecutive completion-failure counter.
struct Session<'a, S: ?Sized> {
    spec: &'a S,
    model: &'a dyn LanguageModel,
    options: CompletionOptions,
    parse_retries: u32,
    max_failures: u32,
    consecutive_failures: u32,
}

impl<'a, S: ProblemSpec + ?Sized> Session<'a, S> {
    fn new(spec: &'a S, model: &'a dyn LanguageModel, config: &RunConfig) -> Self {
        Self {
            spec,
            model,
            options: config.completion_options(),
            parse_retries: config.parse_retries,
            max_failures: config.max_consecutive_completion_failures,
            consecutive_failures: 0,
        }
    }

    /// Outer `Err` aborts the run; inner `Err` is an absorbed failure.
    fn complete(&mut self, prompt: &str) -> Result<Result<String, CompletionError>> {
        let outcome = self.model.complete(prompt, &self.options);
        self.track(outcome)
    }

    fn track<T>(
        &mut self,
        outcome: Result<T, CompletionError>,
    ) -> Result<Result<T, CompletionError>> {
        match outcome {
            Ok(value) => {
                self.consecutive_failures = 0;
                Ok(Ok(value))
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    err = %err,
                    consecutive = self.consecutive_failures,
                    max = self.max_failures,
                    "model call failed"
                );
                if self.consecutive_failures >= self.max_failures {
                    return Err(ControllerError::CompletionBudgetExhausted {
                        failures: self.consecutive_failures,
                        last: err,
                    }
                    .into());
                }
                Ok(Err(err))
            }
        }
    }

    /// Ask for the sub-goal that must hold just before `frontier`.
    ///
    /// Unparseable or avoided candidates are retried `parse_retries` times.
    fn plan(&mut self, state: &Workspace, frontier: &Target, avoid: &AvoidSet) -> Result<Plan> {
        let prompt = self.spec.propose_last_step(state, frontier, avoid);
        for attempt in 0..=self.parse_retries {
            let text = match self.complete(&prompt)? {
                Ok(text) => text,
                Err(err) => return Ok(Plan::Failed(err)),
            };
            match self.spec.parse_target(&text) {
                Ok(candidate) if avoid.contains(state, &candidate) => {
                    debug!(attempt, candidate = %candidate, "proposed target is avoided");
                }
                Ok(candidate) => return Ok(Plan::Candidate(candidate)),
                Err(err) => debug!(attempt, err = %err, "unparseable proposal"),
            }
        }
        if avoid.contains(state, frontier) {
            return Ok(Plan::Blocked);
        }
        Ok(Plan::Fallback(frontier.clone()))
    }

    /// Ask for a delta that makes `target` hold.
    fn step(&mut self, state: &Workspace, target: &Target, avoid: &AvoidSet) -> Result<Step> {
        let prompt = self.spec.propose_forward_step(state, target, avoid);
        let text = match self.complete(&prompt)? {
            Ok(text) => text,
            Err(err) => return Ok(Step::Failed(err)),
        };
        Ok(match self.spec.parse_update(&text, state) {
            Ok(delta) => Step::Delta(delta),
            Err(err) => {
                debug!(err = %err, "unparseable update");
                Step::Malformed(err)
            }
        })
    }

    fn verify(&mut self, state: &Workspace) -> Result<Result<Verdict, CompletionError>> {
        let outcome = self.spec.verify_final(state, self.model);
        self.track(outcome)
    }
}

/// Derive the ultimate goal; failures are contract violations.
fn resolve_goal<S: ProblemSpec + ?Sized>(spec: &S, problem: &str) -> Result<Target> {
    spec.final_target(problem)
        .map_err(|err| anyhow::Error::new(ControllerError::FinalTarget(err)))
}

fn validate(config: &RunConfig) -> Result<()> {
    config.validate().context("invalid run configuration")
}

fn finish(
    config: &RunConfig,
    variant: Variant,
    status: RunStatus,
    rationale: String,
    iterations_used: u32,
    workspace: Workspace,
) -> RunResult {
    RunResult {
        accepted: status != RunStatus::Exhausted,
        status,
        variant,
        final_workspace_summary: workspace.summarize_within(config.summary_budget_bytes),
        rationale,
        iterations_used,
        workspace,
    }
}

/// Terminal record for a run that ran out of iterations with `best` as its
/// best-known workspace.
fn exhausted<S: ProblemSpec + ?Sized>(
    spec: &S,
    config: &RunConfig,
    variant: Variant,
    goal: &Target,
    iterations_used: u32,
    best: Workspace,
) -> RunResult {
    if !config.require_verified_goal && spec.check_local(&best, goal) {
        return finish(
            config,
            variant,
            RunStatus::AcceptedUnverified,
            format!("{BUDGET_EXHAUSTED}; goal holds locally but was not verified"),
            iterations_used,
            best,
        );
    }
    finish(
        config,
        variant,
        RunStatus::Exhausted,
        BUDGET_EXHAUSTED.to_string(),
        iterations_used,
        best,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MapSpec, ScriptedModel};

    fn config(variant: Variant) -> RunConfig {
        RunConfig {
            variant,
            max_iterations: 6,
            ..RunConfig::default()
        }
    }

    /// Verifies `solve` dispatches on the configured variant.
    #[test]
    fn solve_dispatches_on_variant() {
        for variant in [Variant::Dag, Variant::Tree] {
            let model = ScriptedModel::new(["total", r#"{"total": 1}"#]);
            let result = solve(&MapSpec::new(), &model, "total", &config(variant), |_| {})
                .expect("solve");
            assert!(result.accepted);
            assert_eq!(result.variant, variant);
        }
    }

    /// Verifies a failing `final_target` surfaces as a typed controller error.
    #[test]
    fn bad_problem_is_a_contract_error() {
        let model = ScriptedModel::new(Vec::<&str>::new());
        let err = solve(&MapSpec::new(), &model, "  ", &config(Variant::Dag), |_| {})
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::FinalTarget(_))
        ));
        assert!(model.prompts().is_empty());
    }

    /// Verifies invalid options are rejected before any model call.
    #[test]
    fn invalid_config_is_rejected() {
        let model = ScriptedModel::new(["total"]);
        let bad = RunConfig {
            max_iterations: 0,
            ..RunConfig::default()
        };
        let err = solve(&MapSpec::new(), &model, "total", &bad, |_| {}).unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations"));
        assert!(model.prompts().is_empty());
    }

    /// Verifies repeated completion failures abort the run once the
    /// consecutive limit is reached.
    #[test]
    fn consecutive_completion_failures_abort() {
        let model = ScriptedModel::new(Vec::<&str>::new()).then_fail(CompletionError::Empty);
        let cfg = RunConfig {
            max_consecutive_completion_failures: 2,
            ..config(Variant::Dag)
        };
        let mut events = Vec::new();
        let err = solve(&MapSpec::new(), &model, "total", &cfg, |r| events.push(r.event.clone()))
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::CompletionBudgetExhausted { failures: 2, .. })
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], IterationEvent::CompletionFailed { .. }));
    }

    /// Verifies an isolated failure is absorbed and the counter resets.
    #[test]
    fn isolated_completion_failure_is_absorbed() {
        let model = ScriptedModel::new(Vec::<&str>::new())
            .then_err(CompletionError::Timeout { secs: 1 })
            .then_ok("total")
            .then_ok(r#"{"total": 3}"#);
        let cfg = RunConfig {
            max_consecutive_completion_failures: 2,
            ..config(Variant::Dag)
        };
        let result = solve(&MapSpec::new(), &model, "total", &cfg, |_| {}).expect("solve");
        assert!(result.accepted);
        assert_eq!(result.iterations_used, 2);
    }

    /// Verifies unparseable proposals fall back to the previous frontier.
    #[test]
    fn parse_failures_fall_back_to_frontier() {
        // MapSpec rejects targets containing whitespace.
        let model = ScriptedModel::new(["not a key", "still not", "nope nope", r#"{"total": 9}"#]);
        let cfg = RunConfig {
            parse_retries: 2,
            ..config(Variant::Dag)
        };
        let mut candidates = Vec::new();
        let result = solve(&MapSpec::new(), &model, "total", &cfg, |r| {
            candidates.push(r.candidate.clone());
        })
        .expect("solve");

        assert!(result.accepted);
        assert_eq!(candidates, vec![Some(Target::from("total"))]);
        assert_eq!(model.prompts().len(), 4);
    }

    #[test]
    fn iteration_records_serialize_flat() {
        let record = IterationRecord {
            iteration: 2,
            variant: Variant::Tree,
            step: StepIndex(1),
            frontier: Target::from("goal"),
            candidate: Some(Target::from("x")),
            workspace_len: 1,
            event: IterationEvent::Backtracked { to: StepIndex::ROOT },
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["kind"], "backtracked");
        assert_eq!(value["to"], 0);
        assert_eq!(value["variant"], "tree");
        assert_eq!(value["candidate"], "x");
    }
}
