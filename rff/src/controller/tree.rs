//! Tree variant: search with an explicit frontier stack and backtracking.
//!
//! Each successful step pushes a frontier owning its own workspace snapshot
//! and avoid-set. A failed check discards only the attempt. At a boundary
//! the task may name an earlier step to rewind to; rewinding drops every
//! frontier above it, so only the accepted branch's workspace survives.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::config::RunConfig;
use crate::controller::{
    IterationEvent, IterationRecord, Plan, Session, Step, exhausted, finish, resolve_goal,
    validate,
};
use crate::core::budget::IterationBudget;
use crate::core::frontier::{Frontier, FrontierStack};
use crate::core::types::{RunResult, RunStatus, StepIndex, Target, Variant};
use crate::core::workspace::Workspace;
use crate::model::LanguageModel;
use crate::spec::ProblemSpec;

/// Run the tree controller on `problem` until acceptance or budget
/// exhaustion.
///
/// Planning always asks for the last step before the ultimate goal, from the
/// live frontier's workspace.
#[instrument(skip_all, fields(task = spec.name(), variant = "tree"))]
pub fn run_tree<S, F>(
    spec: &S,
    model: &dyn LanguageModel,
    problem: &str,
    config: &RunConfig,
    mut on_iteration: F,
) -> Result<RunResult>
where
    S: ProblemSpec + ?Sized,
    F: FnMut(&IterationRecord),
{
    validate(config)?;
    let goal = resolve_goal(spec, problem)?;
    let mut session = Session::new(spec, model, config);
    let mut budget = IterationBudget::new(config.max_iterations);
    let mut stack = FrontierStack::new(Workspace::new(), goal.clone());

    info!(goal = %goal, max_iterations = config.max_iterations, "starting run");

    while budget.try_start() {
        let iteration = budget.used();
        let mut emit = |live: &Frontier, candidate: Option<&Target>, event| {
            on_iteration(&IterationRecord {
                iteration,
                variant: Variant::Tree,
                step: live.step,
                frontier: live.target.clone(),
                candidate: candidate.cloned(),
                workspace_len: live.state.len(),
                event,
            });
        };

        let top = stack.current();
        let candidate = match session.plan(&top.state, &goal, &top.avoid)? {
            Plan::Candidate(candidate) | Plan::Fallback(candidate) => candidate,
            Plan::Blocked => {
                emit(top, None, IterationEvent::NoProgress);
                continue;
            }
            Plan::Failed(err) => {
                let error = err.to_string();
                emit(top, None, IterationEvent::CompletionFailed { error });
                continue;
            }
        };

        let (delta, malformed) = match session.step(&top.state, &candidate, &top.avoid)? {
            Step::Delta(delta) => (delta, None),
            Step::Malformed(err) => (Workspace::new(), Some(err.reason)),
            Step::Failed(err) => {
                let error = err.to_string();
                emit(top, Some(&candidate), IterationEvent::CompletionFailed { error });
                continue;
            }
        };
        let candidate_state = top.state.merge(&delta);

        if !spec.check_local(&candidate_state, &candidate) {
            debug!(iteration, candidate = %candidate, "local check failed, discarding attempt");
            let frame = stack.current_mut();
            let state = frame.state.clone();
            frame.avoid.insert(&state, &candidate);
            let event = match malformed {
                Some(reason) => IterationEvent::MalformedUpdate { reason },
                None => IterationEvent::CheckFailed,
            };
            emit(stack.current(), Some(&candidate), event);
            continue;
        }

        let new_step = stack.push(candidate_state, candidate.clone());
        let live = stack.current();
        let at_boundary =
            spec.targets_match(&candidate, &goal) || spec.is_boundary(&live.state, &goal);
        if !at_boundary {
            emit(live, Some(&candidate), IterationEvent::Advanced);
            continue;
        }

        let backtrack = spec
            .locate_backtrack_point(&live.state, &candidate, new_step)
            .filter(|j| *j < new_step);
        if let Some(to) = backtrack {
            info!(iteration, from = %new_step, to = %to, "backtracking");
            stack.rewind_to(to);
            emit(stack.current(), Some(&candidate), IterationEvent::Backtracked { to });
            continue;
        }

        if !spec.check_local(&live.state, &goal) {
            debug!(iteration, step = %new_step, "boundary accepted, goal not yet reached");
            emit(live, Some(&candidate), IterationEvent::Advanced);
            continue;
        }

        match session.verify(&live.state)? {
            Ok(verdict) if verdict.accepted => {
                info!(iteration, step = %new_step, "goal verified");
                let workspace = live.state.clone();
                emit(
                    live,
                    Some(&candidate),
                    IterationEvent::Verified {
                        rationale: verdict.rationale.clone(),
                    },
                );
                return Ok(finish(
                    config,
                    Variant::Tree,
                    RunStatus::Accepted,
                    verdict.rationale,
                    iteration,
                    workspace,
                ));
            }
            Ok(verdict) => {
                debug!(iteration, rationale = %verdict.rationale, "verification rejected");
                stack.rewind_to(StepIndex(new_step.0 - 1));
                emit(
                    stack.current(),
                    Some(&candidate),
                    IterationEvent::Rejected {
                        rationale: verdict.rationale,
                    },
                );
            }
            Err(err) => {
                let error = err.to_string();
                emit(live, Some(&candidate), IterationEvent::CompletionFailed { error });
            }
        }
    }

    info!(iterations = budget.used(), depth = stack.depth(), "budget exhausted");
    let best = stack.current().state.clone();
    Ok(exhausted(
        spec,
        config,
        Variant::Tree,
        &goal,
        budget.used(),
        best,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MapSpec, ScriptedModel};
    use serde_json::json;

    fn config(max_iterations: u32) -> RunConfig {
        RunConfig {
            variant: Variant::Tree,
            max_iterations,
            ..RunConfig::default()
        }
    }

    /// Verifies a dead end rewinds to the root, the abandoned target is not
    /// proposed again from there, and only the winning branch survives.
    #[test]
    fn backtracks_from_dead_end() {
        let model = ScriptedModel::new([
            "x",
            r#"{"x": 1, "x_dead": true}"#,
            "x",
            "y",
            r#"{"y": 2}"#,
            "goal",
            r#"{"goal": 3}"#,
        ]);
        let spec = MapSpec::new().dead_end("x_dead");
        let mut events = Vec::new();
        let result = run_tree(&spec, &model, "goal", &config(10), |r| {
            events.push(r.event.clone());
        })
        .expect("run");

        assert!(result.accepted);
        assert_eq!(result.iterations_used, 3);
        assert_eq!(
            result.workspace,
            Workspace::from_pairs([("y", json!(2)), ("goal", json!(3))])
        );
        assert_eq!(events[0], IterationEvent::Backtracked { to: StepIndex::ROOT });
        assert_eq!(events[1], IterationEvent::Advanced);
        assert!(matches!(events[2], IterationEvent::Verified { .. }));

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 7);
        assert!(prompts[2].contains("avoid=[x]"));
        // The avoided proposal was never stepped toward.
        assert!(prompts[4].starts_with("forward target=y"));
    }

    /// Verifies the live workspace after a rewind is exactly the one the
    /// target frontier produced.
    #[test]
    fn rewind_restores_frontier_workspace() {
        let model = ScriptedModel::new([
            "a",
            r#"{"a": 1}"#,
            "b",
            r#"{"b": 2, "b_dead": true}"#,
            "c",
            r#"{"c": 3}"#,
            "goal",
            r#"{"goal": 4}"#,
        ]);
        let spec = MapSpec::new().dead_end("b_dead");
        let mut records = Vec::new();
        let result = run_tree(&spec, &model, "goal", &config(10), |r| records.push(r.clone()))
            .expect("run");

        let rewind = &records[1];
        assert_eq!(rewind.event, IterationEvent::Backtracked { to: StepIndex(1) });
        assert_eq!(rewind.step, StepIndex(1));
        assert_eq!(rewind.frontier, Target::from("a"));
        assert_eq!(rewind.workspace_len, 1);

        assert!(result.accepted);
        assert_eq!(
            result.workspace,
            Workspace::from_pairs([("a", json!(1)), ("c", json!(3)), ("goal", json!(4))])
        );
    }

    /// Verifies a failed check discards the attempt and avoids the pair at
    /// the current frontier.
    #[test]
    fn failed_check_discards_attempt() {
        let model = ScriptedModel::new([
            "a",
            r#"{"noise": 1}"#,
            "a",
            "b",
            r#"{"b": 1}"#,
            "goal",
            r#"{"goal": 1}"#,
        ]);
        let mut records = Vec::new();
        let result = run_tree(&MapSpec::new(), &model, "goal", &config(10), |r| {
            records.push(r.clone());
        })
        .expect("run");

        assert_eq!(records[0].event, IterationEvent::CheckFailed);
        assert_eq!(records[0].workspace_len, 0);
        assert_eq!(records[1].candidate, Some(Target::from("b")));
        assert!(result.accepted);
        assert!(!result.workspace.contains_key("noise"));
    }

    /// Verifies a rejected verdict rewinds to the parent and the search
    /// continues down another branch.
    #[test]
    fn rejected_verdict_rewinds_to_parent() {
        let model = ScriptedModel::new([
            "goal",
            r#"{"goal": 1}"#,
            "alt",
            r#"{"alt": true}"#,
            "goal",
            r#"{"goal": 2}"#,
        ]);
        let spec = MapSpec::new().expect_value(json!(2));
        let mut events = Vec::new();
        let result = run_tree(&spec, &model, "goal", &config(10), |r| events.push(r.event.clone()))
            .expect("run");

        assert!(matches!(events[0], IterationEvent::Rejected { .. }));
        assert_eq!(events[1], IterationEvent::Advanced);
        assert!(result.accepted);
        assert_eq!(
            result.workspace,
            Workspace::from_pairs([("alt", json!(true)), ("goal", json!(2))])
        );
        assert_eq!(spec.verify_calls(), 2);
    }

    /// Verifies a blocked frontier records no progress without rewinding and
    /// the run ends exhausted at that frontier.
    #[test]
    fn blocked_frontier_stays_put_until_exhausted() {
        let model = ScriptedModel::new(["goal", r#"{"noise": 1}"#]).then_repeat("goal");
        let config = RunConfig {
            parse_retries: 0,
            ..config(4)
        };
        let mut records = Vec::new();
        let result = run_tree(&MapSpec::new(), &model, "goal", &config, |r| {
            records.push(r.clone());
        })
        .expect("run");

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].event, IterationEvent::CheckFailed);
        for record in &records[1..] {
            assert_eq!(record.event, IterationEvent::NoProgress);
            assert_eq!(record.step, StepIndex::ROOT);
            assert_eq!(record.candidate, None);
        }
        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(result.iterations_used, 4);
        assert!(result.workspace.is_empty());
        assert_eq!(model.prompts().len(), 5);
    }

    /// Verifies the run halts at the budget with the live frontier's state.
    #[test]
    fn exhausts_budget() {
        let model = ScriptedModel::new(Vec::<&str>::new()).then_repeat("elsewhere");
        let result = run_tree(&MapSpec::new(), &model, "goal", &config(2), |_| {}).expect("run");

        assert!(!result.accepted);
        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(result.iterations_used, 2);
        assert!(result.workspace.is_empty());
        assert_eq!(result.rationale, "iteration budget exhausted");
    }
}
