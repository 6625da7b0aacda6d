//! DAG variant: monotone accumulation.
//!
//! Every delta is merged into one running workspace, so the workspace never
//! shrinks. A candidate that fails its local check only earns a soft hint; a
//! rejected verdict hard-avoids the `(state, goal)` pair.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::config::RunConfig;
use crate::controller::{
    IterationEvent, IterationRecord, Plan, Session, Step, exhausted, finish, resolve_goal,
    validate,
};
use crate::core::avoid::AvoidSet;
use crate::core::budget::IterationBudget;
use crate::core::types::{RunResult, RunStatus, StepIndex, Target, Variant};
use crate::core::workspace::Workspace;
use crate::model::LanguageModel;
use crate::spec::ProblemSpec;

/// Run the DAG controller on `problem` until acceptance or budget exhaustion.
#[instrument(skip_all, fields(task = spec.name(), variant = "dag"))]
pub fn run_dag<S, F>(
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
    let mut state = Workspace::new();
    let mut frontier = goal.clone();
    let mut step = StepIndex::ROOT;
    let mut avoid = AvoidSet::new();

    info!(goal = %goal, max_iterations = config.max_iterations, "starting run");

    while budget.try_start() {
        let iteration = budget.used();
        let mut emit = |frontier: &Target, candidate: Option<&Target>, state: &Workspace, event| {
            on_iteration(&IterationRecord {
                iteration,
                variant: Variant::Dag,
                step,
                frontier: frontier.clone(),
                candidate: candidate.cloned(),
                workspace_len: state.len(),
                event,
            });
        };

        let candidate = match session.plan(&state, &frontier, &avoid)? {
            Plan::Candidate(candidate) | Plan::Fallback(candidate) => candidate,
            Plan::Blocked => {
                emit(&frontier, None, &state, IterationEvent::NoProgress);
                continue;
            }
            Plan::Failed(err) => {
                let error = err.to_string();
                emit(&frontier, None, &state, IterationEvent::CompletionFailed { error });
                continue;
            }
        };

        let (delta, malformed) = match session.step(&state, &candidate, &avoid)? {
            Step::Delta(delta) => (delta, None),
            Step::Malformed(err) => (Workspace::new(), Some(err.reason)),
            Step::Failed(err) => {
                let error = err.to_string();
                emit(
                    &frontier,
                    Some(&candidate),
                    &state,
                    IterationEvent::CompletionFailed { error },
                );
                continue;
            }
        };
        state = state.merge(&delta);

        if !spec.check_local(&state, &candidate) {
            debug!(iteration, candidate = %candidate, "local check failed");
            avoid.hint(&candidate);
            let event = match malformed {
                Some(reason) => IterationEvent::MalformedUpdate { reason },
                None => IterationEvent::CheckFailed,
            };
            emit(&frontier, Some(&candidate), &state, event);
            continue;
        }

        if spec.targets_match(&candidate, &goal) {
            match session.verify(&state)? {
                Ok(verdict) if verdict.accepted => {
                    info!(iteration, "goal verified");
                    emit(
                        &frontier,
                        Some(&candidate),
                        &state,
                        IterationEvent::Verified {
                            rationale: verdict.rationale.clone(),
                        },
                    );
                    return Ok(finish(
                        config,
                        Variant::Dag,
                        RunStatus::Accepted,
                        verdict.rationale,
                        iteration,
                        state,
                    ));
                }
                Ok(verdict) => {
                    debug!(iteration, rationale = %verdict.rationale, "verification rejected");
                    avoid.insert(&state, &goal);
                    avoid.insert(&state, &candidate);
                    emit(
                        &frontier,
                        Some(&candidate),
                        &state,
                        IterationEvent::Rejected {
                            rationale: verdict.rationale,
                        },
                    );
                }
                Err(err) => {
                    let error = err.to_string();
                    emit(
                        &frontier,
                        Some(&candidate),
                        &state,
                        IterationEvent::CompletionFailed { error },
                    );
                }
            }
            continue;
        }

        emit(&frontier, Some(&candidate), &state, IterationEvent::Advanced);
        if candidate != frontier {
            step = step.next();
            frontier = candidate;
        }
    }

    info!(iterations = budget.used(), "budget exhausted");
    Ok(exhausted(
        spec,
        config,
        Variant::Dag,
        &goal,
        budget.used(),
        state,
    ))
}
