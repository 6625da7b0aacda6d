//! Case execution.
//!
//! Problems are independent runs: `jobs` worker threads pull the next
//! problem index from a shared counter, each building its own task and
//! sharing one model.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use rff::config::RunConfig;
use rff::controller;
use rff::model::LanguageModel;
use rff::tasks::build_task;

use crate::case::{CaseFile, Problem};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{
    EvalMeta, ProblemRecord, file_sha256, new_eval_run_id, results_dir, write_results,
};

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    pub records: Vec<ProblemRecord>,
}

impl RunOutcome {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// Run every problem of a case and persist the results under `results_base`.
#[instrument(skip_all, fields(case_id = %case.case.id, jobs))]
pub fn run_case(
    results_base: &Path,
    case_path: &Path,
    case: &CaseFile,
    config: &RunConfig,
    model: &dyn LanguageModel,
    jobs: usize,
) -> Result<RunOutcome> {
    let jobs = jobs.clamp(1, case.problems.len().max(1));
    info!(problems = case.problems.len(), "case run started");

    let started_at = Utc::now();
    let eval_run_id = new_eval_run_id(started_at);
    let records = run_problems(case, config, model, jobs);
    let finished_at = Utc::now();

    let duration = finished_at - started_at;
    let meta = EvalMeta {
        case_id: case.case.id.clone(),
        eval_run_id: eval_run_id.clone(),
        case_hash: file_sha256(case_path).context("hash case file")?,
        task: case.case.task.as_str().to_string(),
        variant: config.variant,
        model_identifier: config.model_identifier.clone(),
        max_iterations: config.max_iterations,
        jobs,
        problems: records.len(),
        start_time: started_at.to_rfc3339(),
        end_time: finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
    };
    let results_dir = results_dir(results_base, &case.case.id, &eval_run_id);
    write_results(&results_dir, &meta, &records).context("write results")?;

    info!(
        duration_secs = meta.duration_secs,
        results_dir = %results_dir.display(),
        "case run complete"
    );
    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        records,
    })
}

fn run_problems(
    case: &CaseFile,
    config: &RunConfig,
    model: &dyn LanguageModel,
    jobs: usize,
) -> Vec<ProblemRecord> {
    let next = AtomicUsize::new(0);
    let records = Mutex::new(Vec::with_capacity(case.problems.len()));

    std::thread::scope(|scope| {
        for worker in 0..jobs {
            let next = &next;
            let records = &records;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(problem) = case.problems.get(index) else {
                        break;
                    };
                    debug!(worker, index, "problem started");
                    let record = run_problem(case, index, problem, config, model);
                    match records.lock() {
                        Ok(mut guard) => guard.push(record),
                        Err(poisoned) => poisoned.into_inner().push(record),
                    }
                }
            });
        }
    });

    let mut records = match records.into_inner() {
        Ok(records) => records,
        Err(poisoned) => poisoned.into_inner(),
    };
    records.sort_by_key(|r| r.index);
    records
}

fn run_problem(
    case: &CaseFile,
    index: usize,
    problem: &Problem,
    config: &RunConfig,
    model: &dyn LanguageModel,
) -> ProblemRecord {
    let started = Instant::now();
    let result = build_task(case.case.task, &problem.problem, problem.gold, config)
        .and_then(|task| controller::solve(task.as_ref(), model, &problem.problem, config, |_| {}));
    let duration_secs = started.elapsed().as_secs_f64();

    let outcome = classify_outcome(result.as_ref().ok());
    match result {
        Ok(result) => ProblemRecord {
            index,
            problem: problem.problem.clone(),
            gold: problem.gold,
            outcome,
            status: Some(result.status),
            iterations_used: result.iterations_used,
            rationale: result.rationale,
            duration_secs,
            error: None,
        },
        Err(err) => {
            warn!(index, err = %format!("{err:#}"), "problem run failed");
            ProblemRecord {
                index,
                problem: problem.problem.clone(),
                gold: problem.gold,
                outcome,
                status: None,
                iterations_used: 0,
                rationale: String::new(),
                duration_secs,
                error: Some(format!("{err:#}")),
            }
        }
    }
}
