//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use rff::config::load_config;
use rff::model::{CommandModel, RetryingModel};

use crate::case::{CaseFile, discover_cases};
use crate::config::apply_case_config;
use crate::outcome::Outcome;
use crate::report::aggregate;
use crate::run::run_case;

fn eval_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval")
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    let cases = discover_cases(&eval_dir(repo_root).join("cases"))?;
    for case in cases {
        println!(
            "{} task={} problems={}",
            case.case.id,
            case.case.task.as_str(),
            case.problems.len()
        );
    }
    Ok(())
}

/// Run a case by id (optionally multiple times).
///
/// The base config is `eval/rff.toml` (defaults when missing); the case's
/// overrides apply on top.
pub fn run_case_by_id(repo_root: &Path, case_id: &str, runs: u32, jobs: usize) -> Result<()> {
    let eval_dir = eval_dir(repo_root);
    let case_path = eval_dir.join("cases").join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    let base = load_config(&eval_dir.join("rff.toml")).context("load base config")?;
    let config = apply_case_config(base, &case).context("apply case config")?;
    debug!(case_id, runs, jobs, "case loaded");

    let model = RetryingModel::new(CommandModel::new(config.model.clone()), config.retry.policy());
    let results_base = eval_dir.join("results");

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(&results_base, &case_path, &case, &config, &model, jobs)
            .context("run case")?;
        println!(
            "run: case={} eval_run_id={} success={} exhausted={} error={} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.count(Outcome::Success),
            outcome.count(Outcome::Exhausted),
            outcome.count(Outcome::Error),
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let results_dir = eval_dir(repo_root).join("results").join(case_id);
    let (summary, warnings) = aggregate(&results_dir)?;
    println!(
        "report: case={} runs={} problems={}",
        case_id, summary.runs, summary.problems
    );
    println!(
        "report: success={} exhausted={} error={}",
        summary.success, summary.exhausted, summary.error
    );
    if let Some(rate) = summary.success_rate() {
        println!("report: success_rate={rate:.3}");
    }
    if let Some(avg) = summary.avg_iterations {
        println!("report: avg_iterations={avg:.2}");
    }
    if let Some(avg) = summary.avg_problem_secs {
        println!("report: avg_problem_secs={avg:.2}");
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={avg:.2}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Remove stored results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let case_results = eval_dir(repo_root).join("results").join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }
    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}
