use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::outcome::Outcome;
use crate::results::{read_meta, read_problems};

#[derive(Debug, Default, PartialEq)]
pub struct ReportSummary {
    pub runs: usize,
    pub problems: usize,
    pub success: usize,
    pub exhausted: usize,
    pub error: usize,
    /// Mean iterations over problems that produced a run result.
    pub avg_iterations: Option<f64>,
    /// Mean wall-clock time per problem.
    pub avg_problem_secs: Option<f64>,
    /// Mean wall-clock time per eval run.
    pub avg_duration_secs: Option<f64>,
}

impl ReportSummary {
    pub fn success_rate(&self) -> Option<f64> {
        (self.problems > 0).then(|| self.success as f64 / self.problems as f64)
    }
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut iterations = Mean::default();
    let mut problem_secs = Mean::default();
    let mut run_secs = Mean::default();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta = match read_meta(&run_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };
        let records = match read_problems(&run_dir.join("problems.jsonl")) {
            Ok(records) => records,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: problems.jsonl invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        run_secs.add(meta.duration_secs);
        for record in records {
            summary.problems += 1;
            match record.outcome {
                Outcome::Success => summary.success += 1,
                Outcome::Exhausted => summary.exhausted += 1,
                Outcome::Error => summary.error += 1,
            }
            if record.status.is_some() {
                iterations.add(f64::from(record.iterations_used));
            }
            problem_secs.add(record.duration_secs);
        }
    }

    summary.avg_iterations = iterations.value();
    summary.avg_problem_secs = problem_secs.value();
    summary.avg_duration_secs = run_secs.value();
    Ok((summary, warnings))
}

#[derive(Default)]
struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{results_dir, sample_meta, sample_record, write_results};
    use tempfile::tempdir;

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        write_results(
            &results_dir(temp.path(), "case", "run1"),
            &sample_meta("case", "run1", 5.0),
            &[
                sample_record(0, Outcome::Success, 2),
                sample_record(1, Outcome::Exhausted, 4),
            ],
        )
        .expect("run1");
        write_results(
            &results_dir(temp.path(), "case", "run2"),
            &sample_meta("case", "run2", 15.0),
            &[sample_record(0, Outcome::Error, 0)],
        )
        .expect("run2");

        let (summary, warnings) = aggregate(&temp.path().join("case")).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.problems, 3);
        assert_eq!((summary.success, summary.exhausted, summary.error), (1, 1, 1));
        assert_eq!(summary.avg_iterations, Some(3.0));
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.avg_problem_secs, Some(0.5));
        assert!((summary.success_rate().expect("rate") - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn skips_broken_runs_with_warning() {
        let temp = tempdir().expect("tempdir");
        let broken = temp.path().join("broken");
        fs::create_dir_all(&broken).expect("dir");
        fs::write(broken.join("meta.json"), "not json").expect("meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary, ReportSummary::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("meta.json invalid"));
    }

    #[test]
    fn missing_case_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("none")).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert!(summary.success_rate().is_none());
        assert!(warnings.is_empty());
    }
}
