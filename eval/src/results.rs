//! Result persistence.
//!
//! Each eval run writes `meta.json` (case, config and timing) and
//! `problems.jsonl` (one record per problem) under
//! `eval/results/<case>/<eval_run_id>/`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use rff::core::types::{RunStatus, Variant};

use crate::outcome::Outcome;

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    pub task: String,
    pub variant: Variant,
    pub model_identifier: String,
    pub max_iterations: u32,
    pub jobs: usize,
    pub problems: usize,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
}

/// Outcome of one problem, one line of `problems.jsonl`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProblemRecord {
    pub index: usize,
    pub problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold: Option<f64>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    pub iterations_used: u32,
    pub rationale: String,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `eval-<timestamp>-<suffix>`; the suffix keeps concurrent runs apart.
pub fn new_eval_run_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(4)
        .collect::<String>()
        .to_lowercase();
    format!("eval-{}-{suffix}", now.format("%Y%m%d_%H%M%S"))
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

/// Write `meta.json` and `problems.jsonl` into `dir`, creating it.
pub fn write_results(dir: &Path, meta: &EvalMeta, records: &[ProblemRecord]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create results dir {}", dir.display()))?;
    write_meta(&dir.join("meta.json"), meta)?;

    let path = dir.join("problems.jsonl");
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record).context("serialize problem record")?;
        out.write_all(b"\n").context("buffer problem record")?;
    }
    fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;
    debug!(results_dir = %dir.display(), records = records.len(), "results written");
    Ok(())
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).context("parse meta")
}

pub fn read_problems(path: &Path) -> Result<Vec<ProblemRecord>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("parse problems line {}", n + 1))
        })
        .collect()
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
pub(crate) fn sample_meta(case_id: &str, eval_run_id: &str, duration: f64) -> EvalMeta {
    EvalMeta {
        case_id: case_id.to_string(),
        eval_run_id: eval_run_id.to_string(),
        case_hash: "hash".to_string(),
        task: "game24".to_string(),
        variant: Variant::Dag,
        model_identifier: "m".to_string(),
        max_iterations: 4,
        jobs: 1,
        problems: 1,
        start_time: "now".to_string(),
        end_time: "later".to_string(),
        duration_secs: duration,
    }
}

#[cfg(test)]
pub(crate) fn sample_record(index: usize, outcome: Outcome, iterations: u32) -> ProblemRecord {
    ProblemRecord {
        index,
        problem: "4 6 1 1".to_string(),
        gold: None,
        outcome,
        status: match outcome {
            Outcome::Success => Some(RunStatus::Accepted),
            Outcome::Exhausted => Some(RunStatus::Exhausted),
            Outcome::Error => None,
        },
        iterations_used: iterations,
        rationale: String::new(),
        duration_secs: 0.5,
        error: (outcome == Outcome::Error).then(|| "model failed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn results_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = results_dir(base, "case", "run-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/run-1"));
    }

    #[test]
    fn eval_run_ids_are_distinct() {
        let now = Utc::now();
        let first = new_eval_run_id(now);
        let second = new_eval_run_id(now);
        assert!(first.starts_with("eval-"));
        assert_eq!(first.len(), "eval-20260101_000000-abcd".len());
        assert_ne!(first, second);
    }

    #[test]
    fn writes_and_reads_results() {
        let temp = tempdir().expect("tempdir");
        let dir = results_dir(temp.path(), "case", "eval-1");
        let meta = sample_meta("case", "eval-1", 2.5);
        let records = vec![
            sample_record(0, Outcome::Success, 2),
            sample_record(1, Outcome::Error, 0),
        ];
        write_results(&dir, &meta, &records).expect("write");

        assert_eq!(read_meta(&dir.join("meta.json")).expect("meta"), meta);
        let loaded = read_problems(&dir.join("problems.jsonl")).expect("problems");
        assert_eq!(loaded, records);

        let raw = fs::read_to_string(dir.join("problems.jsonl")).expect("raw");
        assert!(raw.lines().next().expect("line").contains("\"outcome\":\"success\""));
        assert!(!raw.lines().next().expect("line").contains("\"error\""));
    }

    #[test]
    fn hashes_case_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("case.toml");
        fs::write(&path, "abc").expect("write");
        assert_eq!(
            file_sha256(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
