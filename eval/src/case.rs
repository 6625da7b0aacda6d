//! Case file parsing and validation.
//!
//! A case is a TOML file naming a task, an optional controller variant,
//! config overrides, and the problems to solve. See `eval/cases/`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use rff::core::types::Variant;
use rff::tasks::TaskKind;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub problems: Vec<Problem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    pub task: TaskKind,
    /// Overrides the variant from the base config when set.
    pub variant: Option<Variant>,
}

/// Run configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CaseConfig {
    pub max_iterations: Option<u32>,
    pub model_identifier: Option<String>,
    pub sampling_temperature: Option<f32>,
    pub require_verified_goal: Option<bool>,
    pub parse_retries: Option<u32>,
}

/// One problem instance and, optionally, its known answer.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Problem {
    pub problem: String,
    pub gold: Option<f64>,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.config.max_iterations == Some(0) {
            bail!("config.max_iterations must be > 0");
        }
        if self.problems.is_empty() {
            bail!("problems must be a non-empty array");
        }
        for (index, problem) in self.problems.iter().enumerate() {
            if problem.problem.trim().is_empty() {
                bail!("problems[{index}].problem must be non-empty");
            }
            if problem.gold.is_some_and(|gold| !gold.is_finite()) {
                bail!("problems[{index}].gold must be finite");
            }
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_case() {
        let input = r#"
[case]
id = "game24-small"
task = "game24"
variant = "tree"

[config]
max_iterations = 12
sampling_temperature = 0.7

[[problems]]
problem = "4 6 1 1"

[[problems]]
problem = "3 3 8 8"
"#;
        let case = CaseFile::parse_str(input).expect("case parses");
        assert_eq!(case.case.task, TaskKind::Game24);
        assert_eq!(case.case.variant, Some(Variant::Tree));
        assert_eq!(case.config.max_iterations, Some(12));
        assert_eq!(case.problems.len(), 2);
        assert_eq!(case.problems[1].gold, None);
    }

    #[test]
    fn rejects_invalid_id() {
        let input = r#"
[case]
id = "bad/id"
task = "word-problem"

[[problems]]
problem = "2 + 2?"
gold = 4
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid id");
        assert!(err.to_string().contains("case.id"));
    }

    #[test]
    fn rejects_empty_problems() {
        let input = r#"
[case]
id = "empty"
task = "game24"
"#;
        let err = CaseFile::parse_str(input).expect_err("no problems");
        assert!(err.to_string().contains("problems"));

        let blank = r#"
[case]
id = "blank"
task = "game24"

[[problems]]
problem = "  "
"#;
        assert!(CaseFile::parse_str(blank).is_err());
    }

    #[test]
    fn rejects_unknown_task() {
        let input = r#"
[case]
id = "chess"
task = "chess"

[[problems]]
problem = "e4"
"#;
        assert!(CaseFile::parse_str(input).is_err());
    }

    #[test]
    fn discovers_sorted_cases() {
        let temp = tempfile::tempdir().expect("tempdir");
        for id in ["b-case", "a-case"] {
            fs::write(
                temp.path().join(format!("{id}.toml")),
                format!("[case]\nid = \"{id}\"\ntask = \"game24\"\n[[problems]]\nproblem = \"4 6 1 1\"\n"),
            )
            .expect("write case");
        }
        fs::write(temp.path().join("notes.md"), "ignored").expect("write notes");

        let cases = discover_cases(temp.path()).expect("discover");
        let ids: Vec<&str> = cases.iter().map(|c| c.case.id.as_str()).collect();
        assert_eq!(ids, ["a-case", "b-case"]);
        assert!(discover_cases(&temp.path().join("missing")).expect("missing").is_empty());
    }
}
