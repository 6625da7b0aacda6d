//! Concrete task specializations.

pub mod game24;
pub mod word_problem;

pub use game24::Game24;
pub use word_problem::WordProblem;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::spec::ProblemSpec;

/// Selectable task kinds for the CLI and eval cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Combine four numbers into 24.
    Game24,
    /// Arithmetic word problem with a numeric answer.
    WordProblem,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Game24 => "game24",
            TaskKind::WordProblem => "word-problem",
        }
    }
}

/// Build the task for `problem`.
///
/// `gold` is the known answer for word problems; when absent the word
/// problem verifier asks the model instead.
pub fn build_task(
    kind: TaskKind,
    problem: &str,
    gold: Option<f64>,
    config: &RunConfig,
) -> Result<Box<dyn ProblemSpec>> {
    Ok(match kind {
        TaskKind::Game24 => Box::new(Game24::from_problem(problem, config.prompt_budget_bytes)?),
        TaskKind::WordProblem => Box::new(WordProblem::new(problem, gold, config)?),
    })
}

/// Strip a surrounding Markdown code fence and inline backticks.
pub(crate) fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Skip the info string (e.g. ```json).
        text = rest.split_once('\n').map_or("", |(_, body)| body);
        text = text.trim_end().strip_suffix("```").unwrap_or(text);
    }
    text.trim().trim_matches('`').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("`total`"), "total");
        assert_eq!(strip_fences("  plain "), "plain");
    }

    #[test]
    fn builds_each_kind() {
        let config = RunConfig::default();
        let game = build_task(TaskKind::Game24, "4 6 1 1", None, &config).expect("game24");
        assert_eq!(game.name(), "game24");
        let word = build_task(TaskKind::WordProblem, "2 + 3 apples?", Some(5.0), &config)
            .expect("word problem");
        assert_eq!(word.name(), "word-problem");
        assert!(build_task(TaskKind::Game24, "no numbers", None, &config).is_err());
    }
}
