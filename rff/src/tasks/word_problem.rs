//! Arithmetic word problems with a single numeric answer.
//!
//! Targets are variable names; each step writes one `{"var", "value"}` fact.
//! The goal is the `answer` variable. Verification compares against a known
//! answer when one is given and asks the model otherwise.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use minijinja::context;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::core::avoid::AvoidSet;
use crate::core::types::{Target, Verdict};
use crate::core::workspace::Workspace;
use crate::error::{CompletionError, ParseError};
use crate::model::{CompletionOptions, LanguageModel};
use crate::prompt::{PromptBuilder, PromptEngine};
use crate::spec::ProblemSpec;
use crate::tasks::strip_fences;

pub const ANSWER_KEY: &str = "answer";

/// Allowed distance between the computed and the known answer.
const TOLERANCE: f64 = 1e-6;

const LAST_STEP_TEMPLATE: &str = include_str!("prompts/word_problem_last_step.md");
const FORWARD_STEP_TEMPLATE: &str = include_str!("prompts/word_problem_forward_step.md");
const VERIFY_TEMPLATE: &str = include_str!("prompts/word_problem_verify.md");

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid")
});

#[derive(Debug, Deserialize)]
struct Update {
    var: String,
    value: Value,
}

pub struct WordProblem {
    problem: String,
    gold: Option<f64>,
    options: CompletionOptions,
    summary_budget_bytes: usize,
    prompts: PromptBuilder,
}

impl WordProblem {
    pub fn new(problem: &str, gold: Option<f64>, config: &RunConfig) -> Result<Self> {
        let problem = problem.trim();
        if problem.is_empty() {
            bail!("word problem text is empty");
        }
        let engine = PromptEngine::new()
            .with_template("last_step", LAST_STEP_TEMPLATE)?
            .with_template("forward_step", FORWARD_STEP_TEMPLATE)?
            .with_template("verify", VERIFY_TEMPLATE)?;
        Ok(Self {
            problem: problem.to_string(),
            gold,
            options: config.completion_options(),
            summary_budget_bytes: config.summary_budget_bytes,
            prompts: PromptBuilder::new(engine, config.prompt_budget_bytes),
        })
    }

    fn render(&self, name: &str, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        let avoided: Vec<&str> = avoid.targets().iter().map(|t| t.as_str()).collect();
        let workspace = (!state.is_empty()).then(|| state.summarize_within(self.summary_budget_bytes));
        let rendered = self.prompts.build(
            name,
            context! {
                problem => &self.problem,
                workspace => workspace,
                avoid => avoided,
                target => target.as_str(),
                goal => ANSWER_KEY,
            },
        );
        match rendered {
            Ok(pack) => pack.into_string(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), template = name, "prompt rendering failed");
                format!("{}\n\nWhat is {target}?", self.problem)
            }
        }
    }

    fn ask_model(
        &self,
        state: &Workspace,
        answer: f64,
        model: &dyn LanguageModel,
    ) -> Result<Verdict, CompletionError> {
        let prompt = self
            .prompts
            .build(
                "verify",
                context! {
                    problem => &self.problem,
                    workspace => state.summarize_within(self.summary_budget_bytes),
                    answer => answer,
                },
            )
            .map_err(|err| CompletionError::Misconfigured(format!("{err:#}")))?
            .into_string();
        let reply = model.complete(&prompt, &self.options)?;
        let first = reply.trim_start().to_ascii_uppercase();
        if first.starts_with("YES") {
            Ok(Verdict::accept(format!("model confirmed answer {answer}")))
        } else {
            debug!(reply = %reply, "model rejected answer");
            Ok(Verdict::reject(format!("model rejected answer {answer}: {}", reply.trim())))
        }
    }
}

/// Read a JSON number, or a string like `"$1,200"`, as `f64`.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

impl ProblemSpec for WordProblem {
    fn name(&self) -> &str {
        "word-problem"
    }

    fn final_target(&self, problem: &str) -> Result<Target> {
        if problem.trim().is_empty() {
            bail!("word problem text is empty");
        }
        Ok(Target::from(ANSWER_KEY))
    }

    fn propose_last_step(&self, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        self.render("last_step", state, target, avoid)
    }

    fn parse_target(&self, text: &str) -> Result<Target, ParseError> {
        let line = strip_fences(text)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("");
        let name = line.trim_matches(|c| matches!(c, '"' | '\'' | '.' | ':'));
        if !IDENT_RE.is_match(name) {
            return Err(ParseError::new(format!("not a variable name: {line:?}")));
        }
        Ok(Target::from(name))
    }

    fn propose_forward_step(
        &self,
        state: &Workspace,
        target: &Target,
        avoid: &AvoidSet,
    ) -> String {
        self.render("forward_step", state, target, avoid)
    }

    fn parse_update(&self, text: &str, _state: &Workspace) -> Result<Workspace, ParseError> {
        let body = strip_fences(text);
        let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
            return Err(ParseError::new("no JSON object in update"));
        };
        if end < start {
            return Err(ParseError::new("no JSON object in update"));
        }
        let update: Update = serde_json::from_str(&body[start..=end])
            .map_err(|err| ParseError::new(format!("invalid update: {err}")))?;
        if !IDENT_RE.is_match(&update.var) {
            return Err(ParseError::new(format!("not a variable name: {:?}", update.var)));
        }
        let Some(value) = as_number(&update.value) else {
            return Err(ParseError::new(format!(
                "value for {} is not numeric: {}",
                update.var, update.value
            )));
        };
        Ok(Workspace::from_pairs([(update.var, value)]))
    }

    fn check_local(&self, state: &Workspace, target: &Target) -> bool {
        state.get(target.as_str()).and_then(as_number).is_some()
    }

    fn verify_final(
        &self,
        state: &Workspace,
        model: &dyn LanguageModel,
    ) -> Result<Verdict, CompletionError> {
        let Some(answer) = state.get(ANSWER_KEY).and_then(as_number) else {
            return Ok(Verdict::reject("no numeric answer"));
        };
        match self.gold {
            Some(gold) if (answer - gold).abs() < TOLERANCE => {
                Ok(Verdict::accept(format!("answer {answer} matches {gold}")))
            }
            Some(gold) => Ok(Verdict::reject(format!("answer {answer} differs from {gold}"))),
            None => self.ask_model(state, answer, model),
        }
    }
}
