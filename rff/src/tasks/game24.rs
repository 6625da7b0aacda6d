//! The 24-game: combine the given numbers with `+ - * /` into 24.
//!
//! Each workspace entry is one expression the model produced:
//! `{"expr": "(4*6)", "value": 24.0, "nums": [4, 6]}`. The numbers an entry
//! consumes are no longer available to later expressions.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use minijinja::context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::core::avoid::AvoidSet;
use crate::core::types::{StepIndex, Target, Verdict};
use crate::core::workspace::Workspace;
use crate::error::{CompletionError, ParseError};
use crate::model::LanguageModel;
use crate::prompt::{PromptBuilder, PromptEngine};
use crate::spec::ProblemSpec;
use crate::tasks::strip_fences;

pub const GOAL_VALUE: f64 = 24.0;

/// Stepper reply meaning "this micro-goal is out of reach".
pub const CANNOT_ACHIEVE: &str = "CANNOT_ACHIEVE_WITH_AVAILABLE_NUMBERS";

const EPSILON: f64 = 1e-9;

const LAST_STEP_TEMPLATE: &str = include_str!("prompts/game24_last_step.md");
const FORWARD_STEP_TEMPLATE: &str = include_str!("prompts/game24_forward_step.md");

static INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("integer regex is valid"));

/// One expression in the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    expr: String,
    value: f64,
    nums: Vec<u32>,
}

type Multiset = BTreeMap<u32, usize>;

fn multiset(nums: &[u32]) -> Multiset {
    let mut counts = Multiset::new();
    for n in nums {
        *counts.entry(*n).or_default() += 1;
    }
    counts
}

pub struct Game24 {
    numbers: Vec<u32>,
    prompts: PromptBuilder,
}

impl Game24 {
    pub fn new(numbers: Vec<u32>, prompt_budget_bytes: usize) -> Result<Self> {
        if numbers.is_empty() {
            bail!("24-game needs at least one number");
        }
        let engine = PromptEngine::new()
            .with_template("last_step", LAST_STEP_TEMPLATE)?
            .with_template("forward_step", FORWARD_STEP_TEMPLATE)?;
        Ok(Self {
            numbers,
            prompts: PromptBuilder::new(engine, prompt_budget_bytes),
        })
    }

    /// Parse a problem such as `"4 6 1 1"` or `"4, 6, 1, 1"`.
    pub fn from_problem(problem: &str, prompt_budget_bytes: usize) -> Result<Self> {
        Self::new(parse_numbers(problem)?, prompt_budget_bytes)
    }

    fn entries(state: &Workspace) -> Vec<Entry> {
        state
            .values()
            .filter_map(|value| serde_json::from_value::<Entry>(value.clone()).ok())
            .collect()
    }

    /// Original numbers not yet consumed by any entry, in ascending order.
    fn available(&self, state: &Workspace) -> Vec<u32> {
        let mut counts = multiset(&self.numbers);
        for entry in Self::entries(state) {
            for n in entry.nums {
                if let Some(count) = counts.get_mut(&n) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        counts
            .into_iter()
            .flat_map(|(n, count)| std::iter::repeat_n(n, count))
            .collect()
    }

    fn render(&self, name: &str, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        let avoided: Vec<&str> = avoid.targets().iter().map(|t| t.as_str()).collect();
        let rendered = self.prompts.build(
            name,
            context! {
                goal => GOAL_VALUE,
                original => &self.numbers,
                available => self.available(state),
                expressions => Self::entries(state),
                avoid => avoided,
                target => target.as_str(),
                target_value => evaluate(target.as_str()).ok(),
                cannot_achieve => CANNOT_ACHIEVE,
            },
        );
        match rendered {
            Ok(pack) => pack.into_string(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), template = name, "prompt rendering failed");
                format!("Reach {target} using {:?}. Reply with one expression.", self.available(state))
            }
        }
    }

    fn reaches_goal_with_all_numbers(&self, state: &Workspace) -> Option<Entry> {
        let original = multiset(&self.numbers);
        Self::entries(state)
            .into_iter()
            .find(|e| (e.value - GOAL_VALUE).abs() < EPSILON && multiset(&e.nums) == original)
    }
}

impl ProblemSpec for Game24 {
    fn name(&self) -> &str {
        "game24"
    }

    fn final_target(&self, problem: &str) -> Result<Target> {
        let numbers = parse_numbers(problem)?;
        if multiset(&numbers) != multiset(&self.numbers) {
            bail!("problem numbers {numbers:?} differ from task numbers {:?}", self.numbers);
        }
        Ok(Target::from("24"))
    }

    fn propose_last_step(&self, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        self.render("last_step", state, target, avoid)
    }

    fn parse_target(&self, text: &str) -> Result<Target, ParseError> {
        let expr = normalize_expression(first_line(text));
        if expr.is_empty() {
            return Err(ParseError::new("empty target expression"));
        }
        evaluate(&expr)?;
        Ok(Target::new(expr))
    }

    fn propose_forward_step(
        &self,
        state: &Workspace,
        target: &Target,
        avoid: &AvoidSet,
    ) -> String {
        self.render("forward_step", state, target, avoid)
    }

    fn parse_update(&self, text: &str, state: &Workspace) -> Result<Workspace, ParseError> {
        let line = first_line(text);
        if line.trim() == CANNOT_ACHIEVE {
            return Ok(Workspace::new());
        }
        let expr = normalize_expression(line);
        if expr.is_empty() {
            return Err(ParseError::new("empty expression"));
        }
        let value = evaluate(&expr)?;
        let nums = extract_numbers(&expr);

        let available = multiset(&self.available(state));
        let needed = multiset(&nums);
        let fits = needed
            .iter()
            .all(|(n, count)| available.get(n).is_some_and(|have| have >= count));
        if !fits {
            return Err(ParseError::new(format!(
                "{expr} uses numbers that are not available"
            )));
        }

        let key = format!("expr_{}", state.len() + 1);
        debug!(key = %key, expr = %expr, value, "parsed expression");
        Ok(Workspace::from_pairs([(
            key.as_str(),
            json!({ "expr": expr, "value": value, "nums": nums }),
        )]))
    }

    fn check_local(&self, state: &Workspace, target: &Target) -> bool {
        let Ok(wanted) = evaluate(target.as_str()) else {
            return false;
        };
        Self::entries(state)
            .iter()
            .any(|e| (e.value - wanted).abs() < EPSILON)
    }

    fn verify_final(
        &self,
        state: &Workspace,
        _model: &dyn LanguageModel,
    ) -> Result<Verdict, CompletionError> {
        Ok(match self.reaches_goal_with_all_numbers(state) {
            Some(entry) => Verdict::accept(format!("{} = 24", entry.expr)),
            None => Verdict::reject("no expression reaches 24 using every number exactly once"),
        })
    }

    /// A branch that consumed every number without a winning expression is a
    /// dead end; revisit the step before it.
    fn locate_backtrack_point(
        &self,
        state: &Workspace,
        _target: &Target,
        step: StepIndex,
    ) -> Option<StepIndex> {
        let dead_end =
            self.available(state).is_empty() && self.reaches_goal_with_all_numbers(state).is_none();
        dead_end.then(|| StepIndex(step.0.saturating_sub(1)))
    }

    fn is_boundary(&self, state: &Workspace, goal: &Target) -> bool {
        self.available(state).is_empty() || self.check_local(state, goal)
    }

    fn targets_match(&self, a: &Target, b: &Target) -> bool {
        match (evaluate(a.as_str()), evaluate(b.as_str())) {
            (Ok(x), Ok(y)) => (x - y).abs() < EPSILON,
            _ => a == b,
        }
    }
}

fn parse_numbers(problem: &str) -> Result<Vec<u32>> {
    let numbers = extract_numbers(problem);
    if numbers.is_empty() {
        bail!("no numbers in 24-game problem {problem:?}");
    }
    Ok(numbers)
}

fn extract_numbers(text: &str) -> Vec<u32> {
    INT_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

fn first_line(text: &str) -> &str {
    strip_fences(text)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

/// Drop an `= value` suffix and trailing punctuation.
fn normalize_expression(line: &str) -> String {
    let expr = line.split_once('=').map_or(line, |(lhs, _)| lhs);
    expr.trim()
        .trim_end_matches(['.', ';'])
        .replace(['×', 'x', 'X'], "*")
        .replace('÷', "/")
        .trim()
        .to_string()
}

/// Evaluate `+ - * /` with parentheses and unary minus.
pub fn evaluate(expr: &str) -> Result<f64, ParseError> {
    let mut parser = ExprParser {
        chars: expr.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.chars.len() {
        return Err(ParseError::new(format!(
            "unexpected {:?} in {expr:?}",
            parser.chars[parser.pos]
        )));
    }
    if !value.is_finite() {
        return Err(ParseError::new(format!("{expr:?} is not finite")));
    }
    Ok(value)
}

/// Deepest nesting of parentheses and unary minus the parser accepts.
const MAX_NESTING: usize = 64;

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, ParseError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ParseError> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' {
                if rhs.abs() < EPSILON {
                    return Err(ParseError::new("division by zero"));
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    /// Parse `inner` one nesting level deeper.
    fn nested<T>(
        &mut self,
        inner: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new("expression nested too deeply"));
        }
        self.depth += 1;
        let value = inner(self);
        self.depth -= 1;
        value
    }

    fn factor(&mut self) -> Result<f64, ParseError> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.nested(Self::factor)?)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.nested(Self::expr)?;
                if self.peek() != Some(')') {
                    return Err(ParseError::new("unbalanced parentheses"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse()
                    .map_err(|_| ParseError::new(format!("bad number {literal:?}")))
            }
            Some(c) => Err(ParseError::new(format!("unexpected {c:?}"))),
            None => Err(ParseError::new("unexpected end of expression")),
        }
    }
}
