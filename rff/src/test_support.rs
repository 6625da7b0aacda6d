//! Test-only helpers: a scripted model and a minimal key-presence task.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, bail};
use serde_json::Value;

use crate::core::avoid::AvoidSet;
use crate::core::types::{StepIndex, Target, Verdict};
use crate::core::workspace::Workspace;
use crate::error::{CompletionError, ParseError};
use crate::model::{CompletionOptions, LanguageModel};
use crate::spec::ProblemSpec;

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<Result<String, CompletionError>>,
    fallback: Option<Result<String, CompletionError>>,
    prompts: Vec<String>,
}

/// Model that replays queued completions in order and records every prompt.
///
/// Once the queue is empty it repeats the fallback, or fails with a
/// non-transient error if none was set.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<Script>,
}

impl ScriptedModel {
    pub fn new<I, T>(responses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let queue = responses.into_iter().map(|r| Ok(r.into())).collect();
        Self {
            script: Mutex::new(Script {
                queue,
                ..Script::default()
            }),
        }
    }

    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn then_err(self, err: CompletionError) -> Self {
        self.push(Err(err))
    }

    /// Repeat `text` forever once the queue is drained.
    pub fn then_repeat(self, text: impl Into<String>) -> Self {
        self.script.lock().expect("lock").fallback = Some(Ok(text.into()));
        self
    }

    /// Fail with `err` forever once the queue is drained.
    pub fn then_fail(self, err: CompletionError) -> Self {
        self.script.lock().expect("lock").fallback = Some(Err(err));
        self
    }

    fn push(self, response: Result<String, CompletionError>) -> Self {
        self.script.lock().expect("lock").queue.push_back(response);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().expect("lock").prompts.clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().expect("lock").queue.len()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let mut script = self.script.lock().expect("lock");
        script.prompts.push(prompt.to_string());
        if let Some(next) = script.queue.pop_front() {
            return next;
        }
        script.fallback.clone().unwrap_or_else(|| {
            Err(CompletionError::Misconfigured(
                "scripted model ran out of responses".to_string(),
            ))
        })
    }
}

/// Task whose targets are workspace keys.
///
/// - A target holds when its key is present.
/// - Proposals are a single whitespace-free line; updates are JSON objects.
/// - The goal verifies when present and, if set, equal to the expected value.
/// - A state containing a dead-end key is a boundary that backtracks to the
///   parent step.
#[derive(Debug, Default)]
pub struct MapSpec {
    expected: Option<Value>,
    dead_ends: Vec<String>,
    goal: Mutex<Option<Target>>,
    verify_calls: AtomicU32,
}

impl MapSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_value(mut self, value: Value) -> Self {
        self.expected = Some(value);
        self
    }

    pub fn dead_end(mut self, key: &str) -> Self {
        self.dead_ends.push(key.to_string());
        self
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn hits_dead_end(&self, state: &Workspace) -> bool {
        self.dead_ends.iter().any(|key| state.contains_key(key))
    }

    fn render(kind: &str, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        let avoided: Vec<&str> = avoid.targets().iter().map(|t| t.as_str()).collect();
        format!(
            "{kind} target={target} avoid=[{}]\n{}",
            avoided.join(","),
            state.summarize()
        )
    }
}

impl ProblemSpec for MapSpec {
    fn name(&self) -> &str {
        "map"
    }

    fn final_target(&self, problem: &str) -> Result<Target> {
        let key = problem.trim();
        if key.is_empty() {
            bail!("problem must name a goal key");
        }
        let goal = Target::from(key);
        *self.goal.lock().expect("lock") = Some(goal.clone());
        Ok(goal)
    }

    fn propose_last_step(&self, state: &Workspace, target: &Target, avoid: &AvoidSet) -> String {
        Self::render("last-step", state, target, avoid)
    }

    fn parse_target(&self, text: &str) -> Result<Target, ParseError> {
        let text = text.trim();
        if text.is_empty() || text.contains(char::is_whitespace) {
            return Err(ParseError::new(format!("not a key: {text:?}")));
        }
        Ok(Target::from(text))
    }

    fn propose_forward_step(
        &self,
        state: &Workspace,
        target: &Target,
        avoid: &AvoidSet,
    ) -> String {
        Self::render("forward", state, target, avoid)
    }

    fn parse_update(&self, text: &str, _state: &Workspace) -> Result<Workspace, ParseError> {
        serde_json::from_str(text).map_err(|err| ParseError::new(err.to_string()))
    }

    fn check_local(&self, state: &Workspace, target: &Target) -> bool {
        state.contains_key(target.as_str())
    }

    fn verify_final(
        &self,
        state: &Workspace,
        _model: &dyn LanguageModel,
    ) -> Result<Verdict, CompletionError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let goal = self.goal.lock().expect("lock").clone();
        let Some(value) = goal.and_then(|g| state.get(g.as_str()).cloned()) else {
            return Ok(Verdict::reject("goal key missing"));
        };
        match &self.expected {
            Some(expected) if *expected != value => {
                Ok(Verdict::reject(format!("expected {expected}, got {value}")))
            }
            _ => Ok(Verdict::accept(format!("goal = {value}"))),
        }
    }

    fn locate_backtrack_point(
        &self,
        state: &Workspace,
        _target: &Target,
        step: StepIndex,
    ) -> Option<StepIndex> {
        self.hits_dead_end(state)
            .then(|| StepIndex(step.0.saturating_sub(1)))
    }

    fn is_boundary(&self, state: &Workspace, goal: &Target) -> bool {
        state.contains_key(goal.as_str()) || self.hits_dead_end(state)
    }
}
