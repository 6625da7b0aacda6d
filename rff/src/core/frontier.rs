//! Explicit frontier stack for the tree variant.
//!
//! Each frontier owns the workspace produced by its step and its own
//! avoid-set. Rewinding truncates the stack, so everything a discarded branch
//! produced is dropped with it.

use crate::core::avoid::AvoidSet;
use crate::core::types::{StepIndex, Target};
use crate::core::workspace::Workspace;

/// The `(state, target, avoid-set)` triple being advanced at one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Frontier {
    pub step: StepIndex,
    pub state: Workspace,
    pub target: Target,
    pub avoid: AvoidSet,
}

impl Frontier {
    pub fn new(step: StepIndex, state: Workspace, target: Target) -> Self {
        Self {
            step,
            state,
            target,
            avoid: AvoidSet::new(),
        }
    }
}

/// Arena of frontiers indexed by [`StepIndex`]; the last element is live.
#[derive(Debug, Clone)]
pub struct FrontierStack {
    frames: Vec<Frontier>,
}

impl FrontierStack {
    /// Start a stack whose root frontier works from `state` toward `target`.
    pub fn new(state: Workspace, target: Target) -> Self {
        Self {
            frames: vec![Frontier::new(StepIndex::ROOT, state, target)],
        }
    }

    pub fn current(&self) -> &Frontier {
        // Invariant: the root frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Frontier {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push the frontier produced by stepping from the live one.
    pub fn push(&mut self, state: Workspace, target: Target) -> StepIndex {
        let step = self.current().step.next();
        self.frames.push(Frontier::new(step, state, target));
        step
    }

    /// Make frontier `step` live again, dropping every frontier above it.
    ///
    /// Records `(state_j, abandoned target)` in frontier `j`'s avoid-set,
    /// where the abandoned target is the one frontier `j + 1` was created
    /// for. Returns `None` (and leaves the stack untouched) if `step` is not
    /// strictly below the live frontier.
    pub fn rewind_to(&mut self, step: StepIndex) -> Option<Target> {
        let index = step.as_usize();
        if index + 1 >= self.frames.len() {
            return None;
        }
        let abandoned = self.frames[index + 1].target.clone();
        self.frames.truncate(index + 1);
        let frame = self.current_mut();
        let state = frame.state.clone();
        frame.avoid.insert(&state, &abandoned);
        Some(abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ws(key: &str, value: i64) -> Workspace {
        Workspace::from_pairs([(key, json!(value))])
    }

    #[test]
    fn push_assigns_increasing_steps() {
        let mut stack = FrontierStack::new(Workspace::new(), Target::from("goal"));
        assert_eq!(stack.push(ws("a", 1), Target::from("a")), StepIndex(1));
        assert_eq!(stack.push(ws("b", 2), Target::from("b")), StepIndex(2));
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.current().target, Target::from("b"));
    }

    #[test]
    fn rewind_restores_the_frontier_workspace_and_records_avoid() {
        let mut stack = FrontierStack::new(Workspace::new(), Target::from("goal"));
        let s1 = ws("a", 1);
        stack.push(s1.clone(), Target::from("a"));
        stack.push(s1.merge(&ws("b", 2)), Target::from("b"));

        let abandoned = stack.rewind_to(StepIndex(1)).expect("rewind");

        assert_eq!(abandoned, Target::from("b"));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().state, s1);
        assert!(stack.current().avoid.contains(&s1, &Target::from("b")));
    }

    #[test]
    fn rewind_to_live_or_deeper_step_is_rejected() {
        let mut stack = FrontierStack::new(Workspace::new(), Target::from("goal"));
        stack.push(ws("a", 1), Target::from("a"));

        assert_eq!(stack.rewind_to(StepIndex(1)), None);
        assert_eq!(stack.rewind_to(StepIndex(5)), None);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn avoid_sets_survive_rewinds_to_other_ancestors() {
        let mut stack = FrontierStack::new(Workspace::new(), Target::from("goal"));
        stack.push(ws("a", 1), Target::from("a"));
        stack.push(ws("b", 2), Target::from("b"));
        stack.rewind_to(StepIndex(1)).expect("rewind to 1");
        stack.push(ws("c", 3), Target::from("c"));

        stack.rewind_to(StepIndex::ROOT).expect("rewind to root");

        let root = stack.current();
        assert!(root.avoid.contains(&Workspace::new(), &Target::from("a")));
        assert_eq!(root.avoid.len(), 1);
    }
}
