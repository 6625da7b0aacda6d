//! Records of unproductive `(state, target)` pairs.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::types::Target;
use crate::core::workspace::Workspace;

/// Soft hints kept per avoid-set; the oldest hint is dropped beyond this.
pub const MAX_SOFT_HINTS: usize = 16;

/// One unproductive pair, keyed by the workspace fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AvoidEntry {
    pub state: String,
    pub target: Target,
}

/// Hard entries plus soft hints.
///
/// Hard entries are pairs the controller refuses to step toward again.
/// Soft hints are targets that recently failed a local check; they only
/// steer prompts and never block a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvoidSet {
    entries: BTreeSet<AvoidEntry>,
    hints: Vec<Target>,
}

impl AvoidSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(state, target)` as unproductive. Returns `false` if it was
    /// already recorded.
    pub fn insert(&mut self, state: &Workspace, target: &Target) -> bool {
        self.entries.insert(AvoidEntry {
            state: state.fingerprint(),
            target: target.clone(),
        })
    }

    pub fn contains(&self, state: &Workspace, target: &Target) -> bool {
        self.entries.contains(&AvoidEntry {
            state: state.fingerprint(),
            target: target.clone(),
        })
    }

    /// Deprioritize `target` in prompts without forbidding it.
    pub fn hint(&mut self, target: &Target) {
        self.hints.retain(|t| t != target);
        self.hints.push(target.clone());
        if self.hints.len() > MAX_SOFT_HINTS {
            self.hints.remove(0);
        }
    }

    /// Every target mentioned by a hard entry or a hint, deduplicated and
    /// sorted, for rendering into prompts.
    pub fn targets(&self) -> Vec<&Target> {
        let mut all: BTreeSet<&Target> = self.entries.iter().map(|e| &e.target).collect();
        all.extend(self.hints.iter());
        all.into_iter().collect()
    }

    pub fn hints(&self) -> &[Target] {
        &self.hints
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.hints.is_empty()
    }
}
